use core::fmt::Display;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{ConnectionError, ConnectionResult};

/// Longest accepted command line, CRLF included (RFC 5321 Section 4.5.3.1.6)
pub const MAX_COMMAND_LINE: usize = 1000;

/// One read from the client
#[derive(Debug, PartialEq, Eq)]
pub enum Read {
    /// A line including its terminator, or the unterminated tail of the
    /// stream when the peer stopped writing mid-line
    Line(Vec<u8>),
    /// `limit` bytes without a line terminator, the rest of the line follows
    Partial(Vec<u8>),
    /// The peer closed its side of the connection
    Eof,
}

/// A line-buffered client connection.
pub struct Connection<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    stream: BufReader<Stream>,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Connection<Stream> {
    pub fn new(stream: Stream) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Write a single reply line, appending CRLF
    pub async fn send<S: Display + Send + Sync>(&mut self, response: &S) -> ConnectionResult<()> {
        let line = format!("{response}\r\n");
        let stream = self.stream.get_mut();

        stream.write_all(line.as_bytes()).await?;
        stream.flush().await?;

        Ok(())
    }

    /// Read up to `limit` bytes, stopping after the first `\n`.
    pub async fn read_line(&mut self, limit: usize) -> ConnectionResult<Read> {
        let mut line = Vec::new();
        let read = (&mut self.stream)
            .take(limit as u64)
            .read_until(b'\n', &mut line)
            .await?;

        Ok(if read == 0 {
            Read::Eof
        } else if line.ends_with(b"\n") || read < limit {
            Read::Line(line)
        } else {
            Read::Partial(line)
        })
    }

    /// Throw away everything up to and including the next `\n`
    pub async fn discard_line(&mut self) -> ConnectionResult<()> {
        loop {
            let (consumed, done) = {
                let buffer = self.stream.fill_buf().await?;
                if buffer.is_empty() {
                    return Err(ConnectionError::Closed);
                }

                buffer
                    .iter()
                    .position(|&byte| byte == b'\n')
                    .map_or((buffer.len(), false), |position| (position + 1, true))
            };

            self.stream.consume(consumed);
            if done {
                return Ok(());
            }
        }
    }
}
