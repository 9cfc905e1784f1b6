use std::{borrow::Cow, sync::Arc};

use smtp2api_common::{error::SessionError, incoming, internal, status::Status, tracing};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Response, Session};
use crate::{
    command::Command,
    connection::Read,
    error::ProtocolError,
    state::{NEED_MAIL_BEFORE_RCPT, PostDot, State},
    transaction::Reply,
};

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    /// Handle one command line
    pub(super) async fn receive_command(&mut self, read: Read) -> Result<Response, SessionError> {
        let line = match read {
            Read::Eof => {
                internal!("Client closed the connection");
                return Ok((None, super::Event::ConnectionClose));
            }
            Read::Partial(_) => {
                self.connection.discard_line().await?;
                return Ok(self.protocol_error(&ProtocolError::LineTooLong));
            }
            Read::Line(line) => line,
        };

        let command = match Command::try_from(line.as_slice()) {
            Ok(command) => command,
            Err(err) => {
                incoming!("{}", String::from_utf8_lossy(&line).trim_end());

                // Sequence is checked before the recipient itself
                let err = match err {
                    ProtocolError::InvalidRecipient(_) if !self.state.accepts_recipients() => {
                        ProtocolError::OutOfSequence(NEED_MAIL_BEFORE_RCPT)
                    }
                    err => err,
                };
                return Ok(self.protocol_error(&err));
            }
        };

        incoming!("{command}");

        match self.state.transition(command.clone(), &mut self.context) {
            Ok(state) => {
                tracing::debug!("Transitioned from {} to {state}", self.state);
                self.state = state;
                self.errors = 0;
                Ok(self.reply(&command))
            }
            Err(err) => Ok(self.protocol_error(&err)),
        }
    }

    /// Read message data up to the terminating `.` line, then dispatch it
    pub(super) async fn receive_data(&mut self) -> Result<Response, SessionError> {
        let timeout = self.config.timeouts.data();
        let maximum = self.config.max_message_size;

        let mut data = Vec::new();
        let mut at_line_start = true;
        let mut exceeded = false;

        loop {
            let Ok(read) = tokio::time::timeout(timeout, self.connection.read_line(DATA_CHUNK)).await
            else {
                return Ok(self.timed_out(timeout));
            };

            let (chunk, complete) = match read? {
                Read::Eof => {
                    internal!(level = WARN, "Client closed the connection during DATA");
                    return Ok((None, super::Event::ConnectionClose));
                }
                Read::Line(line) => (line, true),
                Read::Partial(chunk) => (chunk, false),
            };

            let content: &[u8] = if at_line_start {
                if is_terminator(&chunk) {
                    break;
                }

                chunk.strip_prefix(b".").unwrap_or(chunk.as_slice())
            } else {
                chunk.as_slice()
            };

            if !exceeded {
                if maximum > 0 && data.len() + content.len() > maximum {
                    exceeded = true;
                    data = Vec::new();
                } else {
                    data.extend_from_slice(content);
                }
            }

            at_line_start = complete;
        }

        if exceeded {
            internal!(level = INFO, "Message exceeded {maximum} bytes, discarded");
            self.context.envelope.clear();
            self.state = State::greeted(&self.context);

            return Ok(self.single(
                Status::ExceededStorage,
                &format!("Message exceeds fixed maximum message size {maximum}"),
            ));
        }

        self.state = State::PostDot(PostDot);
        let (status, message) = self.dispatch(data).await;
        self.state = State::greeted(&self.context);

        Ok(self.single(status, &message))
    }

    /// Hand the message to the transaction handler, bounded by the dispatch timeout
    async fn dispatch(&mut self, data: Vec<u8>) -> Reply {
        let envelope = std::mem::take(&mut self.context.envelope);
        let handler = Arc::clone(&self.config.handler);
        let timeout = self.config.timeouts.dispatch();

        internal!(
            level = DEBUG,
            "Dispatching {} bytes for {} recipient(s)",
            data.len(),
            envelope.recipients().len()
        );

        let task = tokio::spawn(async move { handler.handle(data, envelope).await });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                internal!(level = ERROR, "Dispatch task failed: {err}");
                (
                    Status::ActionUnavailable,
                    Cow::Borrowed("Requested action aborted: local error in processing"),
                )
            }
            Err(_) => {
                internal!(
                    level = WARN,
                    "Dispatch did not finish within {} seconds",
                    timeout.as_secs()
                );
                (
                    Status::ActionUnavailable,
                    Cow::Borrowed("Requested action aborted: try again later"),
                )
            }
        }
    }
}

/// Largest piece of a DATA line read at once
const DATA_CHUNK: usize = 64 * 1024;

fn is_terminator(line: &[u8]) -> bool {
    matches!(line, b".\r\n" | b".\n" | b".")
}
