use std::{fmt, net::SocketAddr, sync::Arc, time::Duration};

use smtp2api_common::{Signal, error::SessionError, internal, outgoing, tracing};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::broadcast,
};

use crate::{
    config::{ServerTimeouts, SmtpConfig},
    connection::Connection,
    state::{Context, State},
    transaction::TransactionHandler,
};

mod io;
mod response;

#[derive(PartialEq, Eq, Debug)]
pub enum Event {
    ConnectionClose,
    ConnectionKeepAlive,
}

pub type Response = (Option<Vec<String>>, Event);

pub struct SessionConfig {
    pub banner: String,
    pub max_message_size: usize,
    pub max_errors: u32,
    pub timeouts: ServerTimeouts,
    pub handler: Arc<dyn TransactionHandler>,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("banner", &self.banner)
            .field("max_message_size", &self.max_message_size)
            .field("max_errors", &self.max_errors)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    /// Create a new `SessionConfig` builder around the handler that receives
    /// accepted messages
    pub fn builder(handler: Arc<dyn TransactionHandler>) -> SessionConfigBuilder {
        SessionConfigBuilder {
            banner: String::new(),
            max_message_size: 0,
            max_errors: 3,
            timeouts: ServerTimeouts::default(),
            handler,
        }
    }

    /// Session settings taken from the `smtp` configuration section
    pub fn from_config(config: &SmtpConfig, handler: Arc<dyn TransactionHandler>) -> Self {
        Self::builder(handler)
            .with_banner(config.banner())
            .with_max_message_size(config.max_message_size)
            .with_max_errors(config.max_errors)
            .with_timeouts(config.timeouts.clone())
            .build()
    }
}

/// Builder for `SessionConfig`
pub struct SessionConfigBuilder {
    banner: String,
    max_message_size: usize,
    max_errors: u32,
    timeouts: ServerTimeouts,
    handler: Arc<dyn TransactionHandler>,
}

impl SessionConfigBuilder {
    /// Set the server banner hostname
    #[must_use]
    pub fn with_banner(mut self, banner: String) -> Self {
        self.banner = banner;
        self
    }

    /// Set the largest accepted message, `0` for no limit
    #[must_use]
    pub const fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Set the number of consecutive protocol errors tolerated, `0` for no limit
    #[must_use]
    pub const fn with_max_errors(mut self, max_errors: u32) -> Self {
        self.max_errors = max_errors;
        self
    }

    /// Set the timeout configuration for this session
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: ServerTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Build the final `SessionConfig`
    #[must_use]
    pub fn build(self) -> SessionConfig {
        SessionConfig {
            banner: if self.banner.is_empty() {
                String::from("localhost")
            } else {
                self.banner
            },
            max_message_size: self.max_message_size,
            max_errors: self.max_errors,
            timeouts: self.timeouts,
            handler: self.handler,
        }
    }
}

pub struct Session<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    peer: SocketAddr,
    pub(super) config: Arc<SessionConfig>,
    pub(super) connection: Connection<Stream>,
    pub(super) state: State,
    pub(super) context: Context,
    /// Consecutive 500/501/503 replies
    pub(super) errors: u32,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    pub fn new(stream: Stream, peer: SocketAddr, config: Arc<SessionConfig>) -> Self {
        Self {
            peer,
            connection: Connection::new(stream),
            context: Context::new(config.max_message_size),
            state: State::default(),
            errors: 0,
            config,
        }
    }

    pub const fn state(&self) -> &State {
        &self.state
    }

    /// Drive the conversation until either side ends it.
    ///
    /// # Errors
    ///
    /// Fails when the connection breaks, a clean close by the client is not
    /// an error.
    #[tracing::instrument(skip_all, fields(peer = %self.peer))]
    pub async fn run(mut self, mut signal: broadcast::Receiver<Signal>) -> Result<(), SessionError> {
        internal!("Connected");

        let mut response = self.greeting();
        loop {
            let (lines, event) = response;

            for line in lines.unwrap_or_default() {
                outgoing!("{line}");

                self.connection.send(&line).await.map_err(|err| {
                    internal!(level = DEBUG, "Failed to send reply: {err}");
                    SessionError::from(err)
                })?;
            }

            if event == Event::ConnectionClose || self.state.should_close() {
                break;
            }

            response = self.next_response(&mut signal).await?;
        }

        internal!("Connection closed");
        Ok(())
    }

    /// Wait for the next thing the client does, or for shutdown
    async fn next_response(
        &mut self,
        signal: &mut broadcast::Receiver<Signal>,
    ) -> Result<Response, SessionError> {
        if matches!(self.state, State::Reading(_)) {
            return self.receive_data().await;
        }

        let timeout = self.config.timeouts.command();

        tokio::select! {
            // Closed or lagged both mean the controller is gone or shutting down
            _ = signal.recv() => {
                internal!(level = INFO, "Shutting down, closing connection");
                Ok(self.shutting_down())
            }
            received = tokio::time::timeout(timeout, self.connection.read_line(crate::connection::MAX_COMMAND_LINE)) => {
                match received {
                    Ok(read) => self.receive_command(read?).await,
                    Err(_) => Ok(self.timed_out(timeout)),
                }
            }
        }
    }

    fn timed_out(&mut self, timeout: Duration) -> Response {
        tracing::warn!(
            peer = %self.peer,
            state = %self.state,
            timeout_secs = timeout.as_secs(),
            "Client connection timed out"
        );

        self.close_with(format!(
            "{} Timeout waiting for client",
            self.config.banner
        ))
    }

    fn shutting_down(&mut self) -> Response {
        self.close_with(format!(
            "{} Server shutting down, closing connection",
            self.config.banner
        ))
    }
}
