//! Error types for the SMTP intake.

use std::io;

use smtp2api_common::{error::SessionError, status::Status};
use thiserror::Error;

/// A command that cannot be honoured in the current session.
///
/// Each variant maps to exactly one SMTP reply, see [`ProtocolError::status`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unrecognised command")]
    UnknownCommand(String),

    #[error("Line too long")]
    LineTooLong,

    #[error("{0}")]
    Syntax(String),

    #[error("{0}")]
    OutOfSequence(&'static str),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Message size {declared} exceeds fixed maximum message size {maximum}")]
    SizeExceeded { declared: usize, maximum: usize },
}

impl ProtocolError {
    pub const fn status(&self) -> Status {
        match self {
            Self::UnknownCommand(_) | Self::LineTooLong => Status::SyntaxError,
            Self::Syntax(_) => Status::ParameterError,
            Self::OutOfSequence(_) => Status::InvalidCommandSequence,
            Self::InvalidRecipient(_) => Status::Error,
            Self::SizeExceeded { .. } => Status::ExceededStorage,
        }
    }

    /// Whether this error counts towards the consecutive error limit
    /// (500, 501 and 503 replies)
    pub const fn is_client_misbehaviour(&self) -> bool {
        matches!(
            self,
            Self::UnknownCommand(_) | Self::LineTooLong | Self::Syntax(_) | Self::OutOfSequence(_)
        )
    }
}

/// Errors that can occur while reading from or writing to a client.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed by peer")]
    Closed,
}

impl From<ConnectionError> for SessionError {
    fn from(error: ConnectionError) -> Self {
        match error {
            ConnectionError::Io(err) => Self::Connection(err),
            ConnectionError::Closed => Self::Closed,
        }
    }
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;
