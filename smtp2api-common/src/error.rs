//! Error types shared across the smtp2api crates.

use std::io;

use thiserror::Error;

/// Errors produced while validating a mailbox address.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// Nothing to parse.
    #[error("Empty address")]
    Empty,

    /// The input could not be parsed as an address at all.
    #[error("Unable to parse address '{input}': {reason}")]
    Syntax { input: String, reason: String },

    /// The mailbox is not of the form `local@domain`.
    #[error("Invalid mailbox '{0}'")]
    InvalidMailbox(String),
}

/// Errors that make a received message unsendable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedMessageError {
    /// There is no blank line separating the header block from the body.
    #[error("Missing blank line between headers and body")]
    MissingHeaderSeparator,

    /// Neither a text/plain nor a text/html part could be found.
    #[error("Message has no text or html body")]
    NoBody,

    /// No usable sender in the headers, the envelope or the defaults.
    #[error("Message has no usable sender")]
    NoSender,

    /// The MIME structure could not be parsed.
    #[error("Invalid MIME structure: {0}")]
    Mime(String),
}

/// Why a session ended abnormally.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    #[error("Connection closed by peer")]
    Closed,
}

impl SessionError {
    /// Whether the client simply went away, as opposed to a local failure
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Connection(err) => matches!(
                err.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::UnexpectedEof
            ),
        }
    }
}

/// Errors that can occur in the listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to socket address.
    #[error("Failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("Failed to accept connection: {0}")]
    AcceptFailed(#[from] io::Error),
}
