//! Typed errors for provider calls and dispatch.
//!
//! Provider failures are split into two families:
//! - transport-class failures (timeouts, connection errors, 5xx, 429) that are
//!   worth retrying against the same provider
//! - explicit outcomes (rejections, authentication failures) that move on to
//!   the next provider immediately

use smtp2api_common::status::Status;
use thiserror::Error;

/// Failure of a single send attempt against one provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The request never produced an HTTP response (connect, TLS, reset, ...).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The attempt did not complete within the send timeout.
    #[error("Request timed out")]
    Timeout,

    /// The provider answered with a 5xx status.
    #[error("Server error ({status}): {detail}")]
    Server { status: u16, detail: String },

    /// The provider answered with 429.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The provider refused the API key (401 / 403).
    #[error("Authentication failed ({status})")]
    Authentication { status: u16 },

    /// The provider refused the message itself (other 4xx).
    #[error("Rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    /// A success status with a body that could not be understood, or a
    /// status outside 2xx, 4xx and 5xx.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Returns `true` if the same provider should be tried again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout | Self::Server { .. } | Self::RateLimited(_)
        )
    }

    /// Returns `true` if the provider refused the message itself, so a retry
    /// with identical content cannot succeed against it.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::InvalidResponse(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Outcome of a dispatch that did not end with an accepted message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The message cannot be sent as-is; no provider was contacted.
    #[error("Message cannot be dispatched: {0}")]
    Invalid(String),

    /// Every candidate failed with a transport-class or authentication error.
    #[error("All providers failed, last error from {provider}: {detail}")]
    Transient { provider: String, detail: String },

    /// The last candidate explicitly rejected the message.
    #[error("Message rejected by {provider}: {detail}")]
    Rejected { provider: String, detail: String },

    #[error("No providers configured")]
    NoProviders,
}

impl DispatchError {
    /// The SMTP reply status for this outcome
    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::Invalid(_) | Self::Rejected { .. } => Status::TransactionFailed,
            Self::Transient { .. } | Self::NoProviders => Status::ActionUnavailable,
        }
    }
}

/// Invalid provider configuration, fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Provider at position {0} has an empty sys_name")]
    EmptyName(usize),

    #[error("Provider {0} is configured more than once")]
    DuplicateName(String),

    #[error("Provider {0} has no api_key (set it in the configuration or {1})")]
    MissingApiKey(String, String),

    #[error("Provider {name} has an invalid host_name {host}: {reason}")]
    InvalidHost {
        name: String,
        host: String,
        reason: String,
    },

    #[error("Provider {0} has no kind and its sys_name does not name a known provider")]
    UnknownKind(String),

    #[error("Unable to build HTTP client for {name}: {reason}")]
    Client { name: String, reason: String },
}
