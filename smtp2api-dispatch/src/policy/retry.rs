//! Retry policy for send attempts against a single provider.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Most extra attempts a provider gets before the coordinator fails over
pub const MAX_RETRIES_PER_PROVIDER: u32 = 1;

/// How often a provider is retried after a transport-class failure before the
/// coordinator fails over to the next candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts against the same provider after the first one.
    ///
    /// Default: 1
    #[serde(default = "defaults::retries_per_provider", alias = "RetriesPerProvider")]
    pub retries_per_provider: u32,

    /// Pause before retrying the same provider (in milliseconds).
    ///
    /// Default: 500
    #[serde(default = "defaults::backoff_ms", alias = "BackoffMs")]
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries_per_provider: defaults::retries_per_provider(),
            backoff_ms: defaults::backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// Check if another attempt against the same provider is allowed, given
    /// the attempts already made against it.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts <= self.retries_per_provider
    }

    /// Attempts allowed per provider, including the first one
    #[must_use]
    const fn attempts_per_provider(&self) -> u32 {
        self.retries_per_provider.saturating_add(1)
    }

    #[must_use]
    pub const fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Longest one dispatch can take across `providers` when every attempt
    /// runs into `send_timeout`
    #[must_use]
    pub fn worst_case(&self, send_timeout: Duration, providers: usize) -> Duration {
        let providers = u32::try_from(providers).unwrap_or(u32::MAX);
        let per_provider = send_timeout
            .saturating_mul(self.attempts_per_provider())
            .saturating_add(self.backoff().saturating_mul(self.retries_per_provider));

        per_provider.saturating_mul(providers)
    }
}

mod defaults {
    pub const fn retries_per_provider() -> u32 {
        1
    }

    pub const fn backoff_ms() -> u64 {
        500
    }
}
