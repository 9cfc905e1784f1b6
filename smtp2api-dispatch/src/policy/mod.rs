//! Policies governing how dispatch attempts are made.

pub mod retry;

pub use retry::{MAX_RETRIES_PER_PROVIDER, RetryPolicy};
