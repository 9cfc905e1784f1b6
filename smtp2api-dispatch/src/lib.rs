//! Delivery of normalized messages through transactional-email HTTP APIs.

pub mod coordinator;
pub mod error;
pub mod policy;
pub mod provider;
pub mod registry;

pub use coordinator::{Delivery, DispatchCoordinator};
pub use error::{ConfigurationError, DispatchError, ProviderError};
pub use policy::{MAX_RETRIES_PER_PROVIDER, RetryPolicy};
pub use provider::{ClientSettings, ProviderClient, ProviderConfig, ProviderKind, ProviderResult};
pub use registry::{ProviderRegistry, Selection};
