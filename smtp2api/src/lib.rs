//! An SMTP gateway that relays submitted mail through transactional-email APIs.

pub mod config;
pub mod controller;
pub mod relay;

pub use config::Config;
pub use controller::Gateway;
pub use relay::Relay;
