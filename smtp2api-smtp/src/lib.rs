//! SMTP intake: command parsing, the session state machine and the listener.

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod listener;
pub mod session;
pub mod state;
pub mod transaction;

pub use command::{Command, HeloVariant, MailParameters};
pub use config::{ServerTimeouts, SmtpConfig};
pub use error::ProtocolError;
pub use listener::Listener;
pub use session::{Session, SessionConfig};
pub use state::State;
pub use transaction::{Reply, TransactionHandler};
