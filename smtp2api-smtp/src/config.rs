//! Listener and session settings.

use std::{net::SocketAddr, time::Duration};

use serde::{Deserialize, Serialize};

/// The `smtp` section of the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Address the gateway accepts SMTP connections on.
    ///
    /// Default: `127.0.0.1:2525`
    #[serde(default = "defaults::listen", alias = "SMTPListen", alias = "Listen")]
    pub listen: SocketAddr,

    /// Host name used in the greeting and replies.
    ///
    /// Falls back to `$HOSTNAME`, then `localhost`, when empty.
    #[serde(default, alias = "Banner")]
    pub banner: String,

    /// Largest accepted message in bytes, `0` disables the limit.
    ///
    /// Default: 10 MiB
    #[serde(default = "defaults::max_message_size", alias = "MaxMessageSize")]
    pub max_message_size: usize,

    /// Consecutive protocol errors after which the connection is closed.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_errors", alias = "MaxErrors")]
    pub max_errors: u32,

    #[serde(default, alias = "Timeouts")]
    pub timeouts: ServerTimeouts,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            listen: defaults::listen(),
            banner: String::new(),
            max_message_size: defaults::max_message_size(),
            max_errors: defaults::max_errors(),
            timeouts: ServerTimeouts::default(),
        }
    }
}

impl SmtpConfig {
    /// The configured banner, or the host name of this machine
    pub fn banner(&self) -> String {
        if self.banner.trim().is_empty() {
            std::env::var("HOSTNAME").unwrap_or_else(|_| String::from("localhost"))
        } else {
            self.banner.trim().to_string()
        }
    }
}

/// Server-side timeouts, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTimeouts {
    /// Idle time allowed between commands.
    ///
    /// Default: 300 seconds (5 minutes, per RFC 5321)
    #[serde(default = "defaults::command_secs", alias = "CommandSecs")]
    pub command_secs: u64,

    /// Idle time allowed between lines of message data.
    ///
    /// Default: 180 seconds (3 minutes, per RFC 5321)
    #[serde(default = "defaults::data_secs", alias = "DataSecs")]
    pub data_secs: u64,

    /// Longest the client is kept waiting for the dispatch outcome.
    ///
    /// Default: 120 seconds
    #[serde(default = "defaults::dispatch_secs", alias = "DispatchSecs")]
    pub dispatch_secs: u64,

    /// Longest a listener waits for open sessions once shutdown starts.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::shutdown_secs", alias = "ShutdownSecs")]
    pub shutdown_secs: u64,
}

impl Default for ServerTimeouts {
    fn default() -> Self {
        Self {
            command_secs: defaults::command_secs(),
            data_secs: defaults::data_secs(),
            dispatch_secs: defaults::dispatch_secs(),
            shutdown_secs: defaults::shutdown_secs(),
        }
    }
}

impl ServerTimeouts {
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    pub const fn dispatch(&self) -> Duration {
        Duration::from_secs(self.dispatch_secs)
    }

    pub const fn shutdown(&self) -> Duration {
        Duration::from_secs(self.shutdown_secs)
    }
}

mod defaults {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    pub const fn listen() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 2525)
    }

    pub const fn max_message_size() -> usize {
        10 * 1024 * 1024
    }

    pub const fn max_errors() -> u32 {
        3
    }

    pub const fn command_secs() -> u64 {
        300
    }

    pub const fn data_secs() -> u64 {
        180
    }

    pub const fn dispatch_secs() -> u64 {
        120
    }

    pub const fn shutdown_secs() -> u64 {
        30
    }
}
