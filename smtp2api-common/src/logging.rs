use std::str::FromStr;

use serde::Deserialize;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:tt)*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg)*)
    }};
}

/// Log something sent to a client, e.g. an SMTP reply
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::outgoing!(level = TRACE, $($msg)*)
    };
}

/// Log something received from a client, e.g. an SMTP command
#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::incoming!(level = TRACE, $($msg)*)
    };
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::internal!(level = TRACE, $($msg)*)
    };
}

/// Logging settings
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Maximum level to emit (`error`, `warn`, `info`, `debug`, `trace`).
    ///
    /// The `LOG_LEVEL` environment variable takes precedence.
    #[serde(default = "default_level", alias = "Level")]
    pub level: String,

    /// Emit JSON lines instead of the compact human readable format
    #[serde(default, alias = "Json")]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

fn default_level() -> String {
    String::from("info")
}

impl LogConfig {
    /// Resolve the level filter, preferring `LOG_LEVEL` over the configured level
    pub fn level_filter(&self) -> LevelFilter {
        let default = LevelFilter::from_str(&self.level).unwrap_or(LevelFilter::INFO);

        std::env::var("LOG_LEVEL").map_or(default, |level| {
            LevelFilter::from_str(level.as_str()).unwrap_or_else(|_| {
                eprintln!("Invalid log level specified {level}, defaulting to {default}");
                default
            })
        })
    }
}

/// Install the global subscriber.
///
/// Only events emitted from the smtp2api crates are kept.
///
/// # Errors
///
/// Fails if a global subscriber has already been installed.
pub fn init(config: &LogConfig) -> Result<(), TryInitError> {
    let layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_ansi(true)
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
            .boxed()
    };

    tracing_subscriber::Registry::default()
        .with(
            layer
                .with_filter(config.level_filter())
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target().starts_with("smtp2api")
                })),
        )
        .try_init()
}
