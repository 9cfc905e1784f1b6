//! The gateway configuration file.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use smtp2api_common::{logging::LogConfig, message::EmailDefaults};
use smtp2api_dispatch::{
    ClientSettings, ConfigurationError, MAX_RETRIES_PER_PROVIDER, ProviderConfig,
    ProviderRegistry, RetryPolicy, Selection,
};
use smtp2api_smtp::SmtpConfig;
use thiserror::Error;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "SMTP2API_CONFIG";

/// Locations tried, in order, when neither the CLI nor the environment name a file
pub const DEFAULT_PATHS: [&str; 2] = [
    "./smtp2api.config.ron",
    "/etc/smtp2api/smtp2api.config.ron",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("SMTP2API_CONFIG points to non-existent file: {}", .0.display())]
    MissingEnvFile(PathBuf),

    #[error("Configuration file {} does not exist", .0.display())]
    MissingFile(PathBuf),

    #[error("No configuration file found. Tried:\n  - SMTP2API_CONFIG environment variable\n{0}")]
    NotFound(String),

    #[error("Failed to read config from {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config from {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },

    #[error("At least one entry in api_providers is required")]
    NoProviders,

    #[error("retries_per_provider is {configured}, at most {maximum} is allowed")]
    TooManyRetries { configured: u32, maximum: u32 },

    #[error(
        "smtp.timeouts.dispatch_secs ({ceiling}s) must exceed the longest possible dispatch ({}s)",
        .worst_case.as_secs_f64()
    )]
    DispatchCeiling { ceiling: u64, worst_case: Duration },

    #[error(transparent)]
    Provider(#[from] ConfigurationError),
}

/// The `dispatch` section
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default, alias = "Selection")]
    pub selection: Selection,

    /// Upper bound for a single send attempt, including the HTTP request.
    ///
    /// Default: 20 seconds
    #[serde(default = "defaults::send_timeout_secs", alias = "SendTimeoutSecs")]
    pub send_timeout_secs: u64,

    #[serde(default, alias = "Retry")]
    pub retry: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            selection: Selection::default(),
            send_timeout_secs: defaults::send_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatchConfig {
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default, alias = "Server", alias = "Smtp")]
    pub smtp: SmtpConfig,

    #[serde(default, alias = "EmailDefaults")]
    pub email_defaults: EmailDefaults,

    #[serde(default, alias = "APIProviders", alias = "ApiProviders")]
    pub api_providers: Vec<ProviderConfig>,

    #[serde(default, alias = "Dispatch")]
    pub dispatch: DispatchConfig,

    #[serde(default, alias = "Log")]
    pub log: LogConfig,
}

impl Config {
    /// Parse a configuration from RON text
    ///
    /// # Errors
    ///
    /// Returns the RON error, with its position, when the text does not
    /// describe a configuration.
    pub fn from_ron(text: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(text)
    }

    /// Read and validate the configuration at `path`
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed, or does not pass [`Config::validate`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_ron(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Check the parts of the configuration that deserialization cannot
    ///
    /// Every attempt the coordinator may make, across all providers, has to
    /// finish within `smtp.timeouts.dispatch_secs`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NoProviders`] for an empty provider list, the provider
    /// error that building the registry would hit, [`ConfigError::TooManyRetries`]
    /// or [`ConfigError::DispatchCeiling`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.registry()?;

        let retry = &self.dispatch.retry;
        if retry.retries_per_provider > MAX_RETRIES_PER_PROVIDER {
            return Err(ConfigError::TooManyRetries {
                configured: retry.retries_per_provider,
                maximum: MAX_RETRIES_PER_PROVIDER,
            });
        }

        let worst_case = retry.worst_case(self.dispatch.send_timeout(), self.api_providers.len());
        if worst_case >= self.smtp.timeouts.dispatch() {
            return Err(ConfigError::DispatchCeiling {
                ceiling: self.smtp.timeouts.dispatch_secs,
                worst_case,
            });
        }

        Ok(())
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            timeout: self.dispatch.send_timeout(),
            ..ClientSettings::default()
        }
    }

    /// Build the provider registry described by `api_providers` and `dispatch`
    ///
    /// # Errors
    ///
    /// See [`Config::validate`].
    pub fn registry(&self) -> Result<ProviderRegistry, ConfigError> {
        if self.api_providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }

        Ok(
            ProviderRegistry::from_config(&self.api_providers, &self.client_settings())?
                .with_selection(self.dispatch.selection),
        )
    }
}

/// Find the configuration file using the following precedence:
/// 1. the `--config` command line flag
/// 2. `SMTP2API_CONFIG` environment variable
/// 3. ./smtp2api.config.ron (current working directory)
/// 4. /etc/smtp2api/smtp2api.config.ron (system-wide config)
///
/// # Errors
///
/// Fails if an explicitly named file does not exist, or none of the default
/// locations hold one.
pub fn locate(cli: Option<&Path>) -> Result<PathBuf, ConfigError> {
    locate_with(cli, std::env::var_os(CONFIG_ENV).map(PathBuf::from), &DEFAULT_PATHS)
}

fn locate_with(
    cli: Option<&Path>,
    env: Option<PathBuf>,
    defaults: &[&str],
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = cli {
        return if path.exists() {
            Ok(path.to_path_buf())
        } else {
            Err(ConfigError::MissingFile(path.to_path_buf()))
        };
    }

    if let Some(path) = env {
        return if path.exists() {
            Ok(path)
        } else {
            Err(ConfigError::MissingEnvFile(path))
        };
    }

    defaults
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
        .ok_or_else(|| {
            ConfigError::NotFound(
                defaults
                    .iter()
                    .map(|path| format!("  - {path}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        })
}

mod defaults {
    pub const fn send_timeout_secs() -> u64 {
        20
    }
}
