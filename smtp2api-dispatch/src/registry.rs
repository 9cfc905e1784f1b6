use std::{
    collections::HashSet,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use serde::Deserialize;

use crate::{
    error::ConfigurationError,
    provider::{self, ClientSettings, ProviderClient, ProviderConfig},
};

/// Order in which providers are tried for each message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum Selection {
    /// Always start with the first configured provider
    #[default]
    #[serde(alias = "failover")]
    Failover,

    /// Rotate the first provider for each message, the rest stay as failover
    #[serde(alias = "round_robin", alias = "roundrobin")]
    RoundRobin,
}

/// The configured providers, in priority order.
///
/// Immutable once built and shared between sessions behind an `Arc`.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn ProviderClient>>,
    selection: Selection,
    next: AtomicUsize,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .field("selection", &self.selection)
            .finish_non_exhaustive()
    }
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn ProviderClient>>) -> Self {
        Self {
            providers,
            selection: Selection::default(),
            next: AtomicUsize::new(0),
        }
    }

    ///
    /// Validate the provider configuration and build one client per entry,
    /// keeping the configured order.
    ///
    /// An empty `api_key` is looked up in `SMTP2API_<SYS_NAME>_API_KEY`.
    ///
    /// # Errors
    ///
    /// Fails on an empty or duplicate `sys_name`, a missing api key, an
    /// unparseable `host_name` or a provider kind that cannot be determined.
    ///
    pub fn from_config(
        configs: &[ProviderConfig],
        settings: &ClientSettings,
    ) -> Result<Self, ConfigurationError> {
        Self::from_config_with(configs, settings, |key| std::env::var(key).ok())
    }

    pub(crate) fn from_config_with(
        configs: &[ProviderConfig],
        settings: &ClientSettings,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let mut seen = HashSet::with_capacity(configs.len());
        let mut providers = Vec::with_capacity(configs.len());

        for (position, config) in configs.iter().enumerate() {
            let name = config.sys_name.trim();
            if name.is_empty() {
                return Err(ConfigurationError::EmptyName(position));
            }

            if !seen.insert(name.to_ascii_lowercase()) {
                return Err(ConfigurationError::DuplicateName(name.to_string()));
            }

            let variable = api_key_variable(name);
            let api_key = if config.api_key.trim().is_empty() {
                env(&variable)
                    .map(|key| key.trim().to_string())
                    .filter(|key| !key.is_empty())
                    .ok_or_else(|| ConfigurationError::MissingApiKey(name.to_string(), variable))?
            } else {
                config.api_key.trim().to_string()
            };

            providers.push(provider::build(config, api_key, settings)?);
        }

        Ok(Self::new(providers))
    }

    #[must_use]
    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    pub const fn selection(&self) -> Selection {
        self.selection
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|provider| provider.name()).collect()
    }

    /// The providers to try for one message, in order
    pub fn candidates(&self) -> Vec<Arc<dyn ProviderClient>> {
        if self.providers.is_empty() {
            return Vec::new();
        }

        let start = match self.selection {
            Selection::Failover => 0,
            Selection::RoundRobin => self.next.fetch_add(1, Ordering::Relaxed) % self.providers.len(),
        };

        self.providers[start..]
            .iter()
            .chain(&self.providers[..start])
            .cloned()
            .collect()
    }
}

/// `SMTP2API_<SYS_NAME>_API_KEY`, with the name uppercased and `-` as `_`
pub fn api_key_variable(sys_name: &str) -> String {
    format!(
        "SMTP2API_{}_API_KEY",
        sys_name.trim().to_ascii_uppercase().replace(['-', '.', ' '], "_")
    )
}
