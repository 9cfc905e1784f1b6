//! Transactional-email API clients.

pub mod sendgrid;
pub mod unisender;

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use smtp2api_common::message::EmailMessage;
use url::Url;

pub use sendgrid::SendGridProvider;
pub use unisender::UnisenderProvider;

use crate::error::{ConfigurationError, ProviderError};

/// The answer of one send attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderResult {
    pub accepted: bool,
    pub message_id: Option<String>,
    pub error_detail: Option<String>,
}

impl ProviderResult {
    pub const fn accepted(message_id: Option<String>) -> Self {
        Self {
            accepted: true,
            message_id,
            error_detail: None,
        }
    }

    pub fn rejected(detail: impl Into<String>) -> Self {
        Self {
            accepted: false,
            message_id: None,
            error_detail: Some(detail.into()),
        }
    }
}

/// A transactional-email HTTP API able to send an [`EmailMessage`].
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// The configured `sys_name` of this provider
    fn name(&self) -> &str;

    /// Submit one message.
    ///
    /// `Ok` carries the provider's verdict, which may be an explicit
    /// rejection. `Err` means the attempt itself failed.
    async fn send(&self, message: &EmailMessage) -> Result<ProviderResult, ProviderError>;
}

/// The API dialects understood by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ProviderKind {
    #[serde(alias = "unisender", alias = "UNISENDER")]
    Unisender,
    #[serde(alias = "sendgrid", alias = "SENDGRID")]
    SendGrid,
}

impl ProviderKind {
    /// Infer the kind from a provider's `sys_name`, e.g. `unisender-eu`
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.contains("unisender") {
            Some(Self::Unisender)
        } else if name.contains("sendgrid") {
            Some(Self::SendGrid)
        } else {
            None
        }
    }
}

/// One entry of the `api_providers` configuration list.
#[derive(Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(alias = "SysName")]
    pub sys_name: String,

    /// Base endpoint of the API, `https://` is assumed without a scheme
    #[serde(alias = "HostName")]
    pub host_name: String,

    #[serde(default, alias = "APIKey", alias = "ApiKey")]
    pub api_key: String,

    #[serde(default, alias = "Kind")]
    pub kind: Option<ProviderKind>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("sys_name", &self.sys_name)
            .field("host_name", &self.host_name)
            .field("api_key", &"<redacted>")
            .field("kind", &self.kind)
            .finish()
    }
}

/// Settings shared by every provider's HTTP client
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("smtp2api/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientSettings {
    pub(crate) fn client(&self, name: &str) -> Result<Client, ConfigurationError> {
        Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.as_str())
            .build()
            .map_err(|err| ConfigurationError::Client {
                name: name.to_string(),
                reason: err.to_string(),
            })
    }
}

/// Build the provider client described by `config`, with an already resolved
/// api key.
pub(crate) fn build(
    config: &ProviderConfig,
    api_key: String,
    settings: &ClientSettings,
) -> Result<Arc<dyn ProviderClient>, ConfigurationError> {
    let kind = config
        .kind
        .or_else(|| ProviderKind::from_name(&config.sys_name))
        .ok_or_else(|| ConfigurationError::UnknownKind(config.sys_name.clone()))?;

    let base = base_url(&config.host_name).map_err(|reason| ConfigurationError::InvalidHost {
        name: config.sys_name.clone(),
        host: config.host_name.clone(),
        reason,
    })?;
    let client = settings.client(&config.sys_name)?;

    let provider: Arc<dyn ProviderClient> = match kind {
        ProviderKind::Unisender => Arc::new(UnisenderProvider::new(
            config.sys_name.clone(),
            &base,
            api_key,
            client,
        )),
        ProviderKind::SendGrid => Arc::new(SendGridProvider::new(
            config.sys_name.clone(),
            &base,
            api_key,
            client,
        )),
    };

    Ok(provider)
}

/// Parse a configured host into a base URL, assuming `https://` when no
/// scheme is given
pub(crate) fn base_url(host: &str) -> Result<Url, String> {
    let host = host.trim();
    if host.is_empty() {
        return Err(String::from("host is empty"));
    }

    let candidate = if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{host}")
    };

    let url = Url::parse(&candidate).map_err(|err| err.to_string())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme {}", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err(String::from("missing host"));
    }

    Ok(url)
}

/// Append an API path to a base URL, keeping any path prefix of the base
pub(crate) fn endpoint(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url
}

/// Map a non-success HTTP status to the matching [`ProviderError`]
pub(crate) fn classify(status: StatusCode, detail: String) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::Authentication {
            status: status.as_u16(),
        },
        429 => ProviderError::RateLimited(detail),
        code if status.is_server_error() => ProviderError::Server {
            status: code,
            detail,
        },
        code if status.is_client_error() => ProviderError::Rejected {
            status: code,
            detail,
        },
        code => ProviderError::InvalidResponse(format!("Unexpected status {code}: {detail}")),
    }
}

/// Headers that are passed through to the provider: every `X-*` header and
/// `Reply-To`
pub(crate) fn passthrough_headers(message: &EmailMessage) -> Vec<(&str, &str)> {
    let mut headers: Vec<_> = message
        .headers
        .iter()
        .filter(|(name, _)| {
            name.get(..2)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("x-"))
                || name.eq_ignore_ascii_case("reply-to")
        })
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();
    headers.sort_unstable();
    headers
}
