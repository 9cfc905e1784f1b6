//! Unisender Go transactional API.
//!
//! `POST {host}/en/transactional/api/v1/email/send.json`, authenticated with
//! the `X-API-KEY` header.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use smtp2api_common::message::EmailMessage;
use url::Url;

use super::{ProviderClient, ProviderResult, classify, endpoint, passthrough_headers};
use crate::error::ProviderError;

const SEND_PATH: &str = "/en/transactional/api/v1/email/send.json";

pub struct UnisenderProvider {
    name: String,
    endpoint: Url,
    api_key: String,
    client: Client,
}

impl UnisenderProvider {
    pub fn new(name: String, base: &Url, api_key: String, client: Client) -> Self {
        Self {
            name,
            endpoint: endpoint(base, SEND_PATH),
            api_key,
            client,
        }
    }
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    message: Message<'a>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    recipients: Vec<Recipient<'a>>,
    body: Body<'a>,
    subject: &'a str,
    from_email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    from_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<&'a str, &'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<Attachment<'a>>,
}

#[derive(Debug, Serialize)]
struct Recipient<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    substitutions: BTreeMap<&'static str, &'a str>,
}

#[derive(Debug, Serialize)]
struct Body<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    plaintext: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Attachment<'a> {
    #[serde(rename = "type")]
    mime_type: &'a str,
    name: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    status: String,
    #[serde(default)]
    job_id: Option<String>,
    #[serde(default)]
    emails: Vec<String>,
    #[serde(default)]
    failed_emails: BTreeMap<String, String>,
    #[serde(default)]
    message: Option<String>,
}

fn request(message: &EmailMessage) -> SendRequest<'_> {
    let mut reply_to = None;
    let mut headers = BTreeMap::new();
    for (name, value) in passthrough_headers(message) {
        if name.eq_ignore_ascii_case("reply-to") {
            reply_to = Some(value);
        } else {
            headers.insert(name, value);
        }
    }

    SendRequest {
        message: Message {
            recipients: message
                .to
                .iter()
                .map(|to| Recipient {
                    email: to.mailbox(),
                    substitutions: to
                        .name()
                        .map(|name| BTreeMap::from([("to_name", name)]))
                        .unwrap_or_default(),
                })
                .collect(),
            body: Body {
                html: message.body_html.as_deref(),
                plaintext: message.body_text.as_deref(),
            },
            subject: &message.subject,
            from_email: message.from.mailbox(),
            from_name: message.from.name(),
            reply_to,
            headers,
            attachments: message
                .attachments
                .iter()
                .map(|attachment| Attachment {
                    mime_type: &attachment.mime_type,
                    name: &attachment.filename,
                    content: STANDARD.encode(&attachment.content),
                })
                .collect(),
        },
    }
}

#[async_trait]
impl ProviderClient for UnisenderProvider {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip_all, fields(provider = %self.name))]
    async fn send(&self, message: &EmailMessage) -> Result<ProviderResult, ProviderError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("X-API-KEY", &self.api_key)
            .header("Accept", "application/json")
            .json(&request(message))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::debug!(%status, %detail, "Unisender API error");
            return Err(classify(status, detail));
        }

        let body: SendResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;

        if body.status != "success" {
            return Ok(ProviderResult::rejected(
                body.message.unwrap_or(body.status),
            ));
        }

        if body.emails.is_empty() && !body.failed_emails.is_empty() {
            let detail = body
                .failed_emails
                .iter()
                .map(|(email, reason)| format!("{email}: {reason}"))
                .collect::<Vec<_>>()
                .join(", ");
            return Ok(ProviderResult::rejected(detail));
        }

        if !body.failed_emails.is_empty() {
            tracing::warn!(
                failed = ?body.failed_emails,
                "Unisender accepted the message for some recipients only"
            );
        }

        Ok(ProviderResult::accepted(body.job_id))
    }
}
