//! SendGrid v3 mail send API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::Client;
use serde::Serialize;
use smtp2api_common::{address::Address, message::EmailMessage};
use url::Url;

use super::{ProviderClient, ProviderResult, classify, endpoint, passthrough_headers};
use crate::error::ProviderError;

const SEND_PATH: &str = "/v3/mail/send";

pub struct SendGridProvider {
    name: String,
    endpoint: Url,
    api_key: String,
    client: Client,
}

impl SendGridProvider {
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
struct SendGridRequest<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: EmailAddress<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<EmailAddress<'a>>,
    subject: &'a str,
    content: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<SendGridAttachment<'a>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<&'a str, &'a str>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<EmailAddress<'a>>,
}

#[derive(Debug, Serialize)]
struct EmailAddress<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

impl<'a> From<&'a Address> for EmailAddress<'a> {
    fn from(address: &'a Address) -> Self {
        Self {
            email: address.mailbox(),
            name: address.name(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct SendGridAttachment<'a> {
    content: String,
    #[serde(rename = "type")]
    mime_type: &'a str,
    filename: &'a str,
    disposition: &'static str,
}

fn request(message: &EmailMessage) -> SendGridRequest<'_> {
    // SendGrid requires text/plain to come before text/html
    let mut content = Vec::with_capacity(2);
    if let Some(text) = &message.body_text {
        content.push(Content {
            content_type: "text/plain",
            value: text,
        });
    }
    if let Some(html) = &message.body_html {
        content.push(Content {
            content_type: "text/html",
            value: html,
        });
    }

    let mut reply_to = None;
    let mut headers = BTreeMap::new();
    for (name, value) in passthrough_headers(message) {
        if name.eq_ignore_ascii_case("reply-to") {
            reply_to = Some(EmailAddress {
                email: value,
                name: None,
            });
        } else {
            headers.insert(name, value);
        }
    }

    SendGridRequest {
        personalizations: vec![Personalization {
            to: message.to.iter().map(EmailAddress::from).collect(),
        }],
        from: EmailAddress::from(&message.from),
        reply_to,
        subject: &message.subject,
        content,
        attachments: message
            .attachments
            .iter()
            .map(|attachment| SendGridAttachment {
                content: STANDARD.encode(&attachment.content),
                mime_type: &attachment.mime_type,
                filename: &attachment.filename,
                disposition: "attachment",
            })
            .collect(),
        headers,
    }
}

#[async_trait]
impl ProviderClient for SendGridProvider {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip_all, fields(provider = %self.name))]
    async fn send(&self, message: &EmailMessage) -> Result<ProviderResult, ProviderError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&request(message))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let message_id = response
                .headers()
                .get("X-Message-Id")
                .and_then(|value| value.to_str().ok())
                .map(String::from);

            return Ok(ProviderResult::accepted(message_id));
        }

        let detail = response.text().await.unwrap_or_default();
        tracing::debug!(%status, %detail, "SendGrid API error");
        Err(classify(status, detail))
    }
}
