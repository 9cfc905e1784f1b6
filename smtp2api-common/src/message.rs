//! The normalized email record and the MIME parser that produces it.

use ahash::AHashMap;
use charset::Charset;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use serde::Deserialize;

use crate::{address::Address, envelope::Envelope, error::MalformedMessageError, internal};

/// Headers that are lifted into dedicated [`EmailMessage`] fields, or that
/// describe the MIME structure the providers rebuild themselves.
const LIFTED_HEADERS: &[&str] = &[
    "subject",
    "from",
    "to",
    "bcc",
    "content-type",
    "content-transfer-encoding",
    "mime-version",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

/// A message normalized from a raw MIME payload, ready to be handed to a
/// transactional-email API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: Address,
    pub to: Vec<Address>,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub headers: AHashMap<String, String>,
    pub attachments: Vec<Attachment>,
}

impl EmailMessage {
    pub const fn has_body(&self) -> bool {
        self.body_text.is_some() || self.body_html.is_some()
    }
}

/// Sender used when neither the message nor the envelope provide one.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct EmailDefaults {
    #[serde(default, alias = "SenderName")]
    pub sender_name: String,
    #[serde(default, alias = "SenderEmail")]
    pub sender_email: String,
}

impl EmailDefaults {
    /// The default sender as an address, if one is configured
    ///
    /// # Errors
    ///
    /// Fails if a sender email is configured but is not a valid mailbox.
    pub fn sender(&self) -> Result<Option<Address>, crate::error::AddressError> {
        if self.sender_email.trim().is_empty() {
            return Ok(None);
        }

        let name = (!self.sender_name.trim().is_empty()).then(|| self.sender_name.clone());
        Address::new(name, &self.sender_email).map(Some)
    }
}

#[derive(Default)]
struct Parts {
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
}

/// Decodes a raw `DATA` payload into an [`EmailMessage`].
#[derive(Clone, Debug, Default)]
pub struct MailParser {
    fallback_sender: Option<Address>,
}

impl MailParser {
    /// Create a parser that falls back to the configured default sender.
    ///
    /// An unusable default is logged and ignored; messages that need it are
    /// then rejected with [`MalformedMessageError::NoSender`].
    pub fn new(defaults: &EmailDefaults) -> Self {
        let fallback_sender = defaults.sender().unwrap_or_else(|err| {
            internal!(level = WARN, "Ignoring default sender: {err}");
            None
        });

        Self { fallback_sender }
    }

    ///
    /// Parse a message received during `DATA`.
    ///
    /// The sender comes from the `From` header, falling back to the envelope
    /// sender and then to the configured default. Recipients are the envelope
    /// recipients, or the `To`/`Cc` headers if the envelope has none.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedMessageError`] when the header block is not
    /// terminated by a blank line, when there is no text or html body, or when
    /// no sender can be determined.
    ///
    pub fn parse(
        &self,
        raw: &[u8],
        envelope: &Envelope,
    ) -> Result<EmailMessage, MalformedMessageError> {
        if !has_header_separator(raw) {
            return Err(MalformedMessageError::MissingHeaderSeparator);
        }

        let parsed =
            mailparse::parse_mail(raw).map_err(|err| MalformedMessageError::Mime(err.to_string()))?;

        let mut parts = Parts::default();
        collect_parts(&parsed, &mut parts);

        if parts.text.is_none() && parts.html.is_none() {
            return Err(MalformedMessageError::NoBody);
        }

        let from = header_sender(&parsed)
            .or_else(|| envelope.sender().cloned())
            .or_else(|| self.fallback_sender.clone())
            .ok_or(MalformedMessageError::NoSender)
            .map(|from| self.named_sender(from))?;

        let to = if envelope.has_recipients() {
            dedup(envelope.recipients().to_vec())
        } else {
            dedup(header_recipients(&parsed))
        };

        Ok(EmailMessage {
            from,
            to,
            subject: parsed
                .headers
                .get_first_value("Subject")
                .map(|subject| subject.trim().to_string())
                .unwrap_or_default(),
            body_text: parts.text,
            body_html: parts.html,
            headers: forwarded_headers(&parsed),
            attachments: parts.attachments,
        })
    }

    fn named_sender(&self, from: Address) -> Address {
        match &self.fallback_sender {
            Some(fallback) if from.name().is_none() && from.same_mailbox(fallback) => {
                fallback.clone()
            }
            _ => from,
        }
    }
}

fn header_sender(parsed: &ParsedMail<'_>) -> Option<Address> {
    let value = parsed.headers.get_first_value("From")?;

    match Address::parse_list(&value) {
        Ok(mut list) if !list.is_empty() => Some(list.swap_remove(0)),
        Ok(_) => None,
        Err(err) => {
            internal!(level = DEBUG, "Ignoring unusable From header: {err}");
            None
        }
    }
}

fn has_header_separator(raw: &[u8]) -> bool {
    raw.starts_with(b"\r\n")
        || raw.starts_with(b"\n")
        || raw.windows(4).any(|window| window == b"\r\n\r\n")
        || raw.windows(2).any(|window| window == b"\n\n")
}

fn collect_parts(part: &ParsedMail<'_>, parts: &mut Parts) {
    if !part.subparts.is_empty() {
        for subpart in &part.subparts {
            collect_parts(subpart, parts);
        }
        return;
    }

    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned();
    let mime_type = part.ctype.mimetype.to_ascii_lowercase();

    if matches!(disposition.disposition, DispositionType::Attachment) || filename.is_some() {
        match part.get_body_raw() {
            Ok(content) => {
                let filename = filename
                    .unwrap_or_else(|| format!("attachment-{}", parts.attachments.len() + 1));
                parts.attachments.push(Attachment {
                    filename,
                    mime_type,
                    content,
                });
            }
            Err(err) => internal!(level = WARN, "Dropping undecodable attachment: {err}"),
        }
    } else if mime_type == "text/plain" && parts.text.is_none() {
        parts.text = Some(decode_text(part));
    } else if mime_type == "text/html" && parts.html.is_none() {
        parts.html = Some(decode_text(part));
    }
}

/// Decode a text part with its declared charset.
///
/// Unknown charsets, and undeclared charsets on valid UTF-8, are read as
/// UTF-8 (lossily) rather than rejected.
fn decode_text(part: &ParsedMail<'_>) -> String {
    let raw = part.get_body_raw().unwrap_or_else(|err| {
        internal!(level = WARN, "Unable to decode transfer encoding: {err}");
        Vec::new()
    });

    let declared = part.ctype.params.contains_key("charset");
    if !declared && std::str::from_utf8(&raw).is_ok() {
        return String::from_utf8_lossy(&raw).into_owned();
    }

    match Charset::for_label(part.ctype.charset.as_bytes()) {
        Some(charset) => charset.decode(&raw).0.into_owned(),
        None => {
            internal!(
                level = DEBUG,
                "Unknown charset {}, decoding as UTF-8",
                part.ctype.charset
            );
            String::from_utf8_lossy(&raw).into_owned()
        }
    }
}

fn header_recipients(parsed: &ParsedMail<'_>) -> Vec<Address> {
    ["To", "Cc"]
        .iter()
        .flat_map(|name| parsed.headers.get_all_values(name))
        .filter_map(|value| Address::parse_list(&value).ok())
        .flatten()
        .collect()
}

fn dedup(addresses: Vec<Address>) -> Vec<Address> {
    let mut unique: Vec<Address> = Vec::with_capacity(addresses.len());
    for address in addresses {
        if !unique.iter().any(|seen| seen.same_mailbox(&address)) {
            unique.push(address);
        }
    }
    unique
}

fn forwarded_headers(parsed: &ParsedMail<'_>) -> AHashMap<String, String> {
    let mut headers = AHashMap::new();

    for header in &parsed.headers {
        let key = header.get_key();
        if LIFTED_HEADERS
            .iter()
            .any(|lifted| key.eq_ignore_ascii_case(lifted))
            || headers
                .keys()
                .any(|existing: &String| existing.eq_ignore_ascii_case(&key))
        {
            continue;
        }

        headers.insert(key, header.get_value());
    }

    headers
}
