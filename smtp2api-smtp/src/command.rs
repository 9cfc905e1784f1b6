use core::fmt::{self, Display, Formatter};

use smtp2api_common::{address::Address, error::AddressError};

use crate::error::ProtocolError;

/// ESMTP parameters of a `MAIL FROM` command (RFC 5321 Section 3.3).
///
/// Only `SIZE` (RFC 1870) is interpreted, `BODY` and anything else are
/// accepted and ignored.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct MailParameters {
    size: Option<usize>,
}

impl MailParameters {
    /// Parse the parameters following the reverse-path.
    ///
    /// # Errors
    ///
    /// Fails if `SIZE` is given more than once, or is not a number.
    pub fn from_params_str(params: &str) -> Result<Self, ProtocolError> {
        let mut parsed = Self::default();

        for token in params.split_whitespace() {
            let (key, value) = token.split_once('=').unwrap_or((token, ""));

            if key.eq_ignore_ascii_case("SIZE") {
                if parsed.size.is_some() {
                    return Err(ProtocolError::Syntax(String::from(
                        "Duplicate SIZE parameter",
                    )));
                }

                parsed.size = Some(value.parse().map_err(|_| {
                    ProtocolError::Syntax(format!("Invalid SIZE value: {value}"))
                })?);
            }
        }

        Ok(parsed)
    }

    /// The declared message size, if any
    pub const fn size(&self) -> Option<usize> {
        self.size
    }
}

#[derive(PartialEq, Eq, Hash, Debug, Clone)]
pub enum HeloVariant {
    Ehlo(String),
    Helo(String),
}

impl Display for HeloVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ehlo(_) => "EHLO",
            Self::Helo(_) => "HELO",
        })
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Command {
    Helo(HeloVariant),
    /// `None` is the null reverse-path `<>` from
    /// [RFC-5321](https://www.ietf.org/rfc/rfc5321.txt).
    MailFrom(Option<Address>, MailParameters),
    RcptTo(Address),
    Data,
    Rset,
    Noop,
    Help,
    Quit,
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(variant @ (HeloVariant::Ehlo(id) | HeloVariant::Helo(id))) => {
                write!(f, "{variant} {id}")
            }
            Self::MailFrom(sender, _) => write!(
                f,
                "MAIL FROM:<{}>",
                sender.as_ref().map_or("", Address::mailbox)
            ),
            Self::RcptTo(recipient) => write!(f, "RCPT TO:<{}>", recipient.mailbox()),
            Self::Data => f.write_str("DATA"),
            Self::Rset => f.write_str("RSET"),
            Self::Noop => f.write_str("NOOP"),
            Self::Help => f.write_str("HELP"),
            Self::Quit => f.write_str("QUIT"),
        }
    }
}

/// Split `FROM:<path> params` / `TO:<path> params` into the path and the
/// trailing parameters, after checking the keyword.
fn split_path<'a>(argument: &'a str, keyword: &str) -> Option<(&'a str, &'a str)> {
    let argument = argument.trim_start();
    let prefix = argument.get(..keyword.len())?;
    if !prefix.eq_ignore_ascii_case(keyword) {
        return None;
    }

    let rest = argument[keyword.len()..].trim_start();
    if let Some(bracketed) = rest.strip_prefix('<') {
        let end = bracketed.find('>')?;
        Some((bracketed[..end].trim(), &bracketed[end + 1..]))
    } else {
        Some(rest.split_once(char::is_whitespace).unwrap_or((rest, "")))
    }
}

fn mail_from(argument: &str) -> Result<Command, ProtocolError> {
    let (path, params) = split_path(argument, "FROM:").ok_or_else(|| {
        ProtocolError::Syntax(String::from("Syntax: MAIL FROM:<address>"))
    })?;

    let sender = match Address::parse(path) {
        Ok(address) => Some(address),
        Err(AddressError::Empty) => None,
        Err(err) => return Err(ProtocolError::Syntax(err.to_string())),
    };

    Ok(Command::MailFrom(
        sender,
        MailParameters::from_params_str(params)?,
    ))
}

fn rcpt_to(argument: &str) -> Result<Command, ProtocolError> {
    let (path, _) = split_path(argument, "TO:")
        .ok_or_else(|| ProtocolError::Syntax(String::from("Syntax: RCPT TO:<address>")))?;

    Address::parse(path)
        .map(Command::RcptTo)
        .map_err(|err| ProtocolError::InvalidRecipient(err.to_string()))
}

fn helo(argument: &str, ehlo: bool) -> Result<Command, ProtocolError> {
    let id = argument.split_whitespace().next().ok_or_else(|| {
        ProtocolError::Syntax(format!(
            "{} requires a domain name",
            if ehlo { "EHLO" } else { "HELO" }
        ))
    })?;

    Ok(Command::Helo(if ehlo {
        HeloVariant::Ehlo(id.to_string())
    } else {
        HeloVariant::Helo(id.to_string())
    }))
}

impl TryFrom<&str> for Command {
    type Error = ProtocolError;

    fn try_from(line: &str) -> Result<Self, Self::Error> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (verb, argument) = line
            .trim_start()
            .split_once(' ')
            .unwrap_or((line.trim_start(), ""));

        match verb.to_ascii_uppercase().as_str() {
            "HELO" => helo(argument, false),
            "EHLO" => helo(argument, true),
            "MAIL" => mail_from(argument),
            "RCPT" => rcpt_to(argument),
            "DATA" => Ok(Self::Data),
            "RSET" => Ok(Self::Rset),
            "NOOP" => Ok(Self::Noop),
            "HELP" => Ok(Self::Help),
            "QUIT" => Ok(Self::Quit),
            _ => Err(ProtocolError::UnknownCommand(line.to_string())),
        }
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = ProtocolError;

    fn try_from(line: &[u8]) -> Result<Self, Self::Error> {
        Self::try_from(String::from_utf8_lossy(line).as_ref())
    }
}
