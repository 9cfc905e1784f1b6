use std::fmt::{self, Display};

use mailparse::MailAddr;

use crate::error::AddressError;

const MAX_MAILBOX_LENGTH: usize = 254;
const MAX_LOCAL_PART_LENGTH: usize = 64;
const MAX_LABEL_LENGTH: usize = 63;

/// A validated mailbox (`local@domain`) with an optional display name.
///
/// Addresses can only be built through [`Address::new`], [`Address::parse`]
/// or [`Address::parse_list`], so every instance holds a syntactically valid
/// mailbox.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    name: Option<String>,
    mailbox: String,
}

impl Address {
    /// Build an address from a bare mailbox and an optional display name.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::InvalidMailbox`] if `mailbox` is not of the form
    /// `local@domain`.
    pub fn new(name: Option<String>, mailbox: &str) -> Result<Self, AddressError> {
        let mailbox = mailbox.trim();
        if mailbox.is_empty() {
            return Err(AddressError::Empty);
        }

        validate_mailbox(mailbox)?;

        Ok(Self {
            name: name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
            mailbox: mailbox.to_string(),
        })
    }

    /// Parse a single address such as `user@example.com`,
    /// `<user@example.com>` or `"User" <user@example.com>`.
    ///
    /// # Errors
    ///
    /// Fails if the input is empty, contains more than one address, is a group,
    /// or does not hold a valid mailbox.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed == "<>" {
            return Err(AddressError::Empty);
        }

        let list = mailparse::addrparse(trimmed).map_err(|err| AddressError::Syntax {
            input: trimmed.to_string(),
            reason: err.to_string(),
        })?;

        match list.first() {
            Some(MailAddr::Single(info)) if list.len() == 1 => {
                Self::new(info.display_name.clone(), &info.addr)
            }
            Some(_) => Err(AddressError::InvalidMailbox(trimmed.to_string())),
            None => Err(AddressError::Empty),
        }
    }

    /// Parse an address list header value (`To`, `Cc`, ...), flattening groups.
    ///
    /// # Errors
    ///
    /// Fails if the list cannot be parsed or any member is invalid.
    pub fn parse_list(input: &str) -> Result<Vec<Self>, AddressError> {
        let list = mailparse::addrparse(input).map_err(|err| AddressError::Syntax {
            input: input.trim().to_string(),
            reason: err.to_string(),
        })?;

        let mut addresses = Vec::with_capacity(list.len());
        for addr in list.iter() {
            match addr {
                MailAddr::Single(info) => {
                    addresses.push(Self::new(info.display_name.clone(), &info.addr)?);
                }
                MailAddr::Group(group) => {
                    for info in &group.addrs {
                        addresses.push(Self::new(info.display_name.clone(), &info.addr)?);
                    }
                }
            }
        }

        Ok(addresses)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// Case-insensitive comparison of the mailboxes, ignoring display names
    pub fn same_mailbox(&self, other: &Self) -> bool {
        self.mailbox.eq_ignore_ascii_case(&other.mailbox)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "\"{}\" <{}>", name.replace('"', "\\\""), self.mailbox),
            None => f.write_str(&self.mailbox),
        }
    }
}

fn validate_mailbox(mailbox: &str) -> Result<(), AddressError> {
    let invalid = || AddressError::InvalidMailbox(mailbox.to_string());

    if mailbox.len() > MAX_MAILBOX_LENGTH {
        return Err(invalid());
    }

    let (local, domain) = mailbox.rsplit_once('@').ok_or_else(invalid)?;

    if !valid_local_part(local) || !valid_domain(domain) {
        return Err(invalid());
    }

    Ok(())
}

fn valid_local_part(local: &str) -> bool {
    if local.is_empty() || local.len() > MAX_LOCAL_PART_LENGTH {
        return false;
    }

    if local.len() >= 2 && local.starts_with('"') && local.ends_with('"') {
        return !local.chars().any(char::is_control);
    }

    !local.starts_with('.')
        && !local.ends_with('.')
        && !local.contains("..")
        && !local.chars().any(|c| {
            c.is_whitespace()
                || c.is_control()
                || matches!(c, '<' | '>' | '(' | ')' | ',' | ';' | ':' | '\\' | '[' | ']' | '"' | '@')
        })
}

fn valid_domain(domain: &str) -> bool {
    if domain.is_empty() {
        return false;
    }

    if domain.starts_with('[') && domain.ends_with(']') {
        return domain.len() > 2 && !domain.chars().any(char::is_whitespace);
    }

    domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LENGTH
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_alphanumeric() || c == '-')
    })
}
