use crate::address::Address;

/// The SMTP-level sender and recipients of a mail transaction, as established
/// by `MAIL FROM` and `RCPT TO`.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    sender: Option<Address>,
    recipients: Vec<Address>,
}

impl Envelope {
    /// Returns the envelope sender, `None` for the null reverse-path
    #[inline]
    pub const fn sender(&self) -> Option<&Address> {
        self.sender.as_ref()
    }

    /// Returns a mutable reference to the envelope sender
    #[inline]
    pub const fn sender_mut(&mut self) -> &mut Option<Address> {
        &mut self.sender
    }

    /// Returns the envelope recipients, in the order they were accepted
    #[inline]
    pub fn recipients(&self) -> &[Address] {
        &self.recipients
    }

    #[inline]
    pub const fn has_recipients(&self) -> bool {
        !self.recipients.is_empty()
    }

    pub fn add_recipient(&mut self, recipient: Address) {
        self.recipients.push(recipient);
    }

    /// Forget the sender and all recipients
    pub fn clear(&mut self) {
        self.sender = None;
        self.recipients.clear();
    }
}

#[cfg(test)]
mod test {
    use super::Envelope;
    use crate::address::Address;

    #[test]
    fn accumulate_and_clear() {
        let mut envelope = Envelope::default();
        assert!(!envelope.has_recipients());

        envelope
            .sender_mut()
            .replace(Address::parse("from@example.com").unwrap());
        envelope.add_recipient(Address::parse("a@example.com").unwrap());
        envelope.add_recipient(Address::parse("b@example.com").unwrap());

        assert!(envelope.has_recipients());
        assert_eq!(envelope.recipients().len(), 2);
        assert_eq!(envelope.sender().unwrap().mailbox(), "from@example.com");

        envelope.clear();
        assert_eq!(envelope, Envelope::default());
    }
}
