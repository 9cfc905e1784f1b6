use std::borrow::Cow;

use async_trait::async_trait;
use smtp2api_common::{
    envelope::Envelope, internal, message::MailParser, status::Status, tracing,
};
use smtp2api_dispatch::{DispatchCoordinator, DispatchError};
use smtp2api_smtp::{Reply, TransactionHandler};

/// Turns each accepted SMTP message into a provider API call.
#[derive(Debug, Clone)]
pub struct Relay {
    parser: MailParser,
    coordinator: DispatchCoordinator,
}

impl Relay {
    pub const fn new(parser: MailParser, coordinator: DispatchCoordinator) -> Self {
        Self {
            parser,
            coordinator,
        }
    }
}

/// The reply for a failed dispatch; provider details stay in the logs
fn failure_reply(err: &DispatchError) -> Reply {
    let status = err.status();
    let message = if status.is_temporary() {
        "Requested action aborted: try again later"
    } else {
        "Transaction failed: message was not accepted for delivery"
    };

    (status, Cow::Borrowed(message))
}

#[async_trait]
impl TransactionHandler for Relay {
    #[tracing::instrument(skip_all, fields(size = data.len()))]
    async fn handle(&self, data: Vec<u8>, envelope: Envelope) -> Reply {
        let message = match self.parser.parse(&data, &envelope) {
            Ok(message) => message,
            Err(err) => {
                internal!(level = WARN, "Malformed message: {err}");
                return (
                    Status::TransactionFailed,
                    Cow::Borrowed("Transaction failed: message could not be parsed"),
                );
            }
        };

        match self.coordinator.dispatch(message, &envelope).await {
            Ok(delivery) => {
                tracing::debug!(
                    provider = %delivery.provider,
                    attempts = delivery.attempts,
                    "Delivered"
                );
                (Status::Ok, Cow::Borrowed("Ok: message accepted for delivery"))
            }
            Err(err) => {
                internal!(level = WARN, "Dispatch failed: {err}");
                failure_reply(&err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc, Mutex,
            atomic::{AtomicU32, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use smtp2api_common::{
        address::Address,
        envelope::Envelope,
        message::{EmailDefaults, EmailMessage, MailParser},
        status::Status,
    };
    use smtp2api_dispatch::{
        DispatchCoordinator, ProviderClient, ProviderError, ProviderRegistry, ProviderResult,
        RetryPolicy,
    };
    use smtp2api_smtp::TransactionHandler;

    use super::Relay;

    enum Behaviour {
        Accept,
        Reject,
        Fail,
    }

    struct Scripted {
        behaviour: Behaviour,
        calls: AtomicU32,
        seen: Mutex<Vec<EmailMessage>>,
    }

    impl Scripted {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicU32::new(0),
                seen: Mutex::default(),
            })
        }
    }

    #[async_trait]
    impl ProviderClient for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, message: &EmailMessage) -> Result<ProviderResult, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(message.clone());

            match self.behaviour {
                Behaviour::Accept => Ok(ProviderResult::accepted(Some(String::from("id-1")))),
                Behaviour::Reject => Ok(ProviderResult::rejected("secret provider detail")),
                Behaviour::Fail => Err(ProviderError::Transport(String::from("refused"))),
            }
        }
    }

    fn relay(provider: Arc<Scripted>) -> Relay {
        let registry = ProviderRegistry::new(vec![provider as Arc<dyn ProviderClient>]);
        let retry = RetryPolicy {
            retries_per_provider: 0,
            backoff_ms: 0,
        };

        Relay::new(
            MailParser::new(&EmailDefaults::default()),
            DispatchCoordinator::new(Arc::new(registry), retry, Duration::from_secs(5)),
        )
    }

    fn envelope() -> Envelope {
        let mut envelope = Envelope::default();
        envelope
            .sender_mut()
            .replace(Address::parse("sender@example.com").unwrap());
        envelope.add_recipient(Address::parse("rcpt@example.com").unwrap());
        envelope
    }

    const MESSAGE: &[u8] = b"From: Shop <shop@example.com>\r\nSubject: Hi\r\n\r\nHello\r\n";

    #[tokio::test]
    async fn accepted() {
        let provider = Scripted::new(Behaviour::Accept);
        let (status, message) = relay(Arc::clone(&provider))
            .handle(MESSAGE.to_vec(), envelope())
            .await;

        assert_eq!(status, Status::Ok);
        assert!(!message.contains("id-1"));

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0].subject, "Hi");
        assert_eq!(seen[0].from.mailbox(), "shop@example.com");
        assert_eq!(seen[0].to[0].mailbox(), "rcpt@example.com");
    }

    #[tokio::test]
    async fn rejected_hides_provider_detail() {
        let (status, message) = relay(Scripted::new(Behaviour::Reject))
            .handle(MESSAGE.to_vec(), envelope())
            .await;

        assert_eq!(status, Status::TransactionFailed);
        assert!(!message.contains("secret"));
    }

    #[tokio::test]
    async fn transport_failure_is_temporary() {
        let (status, message) = relay(Scripted::new(Behaviour::Fail))
            .handle(MESSAGE.to_vec(), envelope())
            .await;

        assert_eq!(status, Status::ActionUnavailable);
        assert!(!message.contains("refused"));
    }

    #[tokio::test]
    async fn malformed_message_contacts_nobody() {
        let provider = Scripted::new(Behaviour::Accept);
        let (status, message) = relay(Arc::clone(&provider))
            .handle(b"Subject: no separator".to_vec(), envelope())
            .await;

        assert_eq!(status, Status::TransactionFailed);
        assert_eq!(message, "Transaction failed: message could not be parsed");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mime_errors_stay_out_of_the_reply() {
        let provider = Scripted::new(Behaviour::Accept);
        let raw = b"From: shop@example.com\r\nContent-Type: image/png\r\n\r\niVBORw0KGgo=\r\n".to_vec();
        let (status, message) = relay(Arc::clone(&provider)).handle(raw, envelope()).await;

        assert_eq!(status, Status::TransactionFailed);
        assert!(!message.contains("no text or html body"), "{message}");
        assert_eq!(message, "Transaction failed: message could not be parsed");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
