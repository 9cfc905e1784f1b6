//! Provider selection, retry and failover for one message.

use std::{sync::Arc, time::Duration};

use smtp2api_common::{envelope::Envelope, internal, message::EmailMessage};

use crate::{
    error::{DispatchError, ProviderError},
    policy::RetryPolicy,
    registry::ProviderRegistry,
};

/// A message accepted by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub provider: String,
    pub message_id: Option<String>,
    pub attempts: u32,
}

enum Failure {
    Transient(String),
    Rejected(String),
}

impl From<&ProviderError> for Failure {
    fn from(error: &ProviderError) -> Self {
        if error.is_permanent() {
            Self::Rejected(error.to_string())
        } else {
            Self::Transient(error.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchCoordinator {
    registry: Arc<ProviderRegistry>,
    retry: RetryPolicy,
    send_timeout: Duration,
}

impl DispatchCoordinator {
    pub const fn new(
        registry: Arc<ProviderRegistry>,
        retry: RetryPolicy,
        send_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            retry,
            send_timeout,
        }
    }

    ///
    /// Deliver `message` through the first provider that accepts it.
    ///
    /// Transport-class failures are retried against the same provider, up to
    /// the retry policy's limit, before moving on. Rejections and
    /// authentication failures move on immediately.
    ///
    /// # Errors
    ///
    /// See [`DispatchError`] for the possible outcomes, and
    /// [`DispatchError::status`] for the matching SMTP replies.
    ///
    #[tracing::instrument(
        skip_all,
        fields(
            sender = envelope.sender().map_or("<>", |sender| sender.mailbox()),
            recipients = message.to.len()
        )
    )]
    pub async fn dispatch(
        &self,
        message: EmailMessage,
        envelope: &Envelope,
    ) -> Result<Delivery, DispatchError> {
        validate(&message)?;

        let candidates = self.registry.candidates();
        if candidates.is_empty() {
            internal!(level = WARN, "No providers configured, deferring message");
            return Err(DispatchError::NoProviders);
        }

        let mut attempts = 0;
        let mut last = None;

        for provider in candidates {
            let name = provider.name().to_string();
            let mut tries = 0;

            loop {
                tries += 1;
                attempts += 1;

                let outcome = tokio::time::timeout(self.send_timeout, provider.send(&message))
                    .await
                    .unwrap_or(Err(ProviderError::Timeout));

                match outcome {
                    Ok(result) if result.accepted => {
                        internal!(
                            level = INFO,
                            provider = %name,
                            message_id = result.message_id.as_deref().unwrap_or("-"),
                            attempts,
                            "Message accepted"
                        );

                        return Ok(Delivery {
                            provider: name,
                            message_id: result.message_id,
                            attempts,
                        });
                    }
                    Ok(result) => {
                        let detail = result
                            .error_detail
                            .unwrap_or_else(|| String::from("rejected without detail"));
                        internal!(
                            level = WARN,
                            provider = %name,
                            %detail,
                            "Provider rejected message"
                        );
                        last = Some((name.clone(), Failure::Rejected(detail)));
                        break;
                    }
                    Err(err) => {
                        internal!(
                            level = WARN,
                            provider = %name,
                            error = %err,
                            attempt = tries,
                            "Send attempt failed"
                        );
                        last = Some((name.clone(), Failure::from(&err)));

                        if !(err.is_retryable() && self.retry.should_retry(tries)) {
                            break;
                        }

                        tokio::time::sleep(self.retry.backoff()).await;
                    }
                }
            }
        }

        Err(match last {
            Some((provider, Failure::Rejected(detail))) => {
                DispatchError::Rejected { provider, detail }
            }
            Some((provider, Failure::Transient(detail))) => {
                DispatchError::Transient { provider, detail }
            }
            None => DispatchError::NoProviders,
        })
    }
}

fn validate(message: &EmailMessage) -> Result<(), DispatchError> {
    if message.to.is_empty() {
        return Err(DispatchError::Invalid(String::from("no recipients")));
    }

    if !message.has_body() {
        return Err(DispatchError::Invalid(String::from("no text or html body")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Arc, Mutex,
            atomic::{AtomicU32, Ordering},
        },
        time::Duration,
    };

    use ahash::AHashMap;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use smtp2api_common::{
        address::Address, envelope::Envelope, message::EmailMessage, status::Status,
    };

    use super::DispatchCoordinator;
    use crate::{
        error::{DispatchError, ProviderError},
        policy::RetryPolicy,
        provider::{ProviderClient, ProviderResult},
        registry::{ProviderRegistry, Selection},
    };

    type Outcome = Result<ProviderResult, ProviderError>;

    /// Replays a fixed list of outcomes, repeating the last one
    struct Scripted {
        name: &'static str,
        outcomes: Mutex<VecDeque<fn() -> Outcome>>,
        delay: Option<Duration>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(name: &'static str, outcomes: &[fn() -> Outcome]) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                delay: None,
                calls: AtomicU32::new(0),
            })
        }

        fn slow(name: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcomes: Mutex::new(VecDeque::from([accepted as fn() -> Outcome])),
                delay: Some(delay),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderClient for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn send(&self, _: &EmailMessage) -> Outcome {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let next = {
                let mut outcomes = self.outcomes.lock().unwrap();
                if outcomes.len() > 1 {
                    outcomes.pop_front().unwrap()
                } else {
                    *outcomes.front().unwrap()
                }
            };
            next()
        }
    }

    fn accepted() -> Outcome {
        Ok(ProviderResult::accepted(Some(String::from("id-1"))))
    }

    fn rejected() -> Outcome {
        Ok(ProviderResult::rejected("mailbox unavailable"))
    }

    fn transport() -> Outcome {
        Err(ProviderError::Transport(String::from("connection reset")))
    }

    fn unauthorized() -> Outcome {
        Err(ProviderError::Authentication { status: 401 })
    }

    fn bad_request() -> Outcome {
        Err(ProviderError::Rejected {
            status: 400,
            detail: String::from("invalid"),
        })
    }

    fn message() -> EmailMessage {
        EmailMessage {
            from: Address::parse("a@example.com").unwrap(),
            to: vec![Address::parse("b@example.com").unwrap()],
            subject: String::from("s"),
            body_text: Some(String::from("body")),
            body_html: None,
            headers: AHashMap::new(),
            attachments: Vec::new(),
        }
    }

    fn coordinator(providers: Vec<Arc<dyn ProviderClient>>) -> DispatchCoordinator {
        DispatchCoordinator::new(
            Arc::new(ProviderRegistry::new(providers)),
            RetryPolicy {
                retries_per_provider: 1,
                backoff_ms: 100,
            },
            Duration::from_secs(5),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_fails_over() {
        let first = Scripted::new("first", &[transport]);
        let second = Scripted::new("second", &[accepted]);

        let delivery = coordinator(vec![first.clone(), second.clone()])
            .dispatch(message(), &Envelope::default())
            .await
            .unwrap();

        assert_eq!(delivery.provider, "second");
        assert_eq!(delivery.message_id.as_deref(), Some("id-1"));
        assert_eq!(delivery.attempts, 3);
        assert_eq!(first.calls(), 2);
        assert_eq!(second.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_on_same_provider() {
        let first = Scripted::new("first", &[transport, accepted]);
        let second = Scripted::new("second", &[accepted]);

        let delivery = coordinator(vec![first.clone(), second.clone()])
            .dispatch(message(), &Envelope::default())
            .await
            .unwrap();

        assert_eq!(delivery.provider, "first");
        assert_eq!(delivery.attempts, 2);
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_fails_over_without_retry() {
        let first = Scripted::new("first", &[rejected]);
        let second = Scripted::new("second", &[accepted]);

        let delivery = coordinator(vec![first.clone(), second.clone()])
            .dispatch(message(), &Envelope::default())
            .await
            .unwrap();

        assert_eq!(delivery.provider, "second");
        assert_eq!(first.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn last_rejection_is_permanent() {
        let first = Scripted::new("first", &[transport]);
        let second = Scripted::new("second", &[bad_request]);

        let err = coordinator(vec![first.clone(), second.clone()])
            .dispatch(message(), &Envelope::default())
            .await
            .unwrap_err();

        assert!(matches!(&err, DispatchError::Rejected { provider, .. } if provider == "second"));
        assert_eq!(err.status(), Status::TransactionFailed);
        assert_eq!(first.calls(), 2);
        assert_eq!(second.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn last_transport_failure_is_transient() {
        let first = Scripted::new("first", &[rejected]);
        let second = Scripted::new("second", &[transport]);

        let err = coordinator(vec![first.clone(), second.clone()])
            .dispatch(message(), &Envelope::default())
            .await
            .unwrap_err();

        assert_eq!(err.status(), Status::ActionUnavailable);
        assert_eq!(first.calls() + second.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn authentication_failure_is_not_retried() {
        let only = Scripted::new("only", &[unauthorized]);

        let err = coordinator(vec![only.clone()])
            .dispatch(message(), &Envelope::default())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Transient { .. }));
        assert_eq!(err.status(), Status::ActionUnavailable);
        assert_eq!(only.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded() {
        let providers: Vec<Arc<Scripted>> = (0..3)
            .map(|_| Scripted::new("down", &[transport]))
            .collect();

        let err = coordinator(
            providers
                .iter()
                .map(|p| Arc::clone(p) as Arc<dyn ProviderClient>)
                .collect(),
        )
        .dispatch(message(), &Envelope::default())
        .await
        .unwrap_err();

        assert!(matches!(err, DispatchError::Transient { .. }));
        let total: u32 = providers.iter().map(|p| p.calls()).sum();
        assert_eq!(total, 2 * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let slow = Scripted::slow("slow", Duration::from_secs(60));
        let fast = Scripted::new("fast", &[accepted]);

        let delivery = coordinator(vec![slow.clone(), fast.clone()])
            .dispatch(message(), &Envelope::default())
            .await
            .unwrap();

        assert_eq!(delivery.provider, "fast");
        assert_eq!(slow.calls(), 2);
    }

    #[tokio::test]
    async fn invalid_message_contacts_nobody() {
        let only = Scripted::new("only", &[accepted]);
        let coordinator = coordinator(vec![only.clone()]);

        let mut no_recipients = message();
        no_recipients.to.clear();
        let err = coordinator
            .dispatch(no_recipients, &Envelope::default())
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::Invalid(String::from("no recipients")));
        assert_eq!(err.status(), Status::TransactionFailed);

        let mut no_body = message();
        no_body.body_text = None;
        assert!(matches!(
            coordinator.dispatch(no_body, &Envelope::default()).await,
            Err(DispatchError::Invalid(_))
        ));

        assert_eq!(only.calls(), 0);
    }

    #[tokio::test]
    async fn empty_registry_defers() {
        let err = coordinator(Vec::new())
            .dispatch(message(), &Envelope::default())
            .await
            .unwrap_err();

        assert_eq!(err, DispatchError::NoProviders);
        assert_eq!(err.status(), Status::ActionUnavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn round_robin_spreads_primaries() {
        let a = Scripted::new("a", &[accepted]);
        let b = Scripted::new("b", &[accepted]);
        let coordinator = DispatchCoordinator::new(
            Arc::new(
                ProviderRegistry::new(vec![a.clone(), b.clone()])
                    .with_selection(Selection::RoundRobin),
            ),
            RetryPolicy::default(),
            Duration::from_secs(5),
        );

        for _ in 0..4 {
            coordinator
                .dispatch(message(), &Envelope::default())
                .await
                .unwrap();
        }

        assert_eq!(a.calls(), 2);
        assert_eq!(b.calls(), 2);
    }
}
