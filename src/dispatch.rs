//! The dispatch engine: single and bulk sends with bounded concurrency.
//!
//! Bulk dispatch partitions the recipient list into fixed-width groups and
//! processes the groups strictly in sequence; inside a group every send is
//! issued concurrently and the whole group is awaited before the next one
//! starts. In-flight sends against the transport provider are therefore
//! bounded by the group width while per-send latency still overlaps.
//!
//! Transport failures never abort a batch. Every failure is caught per
//! recipient and folded into a structured result; the engine itself has no
//! error path for expected per-recipient failures.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use hex::encode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{sync::Arc, time::Duration};
use ulid::Ulid;

use crate::transport::{
    Attachment, MailBody, Transport, TransportError, TransportMail, TransportReceipt,
};

/// Configuration for the dispatch engine.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Number of sends issued concurrently inside one bulk group.
    #[serde(default = "default_group_width")]
    pub group_width: usize,

    /// Per-send timeout in seconds. Expiry is a per-recipient failure,
    /// never a batch abort. `None` defers to whatever the provider enforces.
    #[serde(default)]
    pub send_timeout_secs: Option<u64>,
}

const fn default_group_width() -> usize {
    10
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            group_width: default_group_width(),
            send_timeout_secs: None,
        }
    }
}

/// Outcome status of one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendStatus {
    Sent,
    Failed,
}

/// A single-send request handed to the engine, already past authorization,
/// throttling and suppression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub reply_to: Option<String>,
    pub subject: String,
    pub body: MailBody,
    pub attachments: Vec<Attachment>,
}

impl DispatchRequest {
    /// A plain request to a single recipient, no copies or attachments.
    #[must_use]
    pub fn to_one(recipient: impl Into<String>, subject: impl Into<String>, body: MailBody) -> Self {
        Self {
            to: vec![recipient.into()],
            cc: Vec::new(),
            bcc: Vec::new(),
            reply_to: None,
            subject: subject.into(),
            body,
            attachments: Vec::new(),
        }
    }
}

/// Result of a single send.
///
/// The internal id is generated locally, independent of whatever identifier
/// the provider returns, so status lookups stay stable even if the provider
/// changes. The provider's own id is carried alongside when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub status: SendStatus,
    pub internal_id: String,
    pub transport_id: Option<String>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SendOutcome {
    /// `true` if the provider accepted the message.
    #[must_use]
    pub const fn accepted(&self) -> bool {
        matches!(self.status, SendStatus::Sent)
    }
}

/// Per-recipient result of one bulk call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientOutcome {
    pub email: String,
    pub message_id: String,
    pub status: SendStatus,
    pub error: Option<String>,
}

/// Aggregate result of one bulk call.
///
/// `sent + failed` always equals the number of recipients submitted to the
/// engine; results follow submission order, not completion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub batch_id: String,
    pub sent: usize,
    pub failed: usize,
    pub results: Vec<RecipientOutcome>,
}

fn generate_message_id() -> String {
    format!("msg_{}", Ulid::new())
}

fn generate_batch_id() -> String {
    format!("batch_{}", Ulid::new())
}

/// Deterministic per-recipient identifier for outcomes lacking a
/// transport-assigned id: derived from the batch id and the address alone,
/// so replays and logs agree on it.
fn fallback_message_id(batch_id: &str, email: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(batch_id.as_bytes());
    hasher.update(b":");
    hasher.update(email.as_bytes());
    let digest = encode(hasher.finalize());
    format!("msg_{}", &digest[..12])
}

/// Concurrency-bounded send engine over the transport seam.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    config: DispatchConfig,
    from: String,
}

impl Dispatcher {
    /// Create an engine sending through `transport` with `from` as the
    /// formatted source address.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: DispatchConfig, from: String) -> Self {
        Self {
            transport,
            config,
            from,
        }
    }

    async fn deliver(&self, mail: &TransportMail) -> Result<TransportReceipt, TransportError> {
        match self.config.send_timeout_secs {
            Some(secs) => tokio::time::timeout(
                Duration::from_secs(secs),
                self.transport.deliver(mail),
            )
            .await
            .unwrap_or_else(|_| Err(TransportError::Timeout(secs))),
            None => self.transport.deliver(mail).await,
        }
    }

    /// Execute one send.
    ///
    /// Always resolves to a structured outcome; a transport failure becomes
    /// a rejected outcome carrying the provider's error text.
    pub async fn send(&self, request: &DispatchRequest) -> SendOutcome {
        let internal_id = generate_message_id();
        let mail = TransportMail {
            from: self.from.clone(),
            to: request.to.clone(),
            cc: request.cc.clone(),
            bcc: request.bcc.clone(),
            reply_to: request.reply_to.clone(),
            subject: request.subject.clone(),
            body: request.body.clone(),
            attachments: request.attachments.clone(),
        };

        match self.deliver(&mail).await {
            Ok(receipt) => {
                tracing::debug!(
                    message_id = %internal_id,
                    recipients = request.to.len(),
                    "Transport accepted message"
                );
                SendOutcome {
                    status: SendStatus::Sent,
                    internal_id,
                    transport_id: receipt.provider_id,
                    error: None,
                    timestamp: Utc::now(),
                }
            }
            Err(error) => {
                tracing::warn!(
                    message_id = %internal_id,
                    error = %error,
                    "Transport rejected message"
                );
                SendOutcome {
                    status: SendStatus::Failed,
                    internal_id,
                    transport_id: None,
                    error: Some(error.to_string()),
                    timestamp: Utc::now(),
                }
            }
        }
    }

    /// Execute a bulk send to `recipients`, all sharing `subject` and
    /// `body`.
    ///
    /// Groups of [`DispatchConfig::group_width`] recipients are processed
    /// strictly in sequence; within a group all sends run concurrently and
    /// the group is awaited as a whole. One batch id is generated per call.
    pub async fn send_bulk(
        &self,
        recipients: &[String],
        subject: &str,
        body: &MailBody,
    ) -> BulkOutcome {
        let batch_id = generate_batch_id();
        let width = self.config.group_width.max(1);
        let mut results = Vec::with_capacity(recipients.len());

        for group in recipients.chunks(width) {
            let outcomes = join_all(
                group
                    .iter()
                    .map(|email| self.send_to_recipient(&batch_id, email, subject, body)),
            )
            .await;
            results.extend(outcomes);
        }

        let sent = results
            .iter()
            .filter(|r| r.status == SendStatus::Sent)
            .count();
        let failed = results.len() - sent;

        tracing::info!(
            batch_id = %batch_id,
            recipients = recipients.len(),
            sent,
            failed,
            "Bulk dispatch complete"
        );

        BulkOutcome {
            batch_id,
            sent,
            failed,
            results,
        }
    }

    async fn send_to_recipient(
        &self,
        batch_id: &str,
        email: &str,
        subject: &str,
        body: &MailBody,
    ) -> RecipientOutcome {
        let mail = TransportMail {
            from: self.from.clone(),
            to: vec![email.to_string()],
            cc: Vec::new(),
            bcc: Vec::new(),
            reply_to: None,
            subject: subject.to_string(),
            body: body.clone(),
            attachments: Vec::new(),
        };

        match self.deliver(&mail).await {
            Ok(receipt) => RecipientOutcome {
                email: email.to_string(),
                message_id: receipt
                    .provider_id
                    .unwrap_or_else(|| fallback_message_id(batch_id, email)),
                status: SendStatus::Sent,
                error: None,
            },
            Err(error) => RecipientOutcome {
                email: email.to_string(),
                message_id: fallback_message_id(batch_id, email),
                status: SendStatus::Failed,
                error: Some(error.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// Transport double failing a fixed set of addresses, tracking how many
    /// deliveries are in flight at once.
    struct ScriptedTransport {
        fail: Vec<String>,
        delay: Option<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delivered: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(fail: &[&str], delay: Option<Duration>) -> Self {
            Self {
                fail: fail.iter().map(ToString::to_string).collect(),
                delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                delivered: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn deliver(&self, mail: &TransportMail) -> Result<TransportReceipt, TransportError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.delivered.fetch_add(1, Ordering::SeqCst);

            if mail.to.iter().any(|to| self.fail.contains(to)) {
                Err(TransportError::Rejected("mailbox unavailable".to_string()))
            } else {
                Ok(TransportReceipt::default())
            }
        }
    }

    fn dispatcher(transport: Arc<ScriptedTransport>, width: usize) -> Dispatcher {
        Dispatcher::new(
            transport,
            DispatchConfig {
                group_width: width,
                send_timeout_secs: None,
            },
            "Postern <noreply@example.com>".to_string(),
        )
    }

    fn recipients(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("user{i}@example.com")).collect()
    }

    #[tokio::test]
    async fn test_single_send_outcomes() {
        let transport = Arc::new(ScriptedTransport::new(&["bad@example.com"], None));
        let engine = dispatcher(Arc::clone(&transport), 10);

        let ok = engine
            .send(&DispatchRequest::to_one(
                "good@example.com",
                "Hello",
                MailBody::Text("Hi".to_string()),
            ))
            .await;
        assert!(ok.accepted());
        assert!(ok.internal_id.starts_with("msg_"));
        assert!(ok.error.is_none());

        let failed = engine
            .send(&DispatchRequest::to_one(
                "bad@example.com",
                "Hello",
                MailBody::Text("Hi".to_string()),
            ))
            .await;
        assert_eq!(failed.status, SendStatus::Failed);
        assert!(failed.error.as_deref().unwrap().contains("mailbox unavailable"));
        // The engine still mints an internal id for failed sends
        assert!(failed.internal_id.starts_with("msg_"));
    }

    #[tokio::test]
    async fn test_bulk_accounting_and_order() {
        let transport = Arc::new(ScriptedTransport::new(
            &["user3@example.com", "user7@example.com"],
            None,
        ));
        let engine = dispatcher(Arc::clone(&transport), 4);

        let all = recipients(10);
        let outcome = engine
            .send_bulk(&all, "Hello", &MailBody::Text("Hi".to_string()))
            .await;

        assert_eq!(outcome.sent + outcome.failed, all.len());
        assert_eq!(outcome.sent, 8);
        assert_eq!(outcome.failed, 2);

        // Results follow submission order and cover every recipient once
        let emails: Vec<&str> = outcome.results.iter().map(|r| r.email.as_str()).collect();
        assert_eq!(emails, all.iter().map(String::as_str).collect::<Vec<_>>());

        for result in &outcome.results {
            let failed = result.email == "user3@example.com" || result.email == "user7@example.com";
            assert_eq!(result.status == SendStatus::Failed, failed);
            assert_eq!(result.error.is_some(), failed);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bulk_concurrency_is_bounded_by_group_width() {
        let transport = Arc::new(ScriptedTransport::new(
            &[],
            Some(Duration::from_millis(20)),
        ));
        let engine = dispatcher(Arc::clone(&transport), 3);

        let outcome = engine
            .send_bulk(&recipients(9), "Hello", &MailBody::Text("Hi".to_string()))
            .await;

        assert_eq!(outcome.sent, 9);
        assert_eq!(transport.delivered.load(Ordering::SeqCst), 9);
        let max = transport.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 3, "observed {max} concurrent sends, expected at most 3");
        assert!(max >= 2, "sends inside a group should overlap");
    }

    #[tokio::test]
    async fn test_fallback_ids_are_deterministic_and_distinct() {
        let a = fallback_message_id("batch_X", "a@example.com");
        let b = fallback_message_id("batch_X", "b@example.com");
        let a_again = fallback_message_id("batch_X", "a@example.com");
        let other_batch = fallback_message_id("batch_Y", "a@example.com");

        assert_eq!(a, a_again);
        assert_ne!(a, b);
        assert_ne!(a, other_batch);
        assert!(a.starts_with("msg_"));
    }

    #[tokio::test]
    async fn test_provider_id_preferred_over_fallback() {
        struct WithIds;

        #[async_trait]
        impl Transport for WithIds {
            async fn deliver(
                &self,
                mail: &TransportMail,
            ) -> Result<TransportReceipt, TransportError> {
                Ok(TransportReceipt {
                    provider_id: Some(format!("ses-{}", mail.to[0])),
                })
            }
        }

        let engine = Dispatcher::new(
            Arc::new(WithIds),
            DispatchConfig::default(),
            "noreply@example.com".to_string(),
        );

        let outcome = engine
            .send_bulk(
                &["a@example.com".to_string()],
                "Hello",
                &MailBody::Text("Hi".to_string()),
            )
            .await;
        assert_eq!(outcome.results[0].message_id, "ses-a@example.com");
    }

    #[tokio::test]
    async fn test_send_timeout_is_a_per_recipient_failure() {
        struct Stuck;

        #[async_trait]
        impl Transport for Stuck {
            async fn deliver(
                &self,
                _mail: &TransportMail,
            ) -> Result<TransportReceipt, TransportError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(TransportReceipt::default())
            }
        }

        let engine = Dispatcher::new(
            Arc::new(Stuck),
            DispatchConfig {
                group_width: 10,
                send_timeout_secs: Some(1),
            },
            "noreply@example.com".to_string(),
        );

        tokio::time::pause();
        let handle = tokio::spawn(async move {
            engine
                .send_bulk(
                    &["a@example.com".to_string(), "b@example.com".to_string()],
                    "Hello",
                    &MailBody::Text("Hi".to_string()),
                )
                .await
        });
        tokio::time::advance(Duration::from_secs(2)).await;
        let outcome = handle.await.unwrap();

        assert_eq!(outcome.sent, 0);
        assert_eq!(outcome.failed, 2);
        for result in &outcome.results {
            assert!(result.error.as_deref().unwrap().contains("timed out"));
        }
    }

    #[tokio::test]
    async fn test_every_result_shares_the_batch_id() {
        let transport = Arc::new(ScriptedTransport::new(&["user1@example.com"], None));
        let engine = dispatcher(transport, 2);

        let outcome = engine
            .send_bulk(&recipients(5), "Hello", &MailBody::Text("Hi".to_string()))
            .await;

        assert!(outcome.batch_id.starts_with("batch_"));
        // Failed results derive their id from the batch id; recompute to check
        let failed = outcome
            .results
            .iter()
            .find(|r| r.status == SendStatus::Failed)
            .unwrap();
        assert_eq!(
            failed.message_id,
            fallback_message_id(&outcome.batch_id, &failed.email)
        );
    }
}
