//! Transport provider seam.
//!
//! The gateway never speaks a mail-transfer protocol itself; it hands fully
//! assembled messages to a managed provider behind the [`Transport`] trait.
//! Implementations are expected to be cheap to clone behind an `Arc` and safe
//! to call from many tasks at once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single file attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Filename presented to the recipient.
    pub filename: String,
    /// Base64-encoded file content.
    pub content: String,
    /// MIME content type, e.g. `application/pdf`.
    pub content_type: String,
}

/// Message body, either plain text or HTML with an optional text alternative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MailBody {
    /// Plain text body.
    Text(String),
    /// HTML body with an optional plain-text fallback.
    Html {
        html: String,
        text: Option<String>,
    },
}

/// A fully assembled message handed to the transport provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMail {
    /// Formatted source address, `Name <addr>` or bare address.
    pub from: String,
    /// Primary recipients.
    pub to: Vec<String>,
    /// Carbon-copy recipients.
    pub cc: Vec<String>,
    /// Blind-carbon-copy recipients.
    pub bcc: Vec<String>,
    /// Optional reply-to address.
    pub reply_to: Option<String>,
    /// Subject line.
    pub subject: String,
    /// Message body.
    pub body: MailBody,
    /// Attachments, empty for ordinary sends.
    pub attachments: Vec<Attachment>,
}

/// Acknowledgement returned by the provider on acceptance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportReceipt {
    /// Provider-assigned message identifier, when the provider returns one.
    pub provider_id: Option<String>,
}

/// A failed hand-off to the transport provider.
///
/// Always scoped to a single send: during bulk dispatch these are captured
/// per recipient and never abort the batch.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The provider rejected the message.
    #[error("Rejected by provider: {0}")]
    Rejected(String),

    /// The provider could not be reached or answered with a transient error.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// The configured per-send timeout elapsed before the provider answered.
    #[error("Send timed out after {0}s")]
    Timeout(u64),
}

/// The outbound transport collaborator.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand one message to the provider.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] with opaque provider error text on
    /// failure. Callers must treat the failure as scoped to this message.
    async fn deliver(&self, mail: &TransportMail) -> Result<TransportReceipt, TransportError>;
}
