//! Outbound email dispatch gateway core.
//!
//! This crate provides the authorization and bulk-send pipeline for a
//! multi-tenant email gateway:
//! - Credential validation against a hashed-secret registry
//! - Fixed-window rate limiting, global and per credential
//! - Suppression-list filtering of bounced/complained addresses
//! - Template resolution with cached compilation
//! - A dispatch engine fanning bulk sends out with bounded concurrency
//! - Multi-stage deliverability scoring with MX verification
//!
//! The HTTP routing layer, the persistent attempt ledger, and the actual
//! mail transport are collaborators behind traits ([`Ledger`],
//! [`Transport`], [`MxLookup`]); the [`Gateway`] service type wires the
//! pipeline together for the routing layer to drive.

mod auth;
mod dispatch;
mod dns;
mod error;
mod ledger;
mod rate_limit;
mod request;
mod service;
mod suppression;
mod template;
mod transport;
mod validate;

pub use auth::{Credential, CredentialStore};
pub use dispatch::{
    BulkOutcome, DispatchConfig, DispatchRequest, Dispatcher, RecipientOutcome, SendOutcome,
    SendStatus,
};
pub use dns::{DnsConfig, DnsError, MxLookup, MxResolver};
pub use error::{
    AuthError, FieldError, GatewayError, RateLimitError, RequestError, SuppressionError,
};
pub use ledger::{
    AttemptRecord, AttemptStatus, DispatchStats, Ledger, LedgerError, MemoryLedger, SendKind,
};
pub use rate_limit::{FixedWindowLimiter, GLOBAL_SCOPE, RateLimitConfig, RateLimiter};
pub use request::{
    AttachmentPayload, BulkRecipient, ContentKind, InboundRequest, MAX_BULK_RECIPIENTS,
    MAX_SUBJECT_LEN, SendAttachmentRequest, SendBulkRequest, SendHtmlRequest, SendRequest,
    SendTemplateRequest, ValidateRequest,
};
pub use service::{BulkSendResponse, Gateway, GatewayConfig, SendResponse};
pub use suppression::{Partitioned, SuppressionEntry, SuppressionList, SuppressionReason};
pub use template::{RenderedTemplate, TemplateInfo, TemplateRegistry};
pub use transport::{
    Attachment, MailBody, Transport, TransportError, TransportMail, TransportReceipt,
};
pub use validate::{Validator, ValidationResult, is_disposable_domain, quick_validate};
