//! Gateway orchestration.
//!
//! One inbound request flows: credential validation → global budget →
//! per-credential budget → payload validation → suppression filtering →
//! template resolution → dispatch. Authentication, rate-limit and payload
//! errors are terminal and returned immediately; transport failures are
//! folded into per-recipient results by the engine and never surface here
//! as request-level errors.
//!
//! Ledger notification happens after dispatch and is best-effort: a ledger
//! failure is logged and the primary response still goes out.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    auth::{Credential, CredentialStore},
    dispatch::{DispatchConfig, DispatchRequest, Dispatcher, SendOutcome, SendStatus},
    dns::MxLookup,
    error::{GatewayError, SuppressionError},
    ledger::{AttemptRecord, AttemptStatus, DispatchStats, Ledger, SendKind},
    rate_limit::{RateLimitConfig, RateLimiter},
    request::{
        ContentKind, SendAttachmentRequest, SendBulkRequest, SendHtmlRequest, SendRequest,
        SendTemplateRequest, ValidateRequest,
    },
    suppression::SuppressionList,
    template::TemplateRegistry,
    transport::{Attachment, MailBody, Transport},
    validate::{ValidationResult, Validator},
};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Source address for all outbound mail.
    #[serde(default = "default_from_address")]
    pub from_address: String,

    /// Optional display name for the source address.
    #[serde(default)]
    pub from_name: Option<String>,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,
}

fn default_from_address() -> String {
    "noreply@example.com".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            from_address: default_from_address(),
            from_name: None,
            rate_limit: RateLimitConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Formatted source, `Name <addr>` when a display name is configured.
    #[must_use]
    pub fn formatted_from(&self) -> String {
        match &self.from_name {
            Some(name) => format!("{name} <{}>", self.from_address),
            None => self.from_address.clone(),
        }
    }
}

/// Response for the single-send operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub success: bool,
    pub message_id: String,
    pub transport_id: Option<String>,
    pub status: SendStatus,
    pub error: Option<String>,
    pub timestamp: chrono::DateTime<Utc>,
}

impl From<SendOutcome> for SendResponse {
    fn from(outcome: SendOutcome) -> Self {
        Self {
            success: outcome.accepted(),
            message_id: outcome.internal_id,
            transport_id: outcome.transport_id,
            status: outcome.status,
            error: outcome.error,
            timestamp: outcome.timestamp,
        }
    }
}

/// Response contract for bulk sends.
///
/// `failed` and `failed_emails` are caller-visible totals: they include the
/// recipients blocked by the suppression pre-pass, reported separately via
/// `blocked_from_bounce_list` so callers can tell "blocked before send"
/// from "rejected by provider".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSendResponse {
    pub success: bool,
    pub sent: usize,
    pub failed: usize,
    pub failed_emails: Vec<String>,
    pub batch_id: String,
    pub blocked_from_bounce_list: usize,
}

/// The dispatch authorization and bulk-send pipeline.
pub struct Gateway {
    config: GatewayConfig,
    credentials: Arc<CredentialStore>,
    rate_limiter: RateLimiter,
    suppression: Arc<SuppressionList>,
    templates: TemplateRegistry,
    validator: Validator,
    dispatcher: Dispatcher,
    ledger: Arc<dyn Ledger>,
}

impl Gateway {
    /// Assemble a gateway over the given collaborators. All process-scoped
    /// state (credentials, suppression list, caches, rate windows) starts
    /// empty.
    #[must_use]
    pub fn new(
        config: GatewayConfig,
        transport: Arc<dyn Transport>,
        mx: Arc<dyn MxLookup>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            transport,
            config.dispatch.clone(),
            config.formatted_from(),
        );
        let rate_limiter = RateLimiter::new(config.rate_limit.clone());

        Self {
            config,
            credentials: Arc::new(CredentialStore::new()),
            rate_limiter,
            suppression: Arc::new(SuppressionList::new()),
            templates: TemplateRegistry::new(),
            validator: Validator::new(mx),
            dispatcher,
            ledger,
        }
    }

    /// The credential registry, for the administrative surface and tests.
    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// The suppression list, fed by bounce/complaint signals.
    #[must_use]
    pub fn suppression(&self) -> &SuppressionList {
        &self.suppression
    }

    /// The template catalog.
    #[must_use]
    pub const fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Authenticate and budget one request: credential first, then the
    /// global window, then the credential's window.
    fn authorize(
        &self,
        raw_secret: Option<&str>,
        source_ip: &str,
    ) -> Result<Credential, GatewayError> {
        let credential = self.credentials.authenticate(raw_secret, source_ip)?;
        self.rate_limiter.check_global()?;
        self.rate_limiter.check_credential(&credential)?;
        Ok(credential)
    }

    /// Plain-text or HTML single send.
    ///
    /// # Errors
    ///
    /// Terminal request errors only; a transport failure is reported inside
    /// the response, not as an error.
    pub async fn handle_send(
        &self,
        raw_secret: Option<&str>,
        source_ip: &str,
        request: SendRequest,
    ) -> Result<SendResponse, GatewayError> {
        let credential = self.authorize(raw_secret, source_ip)?;
        request.validate()?;
        self.check_recipient(&request.to)?;

        let body = match request.kind {
            ContentKind::Text => MailBody::Text(request.body.clone()),
            ContentKind::Html => MailBody::Html {
                html: request.body.clone(),
                text: None,
            },
        };
        let kind = match request.kind {
            ContentKind::Text => SendKind::Text,
            ContentKind::Html => SendKind::Html,
        };

        let dispatch = DispatchRequest {
            to: vec![request.to.clone()],
            cc: request.cc.unwrap_or_default(),
            bcc: request.bcc.unwrap_or_default(),
            reply_to: request.reply_to,
            subject: request.subject.clone(),
            body,
            attachments: Vec::new(),
        };

        let outcome = self.dispatcher.send(&dispatch).await;
        self.finish_single(&credential, &outcome, &request.to, &request.subject, kind, None)
            .await;
        Ok(outcome.into())
    }

    /// HTML single send with optional text alternative.
    ///
    /// # Errors
    ///
    /// Terminal request errors only.
    pub async fn handle_send_html(
        &self,
        raw_secret: Option<&str>,
        source_ip: &str,
        request: SendHtmlRequest,
    ) -> Result<SendResponse, GatewayError> {
        let credential = self.authorize(raw_secret, source_ip)?;
        request.validate()?;
        self.check_recipient(&request.to)?;

        let dispatch = DispatchRequest {
            to: vec![request.to.clone()],
            cc: request.cc.unwrap_or_default(),
            bcc: request.bcc.unwrap_or_default(),
            reply_to: request.reply_to,
            subject: request.subject.clone(),
            body: MailBody::Html {
                html: request.html,
                text: request.text,
            },
            attachments: Vec::new(),
        };

        let outcome = self.dispatcher.send(&dispatch).await;
        self.finish_single(
            &credential,
            &outcome,
            &request.to,
            &request.subject,
            SendKind::Html,
            None,
        )
        .await;
        Ok(outcome.into())
    }

    /// Templated single send.
    ///
    /// # Errors
    ///
    /// [`GatewayError::TemplateNotFound`] for an unknown template id, plus
    /// the terminal request errors.
    pub async fn handle_send_template(
        &self,
        raw_secret: Option<&str>,
        source_ip: &str,
        request: SendTemplateRequest,
    ) -> Result<SendResponse, GatewayError> {
        let credential = self.authorize(raw_secret, source_ip)?;
        request.validate()?;
        self.check_recipient(&request.to)?;

        let Some(rendered) = self.templates.render(&request.template, &request.variables) else {
            return Err(GatewayError::TemplateNotFound(request.template));
        };

        let dispatch = DispatchRequest {
            to: vec![request.to.clone()],
            cc: request.cc.unwrap_or_default(),
            bcc: request.bcc.unwrap_or_default(),
            reply_to: request.reply_to,
            subject: rendered.subject.clone(),
            body: MailBody::Html {
                html: rendered.html,
                text: None,
            },
            attachments: Vec::new(),
        };

        let outcome = self.dispatcher.send(&dispatch).await;
        self.finish_single(
            &credential,
            &outcome,
            &request.to,
            &rendered.subject,
            SendKind::Template,
            Some(request.template),
        )
        .await;
        Ok(outcome.into())
    }

    /// Single send with attachments.
    ///
    /// # Errors
    ///
    /// Terminal request errors only.
    pub async fn handle_send_attachment(
        &self,
        raw_secret: Option<&str>,
        source_ip: &str,
        request: SendAttachmentRequest,
    ) -> Result<SendResponse, GatewayError> {
        let credential = self.authorize(raw_secret, source_ip)?;
        request.validate()?;
        self.check_recipient(&request.to)?;

        let body = match (request.html, request.body) {
            (Some(html), text) => MailBody::Html { html, text },
            (None, Some(text)) => MailBody::Text(text),
            // validate() guarantees one of html/body is present
            (None, None) => MailBody::Text(String::new()),
        };

        let dispatch = DispatchRequest {
            to: vec![request.to.clone()],
            cc: Vec::new(),
            bcc: Vec::new(),
            reply_to: request.reply_to,
            subject: request.subject.clone(),
            body,
            attachments: request
                .attachments
                .into_iter()
                .map(|attachment| Attachment {
                    filename: attachment.filename,
                    content: attachment.content,
                    content_type: attachment.content_type,
                })
                .collect(),
        };

        let outcome = self.dispatcher.send(&dispatch).await;
        self.finish_single(
            &credential,
            &outcome,
            &request.to,
            &request.subject,
            SendKind::Attachment,
            None,
        )
        .await;
        Ok(outcome.into())
    }

    /// Bulk send.
    ///
    /// The suppression pre-pass partitions the recipient list before any
    /// send is attempted; blocked addresses are added to the caller-visible
    /// failed total but never reach the transport provider. When every
    /// recipient is blocked the call still resolves with a structured
    /// response (`success: false`, nothing dispatched).
    ///
    /// # Errors
    ///
    /// [`GatewayError::TemplateNotFound`] for an unknown template id, plus
    /// the terminal request errors.
    pub async fn handle_send_bulk(
        &self,
        raw_secret: Option<&str>,
        source_ip: &str,
        request: SendBulkRequest,
    ) -> Result<BulkSendResponse, GatewayError> {
        let credential = self.authorize(raw_secret, source_ip)?;
        request.validate()?;

        let recipients: Vec<String> = request
            .recipients
            .iter()
            .map(|recipient| recipient.email.clone())
            .collect();
        let split = self.suppression.partition(&recipients);

        if split.eligible.is_empty() {
            tracing::info!(
                blocked = split.suppressed.len(),
                "Every bulk recipient is on the suppression list, nothing to dispatch"
            );
            return Ok(BulkSendResponse {
                success: false,
                sent: 0,
                failed: split.suppressed.len(),
                failed_emails: split.suppressed.clone(),
                batch_id: String::new(),
                blocked_from_bounce_list: split.suppressed.len(),
            });
        }

        // Content precedence: template, then html, then body
        let (subject, body, kind, template_id) = if let Some(template) = &request.template {
            let Some(rendered) = self.templates.render(template, &request.variables) else {
                return Err(GatewayError::TemplateNotFound(template.clone()));
            };
            (
                rendered.subject,
                MailBody::Html {
                    html: rendered.html,
                    text: None,
                },
                SendKind::Template,
                Some(template.clone()),
            )
        } else if let Some(html) = &request.html {
            (
                request.subject.clone(),
                MailBody::Html {
                    html: html.clone(),
                    text: None,
                },
                SendKind::Bulk,
                None,
            )
        } else {
            (
                request.subject.clone(),
                MailBody::Text(request.body.clone().unwrap_or_default()),
                SendKind::Bulk,
                None,
            )
        };

        let outcome = self
            .dispatcher
            .send_bulk(&split.eligible, &subject, &body)
            .await;

        for result in &outcome.results {
            let record = AttemptRecord {
                message_id: result.message_id.clone(),
                credential_id: Some(credential.id.clone()),
                recipient: result.email.clone(),
                subject: subject.clone(),
                kind,
                template_id: template_id.clone(),
                status: match result.status {
                    SendStatus::Sent => AttemptStatus::Sent,
                    SendStatus::Failed => AttemptStatus::Failed,
                },
                error: result.error.clone(),
                sent_at: Utc::now(),
            };
            if let Err(error) = self.ledger.record_attempt(record).await {
                warn!(message_id = %result.message_id, error = %error, "Failed to record bulk attempt");
            }
        }

        if outcome.sent > 0 {
            self.credentials
                .record_sends(&credential.id, outcome.sent as u64);
            if let Err(error) = self
                .ledger
                .increment_credential_usage(&credential.id, outcome.sent as u64)
                .await
            {
                warn!(credential = %credential.key_prefix, error = %error, "Failed to increment usage counter");
            }
        }

        let mut failed_emails: Vec<String> = outcome
            .results
            .iter()
            .filter(|result| result.status == SendStatus::Failed)
            .map(|result| result.email.clone())
            .collect();
        failed_emails.extend(split.suppressed.iter().cloned());

        Ok(BulkSendResponse {
            success: outcome.failed == 0,
            sent: outcome.sent,
            failed: outcome.failed + split.suppressed.len(),
            failed_emails,
            batch_id: outcome.batch_id,
            blocked_from_bounce_list: split.suppressed.len(),
        })
    }

    /// Deliverability check for one address.
    ///
    /// # Errors
    ///
    /// Terminal request errors only.
    pub async fn handle_validate(
        &self,
        raw_secret: Option<&str>,
        source_ip: &str,
        request: ValidateRequest,
    ) -> Result<ValidationResult, GatewayError> {
        self.authorize(raw_secret, source_ip)?;
        request.validate()?;
        Ok(self.validator.validate(&request.email).await)
    }

    /// Deliverability check for a list of addresses, scored concurrently.
    ///
    /// # Errors
    ///
    /// Terminal request errors only.
    pub async fn handle_validate_many(
        &self,
        raw_secret: Option<&str>,
        source_ip: &str,
        emails: &[String],
    ) -> Result<Vec<ValidationResult>, GatewayError> {
        self.authorize(raw_secret, source_ip)?;
        Ok(self.validator.validate_many(emails).await)
    }

    /// Status lookup by internal message id.
    ///
    /// # Errors
    ///
    /// Terminal request errors, or [`GatewayError::Internal`] if the ledger
    /// cannot be queried.
    pub async fn handle_status(
        &self,
        raw_secret: Option<&str>,
        source_ip: &str,
        message_id: &str,
    ) -> Result<Option<AttemptRecord>, GatewayError> {
        self.authorize(raw_secret, source_ip)?;
        self.ledger
            .find_attempt(message_id)
            .await
            .map_err(|error| GatewayError::Internal(error.to_string()))
    }

    /// Aggregate statistics over the last `period_days` days, optionally
    /// scoped to one credential.
    ///
    /// # Errors
    ///
    /// Terminal request errors, or [`GatewayError::Internal`] if the ledger
    /// cannot be queried.
    pub async fn handle_stats(
        &self,
        raw_secret: Option<&str>,
        source_ip: &str,
        credential_id: Option<&str>,
        period_days: u32,
    ) -> Result<DispatchStats, GatewayError> {
        self.authorize(raw_secret, source_ip)?;
        self.ledger
            .stats(credential_id, period_days)
            .await
            .map_err(|error| GatewayError::Internal(error.to_string()))
    }

    fn check_recipient(&self, email: &str) -> Result<(), GatewayError> {
        if self.suppression.is_suppressed(email) {
            return Err(SuppressionError::RecipientBlocked(email.to_string()).into());
        }
        Ok(())
    }

    /// Record a single-send outcome with the ledger and bump counters.
    /// Best-effort: failures are logged, never returned.
    async fn finish_single(
        &self,
        credential: &Credential,
        outcome: &SendOutcome,
        recipient: &str,
        subject: &str,
        kind: SendKind,
        template_id: Option<String>,
    ) {
        let record = AttemptRecord {
            message_id: outcome.internal_id.clone(),
            credential_id: Some(credential.id.clone()),
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            kind,
            template_id,
            status: match outcome.status {
                SendStatus::Sent => AttemptStatus::Sent,
                SendStatus::Failed => AttemptStatus::Failed,
            },
            error: outcome.error.clone(),
            sent_at: outcome.timestamp,
        };

        if let Err(error) = self.ledger.record_attempt(record).await {
            warn!(message_id = %outcome.internal_id, error = %error, "Failed to record attempt");
        }

        if outcome.accepted() {
            self.credentials.record_sends(&credential.id, 1);
            if let Err(error) = self.ledger.increment_credential_usage(&credential.id, 1).await {
                warn!(credential = %credential.key_prefix, error = %error, "Failed to increment usage counter");
            }
        }
    }
}
