//! Inbound payload schemas.
//!
//! The routing layer deserializes loosely-typed JSON into these per-operation
//! structs; `validate()` then rejects malformed payloads with an enumerated
//! field-path/message list before anything touches the dispatch pipeline.

use ahash::AHashMap;
use serde::Deserialize;
use serde_json::Value;

use crate::{error::RequestError, validate::quick_validate};

/// Longest subject line accepted (RFC 5322 line-length guidance).
pub const MAX_SUBJECT_LEN: usize = 998;

/// Largest recipient list accepted by one bulk call.
pub const MAX_BULK_RECIPIENTS: usize = 1000;

/// Content kind for a plain send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Text,
    Html,
}

fn check_email(errors: &mut RequestError, path: &str, email: &str) {
    if !quick_validate(email) {
        errors.push(path, "Invalid email address");
    }
}

fn check_optional_email(errors: &mut RequestError, path: &str, email: Option<&String>) {
    if let Some(email) = email {
        check_email(errors, path, email);
    }
}

fn check_email_list(errors: &mut RequestError, field: &str, emails: Option<&Vec<String>>) {
    if let Some(emails) = emails {
        for (index, email) in emails.iter().enumerate() {
            check_email(errors, &format!("{field}[{index}]"), email);
        }
    }
}

fn check_subject(errors: &mut RequestError, subject: &str) {
    if subject.is_empty() {
        errors.push("subject", "Subject is required");
    } else if subject.len() > MAX_SUBJECT_LEN {
        errors.push("subject", "Subject is too long");
    }
}

/// Plain-text or HTML send.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default, rename = "type")]
    pub kind: ContentKind,
    pub reply_to: Option<String>,
    pub cc: Option<Vec<String>>,
    pub bcc: Option<Vec<String>>,
}

impl SendRequest {
    /// Check the payload against the operation schema.
    ///
    /// # Errors
    ///
    /// Returns a [`RequestError`] listing every failed field check.
    pub fn validate(&self) -> Result<(), RequestError> {
        let mut errors = RequestError::new();
        check_email(&mut errors, "to", &self.to);
        check_subject(&mut errors, &self.subject);
        if self.body.is_empty() {
            errors.push("body", "Body is required");
        }
        check_optional_email(&mut errors, "replyTo", self.reply_to.as_ref());
        check_email_list(&mut errors, "cc", self.cc.as_ref());
        check_email_list(&mut errors, "bcc", self.bcc.as_ref());
        errors.into_result()
    }
}

/// HTML send with an optional plain-text alternative.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendHtmlRequest {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
    pub reply_to: Option<String>,
    pub cc: Option<Vec<String>>,
    pub bcc: Option<Vec<String>>,
}

impl SendHtmlRequest {
    /// Check the payload against the operation schema.
    ///
    /// # Errors
    ///
    /// Returns a [`RequestError`] listing every failed field check.
    pub fn validate(&self) -> Result<(), RequestError> {
        let mut errors = RequestError::new();
        check_email(&mut errors, "to", &self.to);
        check_subject(&mut errors, &self.subject);
        if self.html.is_empty() {
            errors.push("html", "HTML content is required");
        }
        check_optional_email(&mut errors, "replyTo", self.reply_to.as_ref());
        check_email_list(&mut errors, "cc", self.cc.as_ref());
        check_email_list(&mut errors, "bcc", self.bcc.as_ref());
        errors.into_result()
    }
}

/// Templated send.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTemplateRequest {
    pub to: String,
    pub template: String,
    #[serde(default)]
    pub variables: AHashMap<String, Value>,
    pub reply_to: Option<String>,
    pub cc: Option<Vec<String>>,
    pub bcc: Option<Vec<String>>,
}

impl SendTemplateRequest {
    /// Check the payload against the operation schema.
    ///
    /// # Errors
    ///
    /// Returns a [`RequestError`] listing every failed field check.
    pub fn validate(&self) -> Result<(), RequestError> {
        let mut errors = RequestError::new();
        check_email(&mut errors, "to", &self.to);
        if self.template.is_empty() {
            errors.push("template", "Template id is required");
        }
        check_optional_email(&mut errors, "replyTo", self.reply_to.as_ref());
        check_email_list(&mut errors, "cc", self.cc.as_ref());
        check_email_list(&mut errors, "bcc", self.bcc.as_ref());
        errors.into_result()
    }
}

/// One bulk recipient. Per-recipient variables are accepted for forward
/// compatibility with per-recipient rendering but are not interpolated today.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkRecipient {
    pub email: String,
    pub name: Option<String>,
    #[serde(default)]
    pub variables: AHashMap<String, Value>,
}

/// Bulk send. Content is resolved in precedence order: `template`, then
/// `html`, then `body`; at least one must be present.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBulkRequest {
    pub recipients: Vec<BulkRecipient>,
    pub subject: String,
    pub template: Option<String>,
    pub html: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub variables: AHashMap<String, Value>,
}

impl SendBulkRequest {
    /// Check the payload against the operation schema.
    ///
    /// # Errors
    ///
    /// Returns a [`RequestError`] listing every failed field check.
    pub fn validate(&self) -> Result<(), RequestError> {
        let mut errors = RequestError::new();

        if self.recipients.is_empty() {
            errors.push("recipients", "At least one recipient is required");
        } else if self.recipients.len() > MAX_BULK_RECIPIENTS {
            errors.push(
                "recipients",
                format!("At most {MAX_BULK_RECIPIENTS} recipients per call"),
            );
        }
        for (index, recipient) in self.recipients.iter().enumerate() {
            check_email(&mut errors, &format!("recipients[{index}].email"), &recipient.email);
        }

        check_subject(&mut errors, &self.subject);

        if self.template.is_none() && self.html.is_none() && self.body.is_none() {
            errors.push("body", "One of template, html or body is required");
        }

        errors.into_result()
    }
}

/// Attachment payload fields, validated before decoding.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentPayload {
    pub filename: String,
    /// Base64-encoded content.
    pub content: String,
    pub content_type: String,
}

/// Send with attachments.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAttachmentRequest {
    pub to: String,
    pub subject: String,
    pub body: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<AttachmentPayload>,
    pub reply_to: Option<String>,
}

impl SendAttachmentRequest {
    /// Check the payload against the operation schema.
    ///
    /// # Errors
    ///
    /// Returns a [`RequestError`] listing every failed field check.
    pub fn validate(&self) -> Result<(), RequestError> {
        let mut errors = RequestError::new();
        check_email(&mut errors, "to", &self.to);
        check_subject(&mut errors, &self.subject);

        if self.html.is_none() && self.body.is_none() {
            errors.push("body", "One of html or body is required");
        }

        if self.attachments.is_empty() {
            errors.push("attachments", "At least one attachment is required");
        }
        for (index, attachment) in self.attachments.iter().enumerate() {
            if attachment.filename.is_empty() {
                errors.push(format!("attachments[{index}].filename"), "Filename is required");
            }
            if attachment.content.is_empty() {
                errors.push(
                    format!("attachments[{index}].content"),
                    "Base64 content is required",
                );
            }
            if attachment.content_type.is_empty() {
                errors.push(
                    format!("attachments[{index}].contentType"),
                    "Content type is required",
                );
            }
        }

        check_optional_email(&mut errors, "replyTo", self.reply_to.as_ref());
        errors.into_result()
    }
}

/// Deliverability check for one address.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidateRequest {
    pub email: String,
}

impl ValidateRequest {
    /// Check the payload against the operation schema.
    ///
    /// Note: a syntactically broken address is still a *valid* request; the
    /// scorer reports it with score 0 rather than the schema rejecting it.
    ///
    /// # Errors
    ///
    /// Returns a [`RequestError`] if the email field is empty.
    pub fn validate(&self) -> Result<(), RequestError> {
        let mut errors = RequestError::new();
        if self.email.is_empty() {
            errors.push("email", "Email is required");
        }
        errors.into_result()
    }
}

/// The tagged set of inbound operations.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum InboundRequest {
    Send(SendRequest),
    SendHtml(SendHtmlRequest),
    SendTemplate(SendTemplateRequest),
    SendBulk(SendBulkRequest),
    SendAttachment(SendAttachmentRequest),
    Validate(ValidateRequest),
}

impl InboundRequest {
    /// Check the payload against its operation schema.
    ///
    /// # Errors
    ///
    /// Returns a [`RequestError`] listing every failed field check.
    pub fn validate(&self) -> Result<(), RequestError> {
        match self {
            Self::Send(request) => request.validate(),
            Self::SendHtml(request) => request.validate(),
            Self::SendTemplate(request) => request.validate(),
            Self::SendBulk(request) => request.validate(),
            Self::SendAttachment(request) => request.validate(),
            Self::Validate(request) => request.validate(),
        }
    }
}
