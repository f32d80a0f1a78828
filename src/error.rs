//! Typed error handling for gateway operations.
//!
//! This module provides structured error types that distinguish between:
//! - Authentication failures (terminal, returned immediately)
//! - Rate limit violations (terminal, carry a retry-after hint)
//! - Payload validation failures (terminal, carry a field-path list)
//! - Suppression blocks (blocked before any send is attempted)
//!
//! Transport failures are deliberately absent here: during dispatch they are
//! scoped to the failing recipient and converted into per-recipient results,
//! never propagated as request-level errors (see [`crate::dispatch`]).

use serde::Serialize;
use thiserror::Error;

/// Authentication failures for a caller-presented secret.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No secret was supplied with the request.
    #[error("No credential supplied")]
    MissingCredential,

    /// The secret hash is unknown, or the credential has been deactivated.
    #[error("Credential is invalid or has been deactivated")]
    InvalidCredential,

    /// The credential carries an IP allowlist and the source IP matched
    /// neither a literal entry nor a wildcard entry.
    #[error("Source IP {0} is not allowed for this credential")]
    IpNotAllowed(String),
}

/// Rate limit violations. Both variants carry the remaining window time as
/// the retry-after hint and the limit that was exceeded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// The global request budget for the current window is exhausted.
    #[error("Global rate limit of {limit} requests exceeded, retry in {retry_after_secs}s")]
    GlobalExceeded { retry_after_secs: u64, limit: u32 },

    /// The per-credential budget for the current window is exhausted.
    #[error("Credential rate limit of {limit} requests exceeded, retry in {retry_after_secs}s")]
    PerCredentialExceeded { retry_after_secs: u64, limit: u32 },
}

impl RateLimitError {
    /// Seconds until the current window ends.
    #[must_use]
    pub const fn retry_after_secs(&self) -> u64 {
        match self {
            Self::GlobalExceeded {
                retry_after_secs, ..
            }
            | Self::PerCredentialExceeded {
                retry_after_secs, ..
            } => *retry_after_secs,
        }
    }

    /// The limit that was exceeded.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        match self {
            Self::GlobalExceeded { limit, .. } | Self::PerCredentialExceeded { limit, .. } => {
                *limit
            }
        }
    }
}

/// A recipient blocked by the suppression list before any send was attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SuppressionError {
    /// The recipient is on the bounce/complaint suppression list.
    #[error("Recipient {0} is on the suppression list")]
    RecipientBlocked(String),
}

/// A single failed validation check on an inbound payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Path of the offending field, e.g. `recipients[2].email`.
    pub path: String,
    /// Human-readable description of the failure.
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A malformed inbound payload, carrying one entry per failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestError {
    /// Accumulated field-path/message pairs, in field order.
    pub errors: Vec<FieldError>,
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid request payload (")?;
        for (index, error) in self.errors.iter().enumerate() {
            if index > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{error}")?;
        }
        write!(f, ")")
    }
}

impl std::error::Error for RequestError {}

impl RequestError {
    /// Create an empty accumulator.
    #[must_use]
    pub const fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Record a failed check against a field path.
    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            path: path.into(),
            message: message.into(),
        });
    }

    /// `Ok(())` if no checks failed, otherwise the accumulated error.
    ///
    /// # Errors
    ///
    /// Returns `self` if any field error was recorded.
    pub fn into_result(self) -> Result<(), Self> {
        if self.errors.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl Default for RequestError {
    fn default() -> Self {
        Self::new()
    }
}

/// Top-level gateway error type.
///
/// Everything here is terminal for the surrounding request: the routing
/// layer maps the variant to an HTTP status and a stable error code via
/// [`GatewayError::http_status`] and [`GatewayError::code`].
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Authentication failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A rate budget was exhausted.
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    /// The inbound payload failed schema validation.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// A single-send recipient was blocked by the suppression list.
    #[error(transparent)]
    Suppression(#[from] SuppressionError),

    /// The named template does not exist.
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// Unexpected internal failure, surfaced generically.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable machine-readable code for the routing layer.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Auth(AuthError::MissingCredential) => "MISSING_API_KEY",
            Self::Auth(AuthError::InvalidCredential) => "INVALID_API_KEY",
            Self::Auth(AuthError::IpNotAllowed(_)) => "IP_NOT_ALLOWED",
            Self::RateLimit(_) => "RATE_LIMIT_EXCEEDED",
            Self::Request(_) => "VALIDATION_ERROR",
            Self::Suppression(_) => "RECIPIENT_BLOCKED",
            Self::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the routing layer should answer with.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::Auth(AuthError::IpNotAllowed(_)) => 403,
            Self::Auth(_) => 401,
            Self::RateLimit(_) => 429,
            Self::Request(_) | Self::Suppression(_) => 400,
            Self::TemplateNotFound(_) => 404,
            Self::Internal(_) => 500,
        }
    }
}
