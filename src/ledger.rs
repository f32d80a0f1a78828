//! Ledger seam for dispatch attempts and aggregate statistics.
//!
//! The persistent store of attempts lives outside this core. The gateway
//! notifies it of every outcome and answers status/stats lookups through it,
//! but a ledger failure is never allowed to fail the primary response; the
//! service layer logs and continues.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the message content was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendKind {
    Text,
    Html,
    Template,
    Bulk,
    Attachment,
}

/// Final status of one recorded attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Sent,
    Failed,
}

/// One dispatch attempt as reported to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    /// Internal message identifier, the stable lookup key.
    pub message_id: String,
    /// Credential that authorized the send, if any.
    pub credential_id: Option<String>,
    /// Recipient address.
    pub recipient: String,
    /// Subject line as sent.
    pub subject: String,
    /// Content kind.
    pub kind: SendKind,
    /// Template used, for templated sends.
    pub template_id: Option<String>,
    /// Outcome.
    pub status: AttemptStatus,
    /// Error text for failed attempts.
    pub error: Option<String>,
    /// When the attempt happened.
    pub sent_at: DateTime<Utc>,
}

/// Aggregate statistics over a period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub sent: u64,
    pub delivered: u64,
    pub bounced: u64,
    pub opened: u64,
    pub clicked: u64,
    pub complained: u64,
}

/// Errors surfaced by a ledger implementation.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The backing store could not be reached.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

/// The persistent attempt-log collaborator.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Record one dispatch attempt.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the record could not be written. The
    /// service layer treats this as non-critical.
    async fn record_attempt(&self, record: AttemptRecord) -> Result<(), LedgerError>;

    /// Look up an attempt by internal message id.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the store could not be queried.
    async fn find_attempt(&self, message_id: &str) -> Result<Option<AttemptRecord>, LedgerError>;

    /// Add `by` to the cumulative send counter of a credential.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the counter could not be updated. The
    /// service layer treats this as non-critical.
    async fn increment_credential_usage(
        &self,
        credential_id: &str,
        by: u64,
    ) -> Result<(), LedgerError>;

    /// Aggregate statistics, optionally scoped to one credential, over the
    /// last `period_days` days.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the store could not be queried.
    async fn stats(
        &self,
        credential_id: Option<&str>,
        period_days: u32,
    ) -> Result<DispatchStats, LedgerError>;
}

/// In-memory ledger used by tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    attempts: DashMap<String, AttemptRecord>,
    usage: DashMap<String, u64>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded attempts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    /// `true` if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Cumulative usage counter for a credential.
    #[must_use]
    pub fn usage(&self, credential_id: &str) -> u64 {
        self.usage.get(credential_id).map_or(0, |count| *count)
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn record_attempt(&self, record: AttemptRecord) -> Result<(), LedgerError> {
        self.attempts.insert(record.message_id.clone(), record);
        Ok(())
    }

    async fn find_attempt(&self, message_id: &str) -> Result<Option<AttemptRecord>, LedgerError> {
        Ok(self
            .attempts
            .get(message_id)
            .map(|entry| entry.value().clone()))
    }

    async fn increment_credential_usage(
        &self,
        credential_id: &str,
        by: u64,
    ) -> Result<(), LedgerError> {
        *self.usage.entry(credential_id.to_string()).or_insert(0) += by;
        Ok(())
    }

    async fn stats(
        &self,
        credential_id: Option<&str>,
        period_days: u32,
    ) -> Result<DispatchStats, LedgerError> {
        let since = Utc::now() - Duration::days(i64::from(period_days));
        let mut stats = DispatchStats::default();

        for entry in &self.attempts {
            let record = entry.value();
            if record.sent_at < since {
                continue;
            }
            if let Some(id) = credential_id
                && record.credential_id.as_deref() != Some(id)
            {
                continue;
            }

            stats.sent += 1;
            match record.status {
                AttemptStatus::Sent => stats.delivered += 1,
                AttemptStatus::Failed => stats.bounced += 1,
            }
        }

        Ok(stats)
    }
}
