//! Suppression list for bounced and complained addresses.
//!
//! Lookups are case-insensitive exact matches against the normalized
//! (lower-cased) address. For bulk dispatch the list runs as a pre-pass over
//! the whole recipient set, so a blocked address is never handed to the
//! transport provider and can be reported distinctly from a provider
//! rejection.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Why an address was suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuppressionReason {
    /// A hard or soft bounce was reported for the address.
    Bounce,
    /// The recipient filed a complaint.
    Complaint,
    /// An operator added the address by hand.
    Manual,
}

/// One suppressed address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuppressionEntry {
    /// Normalized (lower-cased) address.
    pub email: String,
    pub reason: SuppressionReason,
    /// Provider-reported bounce classification, when known.
    pub bounce_type: Option<String>,
    /// Internal id of the message that triggered the suppression.
    pub source_message_id: Option<String>,
    pub added_at: DateTime<Utc>,
}

/// Recipient list split by the suppression pre-pass, both halves preserving
/// submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partitioned {
    pub eligible: Vec<String>,
    pub suppressed: Vec<String>,
}

/// Process-scoped suppression list.
///
/// At most one active entry exists per normalized address; re-adding an
/// address replaces its entry. Entries are removed only by explicit
/// deletion.
#[derive(Debug, Default)]
pub struct SuppressionList {
    entries: DashMap<String, SuppressionEntry>,
}

impl SuppressionList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for an address.
    pub fn add(
        &self,
        email: &str,
        reason: SuppressionReason,
        bounce_type: Option<String>,
        source_message_id: Option<String>,
    ) {
        let normalized = email.to_lowercase();
        tracing::info!(email = %normalized, reason = ?reason, "Adding address to suppression list");
        self.entries.insert(
            normalized.clone(),
            SuppressionEntry {
                email: normalized,
                reason,
                bounce_type,
                source_message_id,
                added_at: Utc::now(),
            },
        );
    }

    /// Remove an address. Returns `false` if it was not present.
    pub fn remove(&self, email: &str) -> bool {
        self.entries.remove(&email.to_lowercase()).is_some()
    }

    /// `true` if the address is currently suppressed.
    #[must_use]
    pub fn is_suppressed(&self, email: &str) -> bool {
        self.entries.contains_key(&email.to_lowercase())
    }

    /// Split a recipient list into eligible and suppressed halves.
    #[must_use]
    pub fn partition(&self, recipients: &[String]) -> Partitioned {
        let mut eligible = Vec::with_capacity(recipients.len());
        let mut suppressed = Vec::new();

        for recipient in recipients {
            if self.is_suppressed(recipient) {
                suppressed.push(recipient.clone());
            } else {
                eligible.push(recipient.clone());
            }
        }

        Partitioned {
            eligible,
            suppressed,
        }
    }

    /// Snapshot of all entries.
    #[must_use]
    pub fn list(&self) -> Vec<SuppressionEntry> {
        self.entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of suppressed addresses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing is suppressed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
