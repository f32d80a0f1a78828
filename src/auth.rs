//! Caller authentication and the credential registry.
//!
//! Secrets are stored as SHA-256 hashes, never plaintext. An incoming secret
//! is hashed and looked up; only active credentials authenticate. A short
//! public prefix of the raw secret is retained so operators can recognise a
//! credential in logs without the secret itself.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hex::encode;
use rand::Rng;
use sha2::{Digest, Sha256};
use ulid::Ulid;

use crate::error::AuthError;

/// Length of the public prefix retained from a raw secret.
const KEY_PREFIX_LEN: usize = 12;

/// An API-key-like record authorizing a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Stable identifier, `cred_<ulid>`.
    pub id: String,
    /// Operator-facing name.
    pub name: String,
    /// SHA-256 hash of the raw secret, hex-encoded. Unique per store.
    pub secret_hash: String,
    /// First characters of the raw secret, safe to log.
    pub key_prefix: String,
    /// Allowed source IPs. `None` or empty means any source is accepted; a
    /// `"*"` entry matches any source.
    pub allowed_ips: Option<Vec<String>>,
    /// Per-credential rate limit, overriding the configured default.
    pub rate_limit_override: Option<u32>,
    /// Only active credentials authenticate. Never deleted, only flagged.
    pub is_active: bool,
    /// Cumulative number of accepted sends.
    pub total_sent: u64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    encode(hasher.finalize())
}

fn generate_secret() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    format!("pk_{}", encode(bytes))
}

/// Process-scoped credential registry, keyed by secret hash.
///
/// Provisioning itself is an administrative concern outside the dispatch
/// pipeline; the store exists here because every successful use mutates the
/// record (last-used timestamp, send counter), and deactivation must take
/// effect on the very next request.
#[derive(Debug, Default)]
pub struct CredentialStore {
    by_hash: DashMap<String, Credential>,
}

impl CredentialStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new credential, returning the record and the one-time raw
    /// secret. The raw secret is not retained.
    pub fn issue(
        &self,
        name: impl Into<String>,
        allowed_ips: Option<Vec<String>>,
        rate_limit_override: Option<u32>,
    ) -> (Credential, String) {
        let raw = generate_secret();
        let credential = Credential {
            id: format!("cred_{}", Ulid::new()),
            name: name.into(),
            secret_hash: hash_secret(&raw),
            key_prefix: raw[..KEY_PREFIX_LEN].to_string(),
            allowed_ips,
            rate_limit_override,
            is_active: true,
            total_sent: 0,
            created_at: Utc::now(),
            last_used_at: None,
        };

        self.by_hash
            .insert(credential.secret_hash.clone(), credential.clone());
        (credential, raw)
    }

    /// Authenticate a caller-presented secret against the store.
    ///
    /// On success the last-used timestamp is updated as a best-effort side
    /// effect; it can never fail the surrounding request.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingCredential`] if no secret was supplied
    /// - [`AuthError::InvalidCredential`] if the hash is unknown or the
    ///   credential is inactive
    /// - [`AuthError::IpNotAllowed`] if an allowlist is present, non-empty,
    ///   and matches neither the source IP nor a wildcard
    pub fn authenticate(
        &self,
        raw_secret: Option<&str>,
        source_ip: &str,
    ) -> Result<Credential, AuthError> {
        let raw = match raw_secret {
            Some(secret) if !secret.is_empty() => secret,
            _ => return Err(AuthError::MissingCredential),
        };

        let hash = hash_secret(raw);
        let Some(mut entry) = self.by_hash.get_mut(&hash) else {
            return Err(AuthError::InvalidCredential);
        };

        let credential = entry.value_mut();
        if !credential.is_active {
            return Err(AuthError::InvalidCredential);
        }

        if let Some(allowed) = &credential.allowed_ips
            && !allowed.is_empty()
            && !allowed.iter().any(|ip| ip == source_ip || ip == "*")
        {
            tracing::warn!(
                credential = %credential.key_prefix,
                source_ip = %source_ip,
                "Rejected request from disallowed source IP"
            );
            return Err(AuthError::IpNotAllowed(source_ip.to_string()));
        }

        credential.last_used_at = Some(Utc::now());
        Ok(credential.clone())
    }

    /// Add `by` to the cumulative send counter of a credential.
    pub fn record_sends(&self, credential_id: &str, by: u64) {
        if let Some(mut entry) = self
            .by_hash
            .iter_mut()
            .find(|entry| entry.value().id == credential_id)
        {
            entry.value_mut().total_sent += by;
        }
    }

    /// Flag a credential inactive. Returns `false` if the id is unknown.
    pub fn deactivate(&self, credential_id: &str) -> bool {
        match self
            .by_hash
            .iter_mut()
            .find(|entry| entry.value().id == credential_id)
        {
            Some(mut entry) => {
                entry.value_mut().is_active = false;
                true
            }
            None => false,
        }
    }

    /// Snapshot of all credentials, active and inactive.
    #[must_use]
    pub fn list(&self) -> Vec<Credential> {
        self.by_hash
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of credentials in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    /// `true` if no credentials have been issued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}
