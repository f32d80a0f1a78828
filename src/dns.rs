//! DNS mail-exchange lookups for address validation.
//!
//! The validator only needs one answer per domain: does it publish MX
//! records? Every resolution failure (timeout, NXDOMAIN, empty answer,
//! resolver trouble) collapses uniformly to "no MX records" and is never
//! surfaced as a hard error to the caller.
//!
//! Results are cached in a lock-free `DashMap` with a fixed TTL so repeated
//! validations of the same domain do not hammer the resolver.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use hickory_resolver::{
    TokioResolver,
    config::ResolverOpts,
    name_server::TokioConnectionProvider,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while setting up the resolver.
#[derive(Debug, Error)]
pub enum DnsError {
    /// The system DNS configuration could not be loaded.
    #[error("Failed to initialise DNS resolver: {0}")]
    ResolverInit(#[from] hickory_resolver::ResolveError),
}

/// Configuration for MX resolution.
#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    /// DNS query timeout in seconds (default: 5).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How long to cache an MX answer, positive or negative (default: 300).
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    5
}

const fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Seam between the validator and DNS, so tests can answer MX questions
/// without the network.
#[async_trait]
pub trait MxLookup: Send + Sync {
    /// `true` if the domain publishes at least one MX record.
    async fn has_mx(&self, domain: &str) -> bool;
}

#[derive(Debug, Clone, Copy)]
struct CachedAnswer {
    present: bool,
    expires_at: Instant,
}

/// MX resolver with concurrent caching.
#[derive(Debug)]
pub struct MxResolver {
    resolver: TokioResolver,
    cache: DashMap<String, CachedAnswer>,
    config: DnsConfig,
}

impl MxResolver {
    /// Create a resolver with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn new() -> Result<Self, DnsError> {
        Self::with_config(DnsConfig::default())
    }

    /// Create a resolver with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the resolver cannot be initialized.
    pub fn with_config(config: DnsConfig) -> Result<Self, DnsError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(config.timeout_secs);

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(opts)
            .build();

        Ok(Self {
            resolver,
            cache: DashMap::new(),
            config,
        })
    }

    /// Answer the MX question for a domain, consulting the cache first.
    pub async fn mx_present(&self, domain: &str) -> bool {
        let key = domain.to_lowercase();

        if let Some(cached) = self.cache.get(&key) {
            if cached.expires_at > Instant::now() {
                return cached.present;
            }
            debug!("MX cache entry expired for {key}");
        }

        let present = match self.resolver.mx_lookup(key.as_str()).await {
            Ok(lookup) => lookup.iter().next().is_some(),
            Err(err) => {
                // Uniform failure rule: anything short of an answer means no MX
                debug!("MX lookup failed for {key}: {err}");
                false
            }
        };

        self.cache.insert(
            key,
            CachedAnswer {
                present,
                expires_at: Instant::now() + Duration::from_secs(self.config.cache_ttl_secs),
            },
        );

        present
    }
}

#[async_trait]
impl MxLookup for MxResolver {
    async fn has_mx(&self, domain: &str) -> bool {
        self.mx_present(domain).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "Requires network access"]
    async fn test_mx_lookup_gmail() {
        let resolver = MxResolver::new().unwrap();
        assert!(resolver.mx_present("gmail.com").await);
    }

    #[tokio::test]
    #[ignore = "Requires network access"]
    async fn test_nonexistent_domain_has_no_mx() {
        let resolver = MxResolver::new().unwrap();
        assert!(
            !resolver
                .mx_present("this-domain-definitely-does-not-exist-12345.com")
                .await
        );
    }
}
