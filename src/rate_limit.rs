//! Fixed-window request budgeting.
//!
//! Two independent budgets share the same windowing algorithm: a global one
//! covering all traffic, and a per-credential one whose maximum comes from
//! the credential's override when present. Each scope key owns a window
//! counter; the window rollover and the increment happen under one per-key
//! lock, so concurrent requests against the same key can never lose an
//! increment or observe a half-reset window.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::{auth::Credential, error::RateLimitError};

/// Scope key used for the global budget.
pub const GLOBAL_SCOPE: &str = "global";

/// Configuration for request budgeting.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Window duration in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Requests allowed per window across all callers.
    #[serde(default = "default_global_max")]
    pub global_max: u32,

    /// Requests allowed per window for one credential, unless the credential
    /// carries an override.
    #[serde(default = "default_per_credential_max")]
    pub per_credential_max: u32,
}

const fn default_window_secs() -> u64 {
    60
}

const fn default_global_max() -> u32 {
    1000
}

const fn default_per_credential_max() -> u32 {
    100
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            global_max: default_global_max(),
            per_credential_max: default_per_credential_max(),
        }
    }
}

/// Counter state for one scope key.
#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window counters keyed by scope.
///
/// Windows are created lazily on first use of a key and logically expire
/// once their duration has passed; the next request through an expired
/// window resets it atomically.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    windows: DashMap<String, Mutex<Window>>,
    window: Duration,
}

impl FixedWindowLimiter {
    /// Create a limiter with the given window duration.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            window,
        }
    }

    /// Count one request against `key` with budget `max`.
    ///
    /// Returns the post-increment count when within budget.
    ///
    /// # Errors
    ///
    /// Returns the remaining window time when the post-increment count
    /// exceeds `max`.
    pub fn check(&self, key: &str, max: u32) -> Result<u32, Duration> {
        let entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| {
                Mutex::new(Window {
                    started: Instant::now(),
                    count: 0,
                })
            });

        let mut window = entry.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(window.started);

        if elapsed >= self.window {
            window.started = now;
            window.count = 0;
        }

        window.count += 1;
        if window.count > max {
            let remaining = self.window.saturating_sub(now.duration_since(window.started));
            drop(window);
            tracing::debug!(
                scope = %key,
                limit = max,
                retry_after_secs = remaining.as_secs(),
                "Rate limit exceeded"
            );
            Err(remaining)
        } else {
            Ok(window.count)
        }
    }

    /// Current counter value for a key, without counting a request.
    ///
    /// Intended for monitoring; returns 0 for keys never seen.
    #[must_use]
    pub fn current_count(&self, key: &str) -> u32 {
        self.windows.get(key).map_or(0, |entry| entry.lock().count)
    }
}

/// The gateway's two budgets behind one check.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    global: FixedWindowLimiter,
    per_credential: FixedWindowLimiter,
}

impl RateLimiter {
    /// Create a limiter pair from configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        let window = Duration::from_secs(config.window_secs);
        Self {
            config,
            global: FixedWindowLimiter::new(window),
            per_credential: FixedWindowLimiter::new(window),
        }
    }

    /// Count one request against the global budget.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::GlobalExceeded`] with a retry-after hint.
    pub fn check_global(&self) -> Result<(), RateLimitError> {
        self.global
            .check(GLOBAL_SCOPE, self.config.global_max)
            .map(drop)
            .map_err(|remaining| RateLimitError::GlobalExceeded {
                retry_after_secs: retry_after_secs(remaining),
                limit: self.config.global_max,
            })
    }

    /// Count one request against a credential's budget, honoring its
    /// override when present.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::PerCredentialExceeded`] with a retry-after
    /// hint.
    pub fn check_credential(&self, credential: &Credential) -> Result<(), RateLimitError> {
        let max = credential
            .rate_limit_override
            .unwrap_or(self.config.per_credential_max);

        self.per_credential
            .check(&credential.id, max)
            .map(drop)
            .map_err(|remaining| RateLimitError::PerCredentialExceeded {
                retry_after_secs: retry_after_secs(remaining),
                limit: max,
            })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

/// Remaining window time rounded up to whole seconds, at least 1.
fn retry_after_secs(remaining: Duration) -> u64 {
    let secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 { secs + 1 } else { secs.max(1) }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn credential(id: &str, rate_limit_override: Option<u32>) -> Credential {
        Credential {
            id: id.to_string(),
            name: "test".to_string(),
            secret_hash: String::new(),
            key_prefix: String::new(),
            allowed_ips: None,
            rate_limit_override,
            is_active: true,
            total_sent: 0,
            created_at: chrono::Utc::now(),
            last_used_at: None,
        }
    }

    #[test]
    fn test_rejects_exactly_the_request_over_budget() {
        let limiter = FixedWindowLimiter::new(Duration::from_secs(60));

        for i in 1..=5 {
            assert_eq!(limiter.check("key", 5), Ok(i));
        }
        assert!(limiter.check("key", 5).is_err());
    }

    #[test]
    fn test_window_reset_restarts_counter() {
        let limiter = FixedWindowLimiter::new(Duration::from_millis(50));

        for _ in 0..3 {
            limiter.check("key", 3).unwrap();
        }
        assert!(limiter.check("key", 3).is_err());

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(limiter.check("key", 3), Ok(1));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = FixedWindowLimiter::new(Duration::from_secs(60));

        for _ in 0..3 {
            limiter.check("a", 3).unwrap();
        }
        assert!(limiter.check("a", 3).is_err());
        assert_eq!(limiter.check("b", 3), Ok(1));
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(3)), 3);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }

    #[test]
    fn test_credential_override_takes_precedence() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window_secs: 60,
            global_max: 1000,
            per_credential_max: 2,
        });

        let boosted = credential("cred_boosted", Some(4));
        for _ in 0..4 {
            limiter.check_credential(&boosted).unwrap();
        }
        let err = limiter.check_credential(&boosted).unwrap_err();
        assert_eq!(err.limit(), 4);

        let plain = credential("cred_plain", None);
        for _ in 0..2 {
            limiter.check_credential(&plain).unwrap();
        }
        let err = limiter.check_credential(&plain).unwrap_err();
        assert_eq!(err.limit(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_increments_are_not_lost() {
        let limiter = Arc::new(FixedWindowLimiter::new(Duration::from_secs(300)));

        let mut handles = Vec::with_capacity(1000);
        for _ in 0..1000 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                let _ = limiter.check("shared", u32::MAX);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(limiter.current_count("shared"), 1000);
    }
}
