//! Multi-stage email deliverability scoring.
//!
//! Three ordered stages with a cost-avoidance short-circuit:
//!
//! 1. **Syntax**: length caps (address ≤ 254, local-part ≤ 64, domain ≤ 255)
//!    and a single-`@` address grammar. A failure here scores 0 and skips
//!    all network work.
//! 2. **Disposable domain**: case-insensitive membership in a static
//!    denylist of throwaway providers.
//! 3. **MX lookup**: asynchronous resolution through the [`MxLookup`] seam;
//!    any failure counts as "no MX records".
//!
//! Scoring: +30 syntax, +30 non-disposable, +40 MX present. An address is
//! valid when the score reaches 70 AND MX records exist AND the domain is
//! not disposable.

use std::sync::Arc;

use futures_util::future::join_all;
use phf::phf_set;
use serde::Serialize;

use crate::dns::MxLookup;

/// Known disposable/temporary email domains.
static DISPOSABLE_DOMAINS: phf::Set<&'static str> = phf_set! {
    "tempmail.com",
    "throwaway.email",
    "guerrillamail.com",
    "10minutemail.com",
    "mailinator.com",
    "tempail.com",
    "fakeinbox.com",
    "sharklasers.com",
    "guerrillamail.info",
    "grr.la",
    "guerrillamail.biz",
    "guerrillamail.de",
    "guerrillamail.net",
    "guerrillamail.org",
    "guerrillamailblock.com",
    "pokemail.net",
    "spam4.me",
    "discard.email",
    "discardmail.com",
    "spambog.com",
    "spambog.de",
    "spambog.ru",
    "tempr.email",
    "temp-mail.org",
    "temp-mail.io",
    "getnada.com",
    "getairmail.com",
    "mohmal.com",
    "yopmail.com",
    "yopmail.fr",
    "yopmail.net",
    "cool.fr.nf",
    "jetable.fr.nf",
    "nospam.ze.tc",
    "nomail.xl.cx",
    "mega.zik.dj",
    "speed.1s.fr",
    "courriel.fr.nf",
    "moncourrier.fr.nf",
    "monemail.fr.nf",
    "monmail.fr.nf",
    "mailnesia.com",
    "maildrop.cc",
    "mintemail.com",
    "trashmail.com",
    "trashmail.me",
    "trashmail.ws",
};

const MAX_ADDRESS_LEN: usize = 254;
const MAX_LOCAL_LEN: usize = 64;
const MAX_DOMAIN_LEN: usize = 255;

const SYNTAX_POINTS: u8 = 30;
const NON_DISPOSABLE_POINTS: u8 = 30;
const MX_POINTS: u8 = 40;
const VALID_THRESHOLD: u8 = 70;

/// Deliverability confidence for a single address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub email: String,
    pub valid: bool,
    pub disposable: bool,
    pub domain: String,
    pub mx_records: bool,
    /// Confidence score in `[0, 100]`.
    pub score: u8,
    /// Human-readable findings, one per failed stage in stage order, or a
    /// single affirmative entry on overall success.
    pub reasons: Vec<String>,
}

impl ValidationResult {
    fn invalid_syntax(email: &str) -> Self {
        Self {
            email: email.to_string(),
            valid: false,
            disposable: false,
            domain: String::new(),
            mx_records: false,
            score: 0,
            reasons: vec!["Invalid email syntax".to_string()],
        }
    }
}

fn is_atext(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#'
                | '$'
                | '%'
                | '&'
                | '\''
                | '*'
                | '+'
                | '/'
                | '='
                | '?'
                | '^'
                | '_'
                | '`'
                | '{'
                | '|'
                | '}'
                | '~'
                | '-'
                | '.'
        )
}

fn valid_local_part(local: &str) -> bool {
    !local.is_empty() && local.len() <= MAX_LOCAL_LEN && local.chars().all(is_atext)
}

fn valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return false;
    }

    domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}

/// Syntax-only check: length caps plus a single-`@` address grammar.
#[must_use]
pub fn quick_validate(email: &str) -> bool {
    if email.is_empty() || email.len() > MAX_ADDRESS_LEN {
        return false;
    }

    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => valid_local_part(local) && valid_domain(domain),
        _ => false,
    }
}

/// `true` if the domain is on the disposable denylist.
#[must_use]
pub fn is_disposable_domain(domain: &str) -> bool {
    DISPOSABLE_DOMAINS.contains(domain.to_lowercase().as_str())
}

/// Staged deliverability scorer.
pub struct Validator {
    mx: Arc<dyn MxLookup>,
}

impl Validator {
    /// Create a scorer answering MX questions through the given seam.
    #[must_use]
    pub fn new(mx: Arc<dyn MxLookup>) -> Self {
        Self { mx }
    }

    /// Score one address.
    ///
    /// Deterministic and network-free for syntactically invalid input: the
    /// MX stage only runs once syntax has passed.
    pub async fn validate(&self, email: &str) -> ValidationResult {
        if !quick_validate(email) {
            return ValidationResult::invalid_syntax(email);
        }

        // Syntax guarantees exactly one '@'
        let domain = email
            .rsplit('@')
            .next()
            .unwrap_or_default()
            .to_lowercase();

        let mut reasons = Vec::new();

        let disposable = is_disposable_domain(&domain);
        if disposable {
            reasons.push("Disposable or temporary email domain".to_string());
        }

        let mx_records = self.mx.has_mx(&domain).await;
        if !mx_records {
            reasons.push("Domain has no valid MX records".to_string());
        }

        let mut score = SYNTAX_POINTS;
        if !disposable {
            score += NON_DISPOSABLE_POINTS;
        }
        if mx_records {
            score += MX_POINTS;
        }

        let valid = score >= VALID_THRESHOLD && mx_records && !disposable;
        if valid {
            reasons = vec!["Address is valid and verified".to_string()];
        }

        ValidationResult {
            email: email.to_string(),
            valid,
            disposable,
            domain,
            mx_records,
            score,
            reasons,
        }
    }

    /// Score a list of addresses concurrently, preserving input order.
    pub async fn validate_many(&self, emails: &[String]) -> Vec<ValidationResult> {
        join_all(emails.iter().map(|email| self.validate(email))).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// MX seam answering from a fixed set, counting every lookup.
    struct FixedMx {
        with_mx: Vec<&'static str>,
        lookups: AtomicUsize,
    }

    impl FixedMx {
        fn new(with_mx: &[&'static str]) -> Self {
            Self {
                with_mx: with_mx.to_vec(),
                lookups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MxLookup for FixedMx {
        async fn has_mx(&self, domain: &str) -> bool {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.with_mx.contains(&domain)
        }
    }

    #[test]
    fn test_quick_validate() {
        assert!(quick_validate("user@example.com"));
        assert!(quick_validate("user.name+tag@sub.example.com"));

        assert!(!quick_validate("not-an-email"));
        assert!(!quick_validate(""));
        assert!(!quick_validate("user@@example.com"));
        assert!(!quick_validate("user@"));
        assert!(!quick_validate("@example.com"));
        assert!(!quick_validate("user@-example.com"));
        assert!(!quick_validate("user@exa mple.com"));
    }

    #[test]
    fn test_length_caps() {
        let long_local = format!("{}@example.com", "a".repeat(65));
        assert!(!quick_validate(&long_local));

        let ok_local = format!("{}@example.com", "a".repeat(64));
        assert!(quick_validate(&ok_local));

        let long_address = format!("user@{}.com", "a".repeat(250));
        assert!(!quick_validate(&long_address));
    }

    #[tokio::test]
    async fn test_invalid_syntax_skips_dns() {
        let mx = Arc::new(FixedMx::new(&["example.com"]));
        let validator = Validator::new(Arc::clone(&mx) as Arc<dyn MxLookup>);

        let result = validator.validate("not-an-email").await;
        assert!(!result.valid);
        assert!(!result.mx_records);
        assert_eq!(result.score, 0);
        assert_eq!(result.reasons, vec!["Invalid email syntax"]);
        assert_eq!(mx.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disposable_domain_never_valid() {
        // mailinator publishes MX records; disposable still disqualifies it
        let mx = Arc::new(FixedMx::new(&["mailinator.com"]));
        let validator = Validator::new(mx as Arc<dyn MxLookup>);

        let result = validator.validate("user@mailinator.com").await;
        assert!(result.disposable);
        assert!(result.mx_records);
        assert!(!result.valid);
        assert_eq!(result.score, SYNTAX_POINTS + MX_POINTS);
        assert_eq!(result.reasons, vec!["Disposable or temporary email domain"]);
    }

    #[tokio::test]
    async fn test_valid_address_collapses_reasons() {
        let mx = Arc::new(FixedMx::new(&["example.com"]));
        let validator = Validator::new(mx as Arc<dyn MxLookup>);

        let result = validator.validate("User@Example.com").await;
        assert!(result.valid);
        assert_eq!(result.domain, "example.com");
        assert_eq!(result.score, 100);
        assert_eq!(result.reasons, vec!["Address is valid and verified"]);
    }

    #[tokio::test]
    async fn test_missing_mx_accumulates_reason() {
        let mx = Arc::new(FixedMx::new(&[]));
        let validator = Validator::new(mx as Arc<dyn MxLookup>);

        let result = validator.validate("user@no-mail.example").await;
        assert!(!result.valid);
        assert!(!result.mx_records);
        assert_eq!(result.score, SYNTAX_POINTS + NON_DISPOSABLE_POINTS);
        assert_eq!(result.reasons, vec!["Domain has no valid MX records"]);
    }

    #[tokio::test]
    async fn test_validate_many_preserves_order() {
        let mx = Arc::new(FixedMx::new(&["example.com"]));
        let validator = Validator::new(mx as Arc<dyn MxLookup>);

        let emails = vec![
            "a@example.com".to_string(),
            "broken".to_string(),
            "b@example.com".to_string(),
        ];
        let results = validator.validate_many(&emails).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].email, "a@example.com");
        assert!(results[0].valid);
        assert!(!results[1].valid);
        assert!(results[2].valid);
    }
}
