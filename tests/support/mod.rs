//! Shared test doubles for the pipeline tests.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use postern::{
    Credential, Gateway, GatewayConfig, MemoryLedger, MxLookup, Transport, TransportError,
    TransportMail, TransportReceipt,
};

/// Transport double: fails a scripted set of addresses, records every
/// address handed to it, and tracks in-flight concurrency.
#[derive(Default)]
pub struct MockTransport {
    fail: Vec<String>,
    delay: Option<Duration>,
    pub seen: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new(fail: &[&str], delay: Option<Duration>) -> Self {
        Self {
            fail: fail.iter().map(ToString::to_string).collect(),
            delay,
            ..Self::default()
        }
    }

    /// Every address handed to the provider so far, in hand-off order.
    pub fn seen_addresses(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn deliver(&self, mail: &TransportMail) -> Result<TransportReceipt, TransportError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        self.seen.lock().extend(mail.to.iter().cloned());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if mail.to.iter().any(|to| self.fail.contains(to)) {
            Err(TransportError::Rejected("550 mailbox unavailable".to_string()))
        } else {
            Ok(TransportReceipt::default())
        }
    }
}

/// MX seam answering from a fixed domain set, counting lookups.
#[derive(Default)]
pub struct FixedMx {
    with_mx: Vec<String>,
    pub lookups: AtomicUsize,
}

impl FixedMx {
    pub fn new(with_mx: &[&str]) -> Self {
        Self {
            with_mx: with_mx.iter().map(ToString::to_string).collect(),
            lookups: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MxLookup for FixedMx {
    async fn has_mx(&self, domain: &str) -> bool {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.with_mx.iter().any(|d| d == domain)
    }
}

/// A fully wired gateway plus handles on its collaborators and one issued
/// credential.
pub struct TestGateway {
    pub gateway: Gateway,
    pub transport: Arc<MockTransport>,
    pub mx: Arc<FixedMx>,
    pub ledger: Arc<MemoryLedger>,
    pub credential: Credential,
    pub secret: String,
}

impl TestGateway {
    pub fn build(config: GatewayConfig, fail: &[&str], mx_domains: &[&str]) -> Self {
        Self::build_with_delay(config, fail, mx_domains, None)
    }

    pub fn build_with_delay(
        config: GatewayConfig,
        fail: &[&str],
        mx_domains: &[&str],
        delay: Option<Duration>,
    ) -> Self {
        let transport = Arc::new(MockTransport::new(fail, delay));
        let mx = Arc::new(FixedMx::new(mx_domains));
        let ledger = Arc::new(MemoryLedger::new());

        let gateway = Gateway::new(
            config,
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&mx) as Arc<dyn MxLookup>,
            Arc::clone(&ledger) as Arc<dyn postern::Ledger>,
        );
        let (credential, secret) = gateway.credentials().issue("pipeline-tests", None, None);

        Self {
            gateway,
            transport,
            mx,
            ledger,
            credential,
            secret,
        }
    }

    pub fn secret(&self) -> Option<&str> {
        Some(self.secret.as_str())
    }
}
