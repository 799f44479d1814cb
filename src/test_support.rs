//! Shared fakes for exercising the lifecycle engine without a real CA.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::acme::{
    AcmeAccount, AcmeAuthorization, AcmeChallenge, AcmeDirectory, AcmeError, AcmeOrder,
    AuthorizationState, AuthorizationStatus, ChallengeKind, ExternalAccountBinding, OrderState,
    OrderStatus, RevocationReason,
};
use crate::challenge::{ChallengeError, ChallengeHandler};
use crate::config::AutoCertConfig;
use crate::lifecycle::{AutoCert, LifecycleHook};
use crate::lock::{DistributedLockProvider, MemoryLeaseClient};
use crate::pkcs12::Certificate;
use crate::store::{AccountStore, CertificateStore, OrderStore};
use crate::stores::{MemoryAccountStore, MemoryCertificateStore, MemoryOrderStore};
use tokio_util::sync::CancellationToken;

/// Scriptable in-memory certificate authority.
pub(crate) struct FakeCa {
    chain: Vec<Vec<u8>>,
    pub state: Mutex<CaState>,
}

#[derive(Default)]
pub(crate) struct CaState {
    pub new_account_calls: usize,
    pub restore_calls: usize,
    pub new_order_calls: usize,
    pub last_eab: Option<(String, String)>,
    pub order_domains: HashMap<String, Vec<String>>,
    pub order_statuses: HashMap<String, OrderStatus>,
    pub authorization_statuses: HashMap<String, AuthorizationStatus>,
    pub unreachable_orders: HashSet<String>,
    pub finalized: Vec<Vec<u8>>,
    pub revoked: Vec<Vec<u8>>,
    pub changed_keys: Vec<String>,
    next_order_id: usize,
}

impl FakeCa {
    pub fn new() -> Arc<Self> {
        let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = rcgen::CertificateParams::new(vec!["example.com".to_string()]).unwrap();
        params.not_before = rcgen::date_time_ymd(2020, 1, 1);
        params.not_after = rcgen::date_time_ymd(2033, 1, 1);
        let cert = params.self_signed(&key_pair).unwrap();
        Arc::new(Self {
            chain: vec![cert.der().to_vec()],
            state: Mutex::new(CaState::default()),
        })
    }

}

pub(crate) struct FakeDirectory {
    pub ca: Arc<FakeCa>,
}

#[async_trait]
impl AcmeDirectory for FakeDirectory {
    async fn restore_account(&self, _key_pem: &str) -> Result<Box<dyn AcmeAccount>, AcmeError> {
        let mut state = self.ca.state.lock().unwrap();
        state.restore_calls += 1;
        Ok(Box::new(FakeAccount {
            ca: Arc::clone(&self.ca),
        }))
    }

    async fn new_account(
        &self,
        _contact: &[String],
        _terms_of_service_agreed: bool,
        eab: Option<&ExternalAccountBinding>,
    ) -> Result<(Box<dyn AcmeAccount>, String), AcmeError> {
        let mut state = self.ca.state.lock().unwrap();
        state.new_account_calls += 1;
        state.last_eab = eab.map(|e| (e.key_id.clone(), e.hmac_key.clone()));
        let key_pem = format!("account-key-{}", state.new_account_calls);
        Ok((
            Box::new(FakeAccount {
                ca: Arc::clone(&self.ca),
            }),
            key_pem,
        ))
    }
}

pub(crate) struct FakeAccount {
    ca: Arc<FakeCa>,
}

#[async_trait]
impl AcmeAccount for FakeAccount {
    async fn new_order(&self, domains: &[String]) -> Result<Box<dyn AcmeOrder>, AcmeError> {
        let mut state = self.ca.state.lock().unwrap();
        state.new_order_calls += 1;
        state.next_order_id += 1;
        let uri = format!("https://ca.invalid/order/{}", state.next_order_id);
        state.order_domains.insert(uri.clone(), domains.to_vec());
        state.order_statuses.insert(uri.clone(), OrderStatus::Pending);
        Ok(Box::new(FakeOrder {
            ca: Arc::clone(&self.ca),
            uri,
        }))
    }

    async fn order(&self, uri: &str) -> Result<Box<dyn AcmeOrder>, AcmeError> {
        let state = self.ca.state.lock().unwrap();
        if state.unreachable_orders.contains(uri) || !state.order_domains.contains_key(uri) {
            return Err(AcmeError::protocol(format!("order {uri} not found")));
        }
        Ok(Box::new(FakeOrder {
            ca: Arc::clone(&self.ca),
            uri: uri.to_string(),
        }))
    }

    async fn revoke_certificate(
        &self,
        certificate_der: &[u8],
        _reason: RevocationReason,
    ) -> Result<(), AcmeError> {
        let mut state = self.ca.state.lock().unwrap();
        state.revoked.push(certificate_der.to_vec());
        Ok(())
    }

    async fn change_key(&self, new_key_pem: &str) -> Result<(), AcmeError> {
        let mut state = self.ca.state.lock().unwrap();
        state.changed_keys.push(new_key_pem.to_string());
        Ok(())
    }
}

pub(crate) struct FakeOrder {
    ca: Arc<FakeCa>,
    uri: String,
}

#[async_trait]
impl AcmeOrder for FakeOrder {
    fn location(&self) -> &str {
        &self.uri
    }

    async fn state(&self) -> Result<OrderState, AcmeError> {
        let state = self.ca.state.lock().unwrap();
        Ok(OrderState {
            status: *state
                .order_statuses
                .get(&self.uri)
                .unwrap_or(&OrderStatus::Pending),
            identifiers: state
                .order_domains
                .get(&self.uri)
                .cloned()
                .unwrap_or_default(),
        })
    }

    async fn authorizations(&self) -> Result<Vec<Box<dyn AcmeAuthorization>>, AcmeError> {
        let state = self.ca.state.lock().unwrap();
        let domains = state
            .order_domains
            .get(&self.uri)
            .cloned()
            .unwrap_or_default();
        Ok(domains
            .into_iter()
            .map(|identifier| {
                Box::new(FakeAuthorization {
                    ca: Arc::clone(&self.ca),
                    identifier,
                }) as Box<dyn AcmeAuthorization>
            })
            .collect())
    }

    async fn finalize(&self, csr_der: &[u8]) -> Result<(), AcmeError> {
        let mut state = self.ca.state.lock().unwrap();
        state.finalized.push(csr_der.to_vec());
        state.order_statuses.insert(self.uri.clone(), OrderStatus::Valid);
        Ok(())
    }

    async fn download(&self) -> Result<Vec<Vec<u8>>, AcmeError> {
        Ok(self.ca.chain.clone())
    }
}

pub(crate) struct FakeAuthorization {
    ca: Arc<FakeCa>,
    identifier: String,
}

#[async_trait]
impl AcmeAuthorization for FakeAuthorization {
    async fn state(&self) -> Result<AuthorizationState, AcmeError> {
        let state = self.ca.state.lock().unwrap();
        Ok(AuthorizationState {
            identifier: self.identifier.clone(),
            status: *state
                .authorization_statuses
                .get(&self.identifier)
                .unwrap_or(&AuthorizationStatus::Pending),
        })
    }

    async fn challenge(
        &self,
        _kind: ChallengeKind,
    ) -> Result<Option<Box<dyn AcmeChallenge>>, AcmeError> {
        Ok(None)
    }
}

/// Challenge handler with a fixed outcome.
pub(crate) struct FakeHandler {
    kind: ChallengeKind,
    succeed: bool,
    pub calls: AtomicUsize,
}

impl FakeHandler {
    pub fn succeeding(kind: ChallengeKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            succeed: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(kind: ChallengeKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            succeed: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChallengeHandler for FakeHandler {
    fn kind(&self) -> ChallengeKind {
        self.kind
    }

    async fn handle(
        &self,
        _authorization: &dyn AcmeAuthorization,
        _cancel: &CancellationToken,
    ) -> Result<(), ChallengeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            Ok(())
        } else {
            Err(ChallengeError::Rejected { kind: self.kind })
        }
    }
}

/// Hook that records invocations; optionally errors to prove isolation.
#[derive(Default)]
pub(crate) struct RecordingHook {
    pub fail: bool,
    pub created: Mutex<Vec<String>>,
    pub failed: Mutex<Vec<String>>,
}

#[async_trait]
impl LifecycleHook for RecordingHook {
    async fn on_certificate_created(
        &self,
        domain: &str,
        _certificate: &Certificate,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.created.lock().unwrap().push(domain.to_string());
        if self.fail {
            return Err("hook exploded".into());
        }
        Ok(())
    }

    async fn on_renewal_failed(
        &self,
        domain: &str,
        _error: &crate::error::OrderError,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.failed.lock().unwrap().push(domain.to_string());
        Ok(())
    }
}

/// Engine wired against in-memory collaborators.
pub(crate) struct Harness {
    pub ca: Arc<FakeCa>,
    pub accounts: Arc<MemoryAccountStore>,
    pub certificates: Arc<MemoryCertificateStore>,
    pub orders: Arc<MemoryOrderStore>,
    pub config: AutoCertConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            ca: FakeCa::new(),
            accounts: Arc::new(MemoryAccountStore::new()),
            certificates: Arc::new(MemoryCertificateStore::new()),
            orders: Arc::new(MemoryOrderStore::new()),
            config: test_config(),
        }
    }

    pub fn engine(&self) -> AutoCert {
        AutoCert::new(
            self.config.clone(),
            Arc::new(FakeDirectory {
                ca: Arc::clone(&self.ca),
            }),
            Arc::clone(&self.accounts) as Arc<dyn AccountStore>,
            Arc::clone(&self.certificates) as Arc<dyn CertificateStore>,
            Arc::clone(&self.orders) as Arc<dyn OrderStore>,
            Arc::new(
                DistributedLockProvider::new(Arc::new(MemoryLeaseClient::new())).with_timing(
                    Duration::from_secs(5),
                    Duration::from_secs(5),
                    Duration::from_millis(10),
                ),
            ),
        )
        .unwrap()
    }
}

/// Enables log output for tests run with `--nocapture`.
pub(crate) fn init_logging() {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .init();
}

pub(crate) fn test_config() -> AutoCertConfig {
    AutoCertConfig {
        email: "admin@example.com".to_string(),
        certificate_password: "test-password-1".to_string(),
        terms_of_service_agreed: true,
        ..AutoCertConfig::default()
    }
}
