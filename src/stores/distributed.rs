use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::pkcs12::Certificate;
use crate::store::{
    AccountStore, CertificateStore, ChallengeStore, KeyCipher, OrderStore, StoreError,
};

/// Orders not finalized within this window are presumed abandoned.
const ORDER_TTL: Duration = Duration::from_secs(48 * 60 * 60);

/// Narrow contract over an external key-value cache (e.g. Redis,
/// memcached). Entries without a TTL live until removed.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Order store over a [`KeyValueCache`], one entry per primary domain with
/// a 48 hour expiry.
pub struct DistributedOrderStore {
    cache: Arc<dyn KeyValueCache>,
}

impl DistributedOrderStore {
    pub fn new(cache: Arc<dyn KeyValueCache>) -> Self {
        Self { cache }
    }

    fn key(domain: &str) -> String {
        format!("acme:order:{domain}")
    }
}

#[async_trait]
impl OrderStore for DistributedOrderStore {
    async fn load(&self, domain: &str) -> Result<Option<String>, StoreError> {
        match self.cache.get(&Self::key(domain)).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StoreError::Malformed(e.to_string())),
            None => Ok(None),
        }
    }

    async fn save(&self, domain: &str, order_uri: &str) -> Result<(), StoreError> {
        self.cache
            .set(&Self::key(domain), order_uri.as_bytes(), Some(ORDER_TTL))
            .await
    }

    async fn delete(&self, domain: &str) -> Result<(), StoreError> {
        self.cache.remove(&Self::key(domain)).await
    }
}

/// Account key store over a [`KeyValueCache`], enciphered at rest.
pub struct DistributedAccountStore {
    cache: Arc<dyn KeyValueCache>,
    cipher: Arc<dyn KeyCipher>,
}

impl DistributedAccountStore {
    const KEY: &'static str = "acme:account";

    pub fn new(cache: Arc<dyn KeyValueCache>, cipher: Arc<dyn KeyCipher>) -> Self {
        Self { cache, cipher }
    }
}

#[async_trait]
impl AccountStore for DistributedAccountStore {
    async fn load(&self) -> Result<Option<String>, StoreError> {
        match self.cache.get(Self::KEY).await? {
            Some(bytes) => {
                let sealed = String::from_utf8(bytes)
                    .map_err(|e| StoreError::Malformed(e.to_string()))?;
                self.cipher.open(&sealed).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn save(&self, key_pem: &str) -> Result<(), StoreError> {
        let sealed = self.cipher.seal(key_pem)?;
        self.cache.set(Self::KEY, sealed.as_bytes(), None).await
    }
}

/// Certificate store over a [`KeyValueCache`], holding the raw PKCS#12
/// bytes. Typically the cache tier of a [`crate::stores::Layered`] store in
/// multi-instance deployments.
pub struct DistributedCertificateStore {
    cache: Arc<dyn KeyValueCache>,
    password: String,
}

impl DistributedCertificateStore {
    pub fn new(cache: Arc<dyn KeyValueCache>, password: impl Into<String>) -> Self {
        Self {
            cache,
            password: password.into(),
        }
    }

    fn key(domain: &str) -> String {
        format!("acme:cert:{domain}")
    }
}

#[async_trait]
impl CertificateStore for DistributedCertificateStore {
    async fn load(&self, domain: &str) -> Result<Option<Certificate>, StoreError> {
        match self.cache.get(&Self::key(domain)).await? {
            Some(bytes) => Certificate::load(&bytes, &self.password)
                .map(Some)
                .map_err(|e| StoreError::Malformed(e.to_string())),
            None => Ok(None),
        }
    }

    async fn save(&self, domain: &str, certificate: &Certificate) -> Result<(), StoreError> {
        self.cache
            .set(&Self::key(domain), certificate.as_pkcs12(), None)
            .await
    }

    async fn delete(&self, domain: &str) -> Result<(), StoreError> {
        self.cache.remove(&Self::key(domain)).await
    }
}

/// Challenge response store over a [`KeyValueCache`] for deployments where
/// the validating HTTP endpoint runs on another instance.
pub struct DistributedChallengeStore {
    cache: Arc<dyn KeyValueCache>,
}

impl DistributedChallengeStore {
    pub fn new(cache: Arc<dyn KeyValueCache>) -> Self {
        Self { cache }
    }

    fn key(token: &str) -> String {
        format!("acme:challenge:{token}")
    }
}

#[async_trait]
impl ChallengeStore for DistributedChallengeStore {
    async fn put(&self, token: &str, key_auth: &str, ttl: Duration) -> Result<(), StoreError> {
        self.cache
            .set(&Self::key(token), key_auth.as_bytes(), Some(ttl))
            .await
    }

    async fn get(&self, token: &str) -> Result<Option<String>, StoreError> {
        match self.cache.get(&Self::key(token)).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StoreError::Malformed(e.to_string())),
            None => Ok(None),
        }
    }
}

/// In-process [`KeyValueCache`] honoring TTLs. Backs the distributed store
/// tests and single-instance setups.
#[derive(Default)]
pub struct MemoryKeyValueCache {
    entries: Mutex<HashMap<String, (Vec<u8>, Option<Instant>)>>,
}

impl MemoryKeyValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The TTL recorded for a live entry, if any. Test support.
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock().unwrap();
        let (_, expires) = entries.get(key)?;
        expires.map(|at| at.saturating_duration_since(Instant::now()))
    }
}

#[async_trait]
impl KeyValueCache for MemoryKeyValueCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        if let Some((value, expires)) = entries.get(key) {
            match expires {
                Some(at) if *at <= Instant::now() => {
                    entries.remove(key);
                    return Ok(None);
                }
                _ => return Ok(Some(value.clone())),
            }
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_vec(), expires));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}
