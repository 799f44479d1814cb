use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::pkcs12::Certificate;
use crate::store::{AccountStore, CertificateStore, ChallengeStore, OrderStore, StoreError};

/// In-process certificate store. Used as the cache tier of a
/// [`crate::stores::Layered`] store, or standalone in tests.
#[derive(Default)]
pub struct MemoryCertificateStore {
    entries: Mutex<HashMap<String, Certificate>>,
}

impl MemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CertificateStore for MemoryCertificateStore {
    async fn load(&self, domain: &str) -> Result<Option<Certificate>, StoreError> {
        Ok(self.entries.lock().unwrap().get(domain).cloned())
    }

    async fn save(&self, domain: &str, certificate: &Certificate) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap()
            .insert(domain.to_string(), certificate.clone());
        Ok(())
    }

    async fn delete(&self, domain: &str) -> Result<(), StoreError> {
        self.entries.lock().unwrap().remove(domain);
        Ok(())
    }
}

/// In-process account key store.
#[derive(Default)]
pub struct MemoryAccountStore {
    key_pem: Mutex<Option<String>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        *self.key_pem.lock().unwrap() = None;
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn load(&self) -> Result<Option<String>, StoreError> {
        Ok(self.key_pem.lock().unwrap().clone())
    }

    async fn save(&self, key_pem: &str) -> Result<(), StoreError> {
        *self.key_pem.lock().unwrap() = Some(key_pem.to_string());
        Ok(())
    }
}

/// In-process order store, suitable for single-instance deployments where
/// losing resumption state on restart is acceptable.
#[derive(Default)]
pub struct MemoryOrderStore {
    orders: Mutex<HashMap<String, String>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn load(&self, domain: &str) -> Result<Option<String>, StoreError> {
        Ok(self.orders.lock().unwrap().get(domain).cloned())
    }

    async fn save(&self, domain: &str, order_uri: &str) -> Result<(), StoreError> {
        self.orders
            .lock()
            .unwrap()
            .insert(domain.to_string(), order_uri.to_string());
        Ok(())
    }

    async fn delete(&self, domain: &str) -> Result<(), StoreError> {
        self.orders.lock().unwrap().remove(domain);
        Ok(())
    }
}

/// In-process challenge response store for single-instance deployments.
/// Expired entries are evicted on read.
#[derive(Default)]
pub struct MemoryChallengeStore {
    responses: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn put(&self, token: &str, key_auth: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires = Instant::now() + ttl;
        self.responses
            .lock()
            .unwrap()
            .insert(token.to_string(), (key_auth.to_string(), expires));
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<String>, StoreError> {
        let mut responses = self.responses.lock().unwrap();
        if let Some((response, expires)) = responses.get(token) {
            if *expires > Instant::now() {
                return Ok(Some(response.clone()));
            }
            responses.remove(token);
        }
        Ok(None)
    }
}
