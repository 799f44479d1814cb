//! Narrow persistence contracts.
//!
//! Every store is a small CRUD surface so that cache tiers, filesystems and
//! key-value backends stay interchangeable. [`crate::stores::Layered`]
//! composes any two implementations of the same contract into a
//! self-healing two-tier store.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::pkcs12::Certificate;

/// Issued certificates, keyed by domain.
#[async_trait]
pub trait CertificateStore: Send + Sync {
    async fn load(&self, domain: &str) -> Result<Option<Certificate>, StoreError>;
    async fn save(&self, domain: &str, certificate: &Certificate) -> Result<(), StoreError>;
    async fn delete(&self, domain: &str) -> Result<(), StoreError>;
}

/// The single ACME account key of this installation, as PEM.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn load(&self) -> Result<Option<String>, StoreError>;
    async fn save(&self, key_pem: &str) -> Result<(), StoreError>;
}

/// In-flight order URIs, keyed by primary domain, so interrupted
/// validations survive a process restart.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn load(&self, domain: &str) -> Result<Option<String>, StoreError>;
    async fn save(&self, domain: &str, order_uri: &str) -> Result<(), StoreError>;
    async fn delete(&self, domain: &str) -> Result<(), StoreError>;
}

/// Published http-01 challenge responses. An external HTTP endpoint serves
/// `/.well-known/acme-challenge/{token}` from this store.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    async fn put(&self, token: &str, key_auth: &str, ttl: Duration) -> Result<(), StoreError>;
    async fn get(&self, token: &str) -> Result<Option<String>, StoreError>;
}

/// Encryption-at-rest seam for the account key. The cipher itself is an
/// external collaborator; [`PlainText`] is the identity implementation.
pub trait KeyCipher: Send + Sync {
    fn seal(&self, plain: &str) -> Result<String, StoreError>;
    fn open(&self, sealed: &str) -> Result<String, StoreError>;
}

/// Stores the account key unencrypted.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainText;

impl KeyCipher for PlainText {
    fn seal(&self, plain: &str) -> Result<String, StoreError> {
        Ok(plain.to_string())
    }

    fn open(&self, sealed: &str) -> Result<String, StoreError> {
        Ok(sealed.to_string())
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed entry: {0}")]
    Malformed(String),
    #[error("cipher error: {0}")]
    Cipher(String),
    #[error("backend error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync + 'static>),
}
