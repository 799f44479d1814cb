use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::pkcs12::Certificate;
use crate::store::{AccountStore, CertificateStore, KeyCipher, OrderStore, StoreError};

fn sanitize(domain: &str) -> String {
    domain
        .replace('*', "wildcard")
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

async fn ensure_dir(dir: &Path) -> Result<(), StoreError> {
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

/// Certificate store persisting one PKCS#12 file per domain under a
/// directory. Wildcard domains are stored as `wildcard.<suffix>.p12`.
pub struct FsCertificateStore {
    dir: PathBuf,
    password: String,
}

impl FsCertificateStore {
    pub fn new(dir: impl Into<PathBuf>, password: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            password: password.into(),
        }
    }

    fn path(&self, domain: &str) -> PathBuf {
        self.dir.join(format!("{}.p12", sanitize(domain)))
    }
}

#[async_trait]
impl CertificateStore for FsCertificateStore {
    async fn load(&self, domain: &str) -> Result<Option<Certificate>, StoreError> {
        let path = self.path(domain);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let cert = Certificate::load(&bytes, &self.password).map_err(|e| {
            StoreError::Malformed(format!("certificate for {domain} at {path:?}: {e}"))
        })?;
        Ok(Some(cert))
    }

    async fn save(&self, domain: &str, certificate: &Certificate) -> Result<(), StoreError> {
        ensure_dir(&self.dir).await?;
        tokio::fs::write(self.path(domain), certificate.as_pkcs12()).await?;
        Ok(())
    }

    async fn delete(&self, domain: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path(domain)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Account key store writing `account.pem`, enciphered at rest through the
/// configured [`KeyCipher`].
pub struct FsAccountStore {
    dir: PathBuf,
    cipher: Arc<dyn KeyCipher>,
}

impl FsAccountStore {
    pub fn new(dir: impl Into<PathBuf>, cipher: Arc<dyn KeyCipher>) -> Self {
        Self {
            dir: dir.into(),
            cipher,
        }
    }

    fn path(&self) -> PathBuf {
        self.dir.join("account.pem")
    }
}

#[async_trait]
impl AccountStore for FsAccountStore {
    async fn load(&self) -> Result<Option<String>, StoreError> {
        let sealed = match tokio::fs::read_to_string(self.path()).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let key_pem = self.cipher.open(&sealed)?;
        pem::parse(&key_pem)
            .map_err(|e| StoreError::Malformed(format!("account key is not valid PEM: {e}")))?;
        Ok(Some(key_pem))
    }

    async fn save(&self, key_pem: &str) -> Result<(), StoreError> {
        ensure_dir(&self.dir).await?;
        let sealed = self.cipher.seal(key_pem)?;
        tokio::fs::write(self.path(), sealed).await?;
        Ok(())
    }
}

/// Order store persisting one URI file per primary domain under
/// `<dir>/orders`.
pub struct FsOrderStore {
    dir: PathBuf,
}

impl FsOrderStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into().join("orders"),
        }
    }

    fn path(&self, domain: &str) -> PathBuf {
        self.dir.join(format!("{}.url", sanitize(domain)))
    }
}

#[async_trait]
impl OrderStore for FsOrderStore {
    async fn load(&self, domain: &str) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.path(domain)).await {
            Ok(uri) => Ok(Some(uri.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, domain: &str, order_uri: &str) -> Result<(), StoreError> {
        ensure_dir(&self.dir).await?;
        tokio::fs::write(self.path(domain), order_uri).await?;
        Ok(())
    }

    async fn delete(&self, domain: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path(domain)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkcs12::tests::{test_certificate, PASSWORD};
    use crate::store::PlainText;

    #[tokio::test]
    async fn certificate_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCertificateStore::new(dir.path(), PASSWORD);
        assert!(store.load("example.com").await.unwrap().is_none());

        let cert = test_certificate((2031, 1, 1));
        store.save("example.com", &cert).await.unwrap();
        let loaded = store.load("example.com").await.unwrap().unwrap();
        assert_eq!(loaded.not_after(), cert.not_after());

        store.delete("example.com").await.unwrap();
        assert!(store.load("example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wildcard_domains_map_to_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCertificateStore::new(dir.path(), PASSWORD);
        let cert = test_certificate((2031, 1, 1));
        store.save("*.example.com", &cert).await.unwrap();
        assert!(dir.path().join("wildcard.example.com.p12").exists());
        assert!(store.load("*.example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn corrupt_certificate_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCertificateStore::new(dir.path(), PASSWORD);
        tokio::fs::write(dir.path().join("bad.example.p12"), b"not pkcs12")
            .await
            .unwrap();
        assert!(matches!(
            store.load("bad.example").await,
            Err(StoreError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn wrong_password_is_an_error_not_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cert = test_certificate((2031, 1, 1));
        FsCertificateStore::new(dir.path(), PASSWORD)
            .save("example.com", &cert)
            .await
            .unwrap();

        let store = FsCertificateStore::new(dir.path(), "a-different-password");
        assert!(matches!(
            store.load("example.com").await,
            Err(StoreError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn account_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsAccountStore::new(dir.path(), Arc::new(PlainText));
        assert!(store.load().await.unwrap().is_none());

        let key_pem = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .unwrap()
            .serialize_pem();
        store.save(&key_pem).await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some(key_pem.as_str()));
    }

    #[tokio::test]
    async fn account_store_rejects_non_pem_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsAccountStore::new(dir.path(), Arc::new(PlainText));
        store.save("not a key").await.unwrap();
        assert!(matches!(store.load().await, Err(StoreError::Malformed(_))));
    }

    #[tokio::test]
    async fn order_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsOrderStore::new(dir.path());
        store
            .save("example.com", "https://ca/order/42")
            .await
            .unwrap();
        assert_eq!(
            store.load("example.com").await.unwrap().as_deref(),
            Some("https://ca/order/42")
        );
        store.delete("example.com").await.unwrap();
        assert!(store.load("example.com").await.unwrap().is_none());
    }
}
