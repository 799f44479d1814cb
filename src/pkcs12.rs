//! Password-protected certificate bundles.
//!
//! Issued certificates are stored as PKCS#12 containers holding the private
//! key and the full chain. The leaf's `notAfter` is extracted once at bundle
//! time so the renewal scheduler never has to touch the container again.

use chrono::{DateTime, Utc};
use p12_keystore::{Certificate as KeystoreCertificate, KeyStore, KeyStoreEntry, PrivateKeyChain};
use thiserror::Error;

/// An issued certificate as the stores hold it: the encrypted PKCS#12 blob
/// plus fields derived from the leaf.
#[derive(Debug, Clone)]
pub struct Certificate {
    pkcs12: Vec<u8>,
    leaf_der: Vec<u8>,
    not_after: DateTime<Utc>,
}

impl Certificate {
    /// Packages a downloaded chain (DER, leaf first) and its private key
    /// into a password-protected PKCS#12 container.
    pub fn bundle(
        chain_der: &[Vec<u8>],
        key_der: &[u8],
        password: &str,
    ) -> Result<Self, Pkcs12Error> {
        let leaf_der = chain_der
            .first()
            .ok_or(Pkcs12Error::EmptyChain)?
            .clone();
        let not_after = parse_not_after(&leaf_der)?;

        let chain = chain_der
            .iter()
            .map(|der| KeystoreCertificate::from_der(der))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Pkcs12Error::Container(e.to_string()))?;

        // Local key id ties the key to the leaf inside the container.
        let digest = ring::digest::digest(&ring::digest::SHA256, &leaf_der);
        let local_key_id = digest.as_ref()[..20].to_vec();

        let mut keystore = KeyStore::new();
        let key_chain = PrivateKeyChain::new(key_der, local_key_id, chain);
        keystore.add_entry("tokio-autocert", KeyStoreEntry::PrivateKeyChain(key_chain));
        let pkcs12 = keystore
            .writer(password)
            .write()
            .map_err(|e| Pkcs12Error::Container(e.to_string()))?;

        Ok(Self {
            pkcs12,
            leaf_der,
            not_after,
        })
    }

    /// Re-opens a stored container, re-deriving the leaf and its expiry.
    pub fn load(pkcs12: &[u8], password: &str) -> Result<Self, Pkcs12Error> {
        let keystore = KeyStore::from_pkcs12(pkcs12, password)
            .map_err(|e| Pkcs12Error::Container(e.to_string()))?;
        let (_, key_chain) = keystore
            .private_key_chain()
            .ok_or(Pkcs12Error::MissingKey)?;
        let leaf = key_chain.chain().first().ok_or(Pkcs12Error::EmptyChain)?;
        let leaf_der = leaf.as_der().to_vec();
        let not_after = parse_not_after(&leaf_der)?;
        Ok(Self {
            pkcs12: pkcs12.to_vec(),
            leaf_der,
            not_after,
        })
    }

    /// The encrypted PKCS#12 bytes, as written to persistent stores.
    pub fn as_pkcs12(&self) -> &[u8] {
        &self.pkcs12
    }

    /// DER encoding of the leaf certificate.
    pub fn leaf_der(&self) -> &[u8] {
        &self.leaf_der
    }

    /// Expiry of the leaf certificate.
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Time left until expiry. Negative once the certificate has expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.not_after - now
    }
}

fn parse_not_after(leaf_der: &[u8]) -> Result<DateTime<Utc>, Pkcs12Error> {
    let (_, cert) = x509_parser::parse_x509_certificate(leaf_der)
        .map_err(|e| Pkcs12Error::Parse(e.to_string()))?;
    let timestamp = cert.validity().not_after.timestamp();
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| Pkcs12Error::Parse("notAfter out of range".to_string()))
}

#[derive(Error, Debug)]
pub enum Pkcs12Error {
    #[error("pkcs12 container error: {0}")]
    Container(String),
    #[error("certificate parse error: {0}")]
    Parse(String),
    #[error("downloaded chain is empty")]
    EmptyChain,
    #[error("container holds no private key entry")]
    MissingKey,
}
