//! Certificate lookup for TLS handshakes.

use std::sync::Arc;

use log::{debug, warn};

use crate::pkcs12::Certificate;
use crate::store::CertificateStore;

/// Resolves the certificate to present for an SNI host name.
///
/// Lookup order: exact domain first, then the wildcard covering the host's
/// parent domain. Store failures are logged and treated as misses, so a
/// flaky backend degrades to "no certificate" instead of failing the
/// handshake path with an error.
pub struct CertificateSelector {
    store: Arc<dyn CertificateStore>,
}

impl CertificateSelector {
    pub fn new(store: Arc<dyn CertificateStore>) -> Self {
        Self { store }
    }

    pub async fn select(&self, host: &str) -> Option<Certificate> {
        if let Some(certificate) = self.lookup(host).await {
            return Some(certificate);
        }
        if let Some(wildcard) = wildcard_for(host) {
            debug!("no exact certificate for {host}, trying {wildcard}");
            return self.lookup(&wildcard).await;
        }
        None
    }

    async fn lookup(&self, domain: &str) -> Option<Certificate> {
        match self.store.load(domain).await {
            Ok(found) => found,
            Err(e) => {
                warn!("certificate lookup for {domain} failed: {e}");
                None
            }
        }
    }
}

/// The wildcard name covering `host`, if one exists. A wildcard never matches
/// a bare registrable domain, so hosts with fewer than three labels have no
/// wildcard form.
fn wildcard_for(host: &str) -> Option<String> {
    let (_, parent) = host.split_once('.')?;
    if !parent.contains('.') {
        return None;
    }
    Some(format!("*.{parent}"))
}
