//! The certificate lifecycle engine.
//!
//! [`AutoCert`] ties the pieces together: it serializes work through the
//! lock provider, keeps the ACME account alive, orders and renews
//! certificates, resumes interrupted orders after a restart, and fans
//! results out to lifecycle hooks and metrics.

use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::acme::{
    AcmeAccount, AcmeDirectory, AcmeOrder, AuthorizationStatus, ExternalAccountBinding,
    OrderStatus, RevocationReason,
};
use crate::challenge::{ChallengeError, ChallengeHandler};
use crate::config::{AutoCertConfig, ConfigError, KeyError};
use crate::error::OrderError;
use crate::lock::LockProvider;
use crate::metrics::Metrics;
use crate::pkcs12::Certificate;
use crate::store::{AccountStore, CertificateStore, OrderStore};

/// Observer notified about lifecycle events. Hook failures are logged and
/// never affect the operation that triggered them.
#[async_trait::async_trait]
pub trait LifecycleHook: Send + Sync {
    async fn on_certificate_created(
        &self,
        domain: &str,
        certificate: &Certificate,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn on_renewal_failed(
        &self,
        domain: &str,
        error: &OrderError,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Orchestrates the certificate lifecycle against pluggable collaborators.
pub struct AutoCert {
    config: AutoCertConfig,
    directory: Arc<dyn AcmeDirectory>,
    accounts: Arc<dyn AccountStore>,
    certificates: Arc<dyn CertificateStore>,
    orders: Arc<dyn OrderStore>,
    locks: Arc<dyn LockProvider>,
    handlers: Vec<Arc<dyn ChallengeHandler>>,
    hooks: Vec<Arc<dyn LifecycleHook>>,
    metrics: Option<Metrics>,
}

impl AutoCert {
    /// Builds the engine. Fails if the configuration violates its
    /// invariants, so no operation ever runs with a bad password.
    pub fn new(
        config: AutoCertConfig,
        directory: Arc<dyn AcmeDirectory>,
        accounts: Arc<dyn AccountStore>,
        certificates: Arc<dyn CertificateStore>,
        orders: Arc<dyn OrderStore>,
        locks: Arc<dyn LockProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            directory,
            accounts,
            certificates,
            orders,
            locks,
            handlers: Vec::new(),
            hooks: Vec::new(),
            metrics: None,
        })
    }

    /// Registers a challenge handler. Handlers are tried in registration
    /// order until one validates the authorization.
    pub fn with_handler(mut self, handler: Arc<dyn ChallengeHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &AutoCertConfig {
        &self.config
    }

    pub fn certificates(&self) -> &Arc<dyn CertificateStore> {
        &self.certificates
    }

    pub(crate) fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }

    pub(crate) fn hooks(&self) -> &[Arc<dyn LifecycleHook>] {
        &self.hooks
    }

    /// Orders a certificate covering `domains`, the first being the primary
    /// identifier and CSR common name. The resulting bundle is saved under
    /// every requested domain.
    ///
    /// Concurrent orders for the same primary domain serialize on the lock
    /// provider. If validation fails, the order URI stays persisted so a
    /// later call resumes the same order instead of opening a new one.
    pub async fn order_certificate(
        &self,
        domains: &[String],
        cancel: &CancellationToken,
    ) -> Result<Certificate, OrderError> {
        let primary = domains.first().ok_or(OrderError::NoDomains)?.clone();

        let _guard = self.locks.acquire(&format!("cert:{primary}"), cancel).await?;
        info!("ordering certificate for {domains:?}");

        let account = self.load_or_register_account().await?;
        let order = self.load_or_open_order(account.as_ref(), domains, &primary).await?;

        for authorization in order.authorizations().await? {
            let state = authorization.state().await?;
            if state.status == AuthorizationStatus::Valid {
                info!("authorization for {} is already valid", state.identifier);
                continue;
            }

            let started = Instant::now();
            let mut validated = false;
            for handler in &self.handlers {
                match handler.handle(authorization.as_ref(), cancel).await {
                    Ok(()) => {
                        validated = true;
                        break;
                    }
                    Err(ChallengeError::Cancelled) => return Err(OrderError::Cancelled),
                    Err(e) => {
                        warn!(
                            "{} handler failed for {}: {e}",
                            handler.kind(),
                            state.identifier
                        );
                    }
                }
            }
            if !validated {
                return Err(OrderError::ValidationFailed {
                    identifier: state.identifier,
                });
            }
            if let Some(metrics) = &self.metrics {
                metrics
                    .challenge_validation_seconds
                    .observe(started.elapsed().as_secs_f64());
            }
        }

        let key_pair = self.config.key_algorithm.generate_key_pair()?;
        let csr = build_csr(&self.config, domains, &primary, &key_pair)?;
        order.finalize(&csr).await?;

        let chain = order.download().await?;
        let certificate = Certificate::bundle(
            &chain,
            &key_pair.serialize_der(),
            &self.config.certificate_password,
        )?;

        for domain in domains {
            self.certificates.save(domain, &certificate).await?;
        }
        if let Err(e) = self.orders.delete(&primary).await {
            warn!("failed to clear completed order for {primary}: {e}");
        }

        for hook in &self.hooks {
            if let Err(e) = hook.on_certificate_created(&primary, &certificate).await {
                warn!("lifecycle hook failed after issuing {primary}: {e}");
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.certificates_renewed.inc();
        }
        info!(
            "certificate for {primary} issued, expires {}",
            certificate.not_after()
        );
        Ok(certificate)
    }

    /// Revokes the stored certificate for `domain` and removes it from the
    /// store.
    pub async fn revoke_certificate(
        &self,
        domain: &str,
        reason: RevocationReason,
        cancel: &CancellationToken,
    ) -> Result<(), OrderError> {
        let _guard = self.locks.acquire(&format!("cert:{domain}"), cancel).await?;

        let key_pem = self
            .accounts
            .load()
            .await?
            .ok_or(OrderError::AccountMissing)?;
        let certificate = self
            .certificates
            .load(domain)
            .await?
            .ok_or_else(|| OrderError::CertificateNotFound {
                domain: domain.to_string(),
            })?;

        let account = self.directory.restore_account(&key_pem).await?;
        account
            .revoke_certificate(certificate.leaf_der(), reason)
            .await?;
        self.certificates.delete(domain).await?;
        info!("certificate for {domain} revoked");
        Ok(())
    }

    /// Replaces the ACME account key with a freshly generated one.
    pub async fn rollover_account_key(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), OrderError> {
        let _guard = self.locks.acquire("account:rollover", cancel).await?;

        let key_pem = self
            .accounts
            .load()
            .await?
            .ok_or(OrderError::AccountMissing)?;
        let account = self.directory.restore_account(&key_pem).await?;

        let new_key = self.config.key_algorithm.generate_key_pair()?;
        let new_pem = new_key.serialize_pem();
        account.change_key(&new_pem).await?;
        self.accounts.save(&new_pem).await?;
        info!("account key rolled over");
        Ok(())
    }

    async fn load_or_register_account(&self) -> Result<Box<dyn AcmeAccount>, OrderError> {
        if let Some(key_pem) = self.accounts.load().await? {
            return Ok(self.directory.restore_account(&key_pem).await?);
        }

        info!("no account key stored, registering a new account");
        let contact = vec![format!("mailto:{}", self.config.email)];
        let eab = self.config.has_eab().then(|| ExternalAccountBinding {
            key_id: self.config.account_key_id.clone().unwrap_or_default(),
            hmac_key: self.config.account_hmac_key.clone().unwrap_or_default(),
        });
        let (account, key_pem) = self
            .directory
            .new_account(&contact, self.config.terms_of_service_agreed, eab.as_ref())
            .await?;
        self.accounts.save(&key_pem).await?;
        Ok(account)
    }

    /// Resumes a persisted order when its URI is still usable, otherwise
    /// opens a fresh order and persists its location.
    async fn load_or_open_order(
        &self,
        account: &dyn AcmeAccount,
        domains: &[String],
        primary: &str,
    ) -> Result<Box<dyn AcmeOrder>, OrderError> {
        if let Some(uri) = self.orders.load(primary).await? {
            match self.resume_order(account, &uri).await {
                Some(order) => {
                    info!("resuming persisted order {uri} for {primary}");
                    return Ok(order);
                }
                None => {
                    if let Err(e) = self.orders.delete(primary).await {
                        warn!("failed to drop stale order record for {primary}: {e}");
                    }
                }
            }
        }

        let order = account.new_order(domains).await?;
        self.orders.save(primary, order.location()).await?;
        Ok(order)
    }

    async fn resume_order(&self, account: &dyn AcmeAccount, uri: &str) -> Option<Box<dyn AcmeOrder>> {
        let order = match account.order(uri).await {
            Ok(order) => order,
            Err(e) => {
                warn!("persisted order {uri} could not be fetched: {e}");
                return None;
            }
        };
        match order.state().await {
            Ok(state) if state.status != OrderStatus::Invalid => Some(order),
            Ok(state) => {
                warn!("persisted order {uri} is {:?}, opening a new one", state.status);
                None
            }
            Err(e) => {
                warn!("persisted order {uri} state unavailable: {e}");
                None
            }
        }
    }
}

fn build_csr(
    config: &AutoCertConfig,
    domains: &[String],
    primary: &str,
    key_pair: &rcgen::KeyPair,
) -> Result<Vec<u8>, OrderError> {
    let mut params = rcgen::CertificateParams::new(domains.to_vec()).map_err(KeyError::from)?;
    params.distinguished_name = config.csr.distinguished_name(primary);
    let csr = params.serialize_request(key_pair).map_err(KeyError::from)?;
    Ok(csr.der().to_vec())
}
