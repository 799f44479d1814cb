//! Pluggable domain-ownership validation strategies.
//!
//! Each handler drives one ACME challenge type end to end: publish the
//! proof, ask the CA to validate, poll until a terminal status. Handlers
//! share one failure contract: a terminal `invalid` status is
//! [`ChallengeError::Rejected`], an exhausted polling budget is
//! [`ChallengeError::Timeout`]. The lifecycle engine treats any handler
//! error as a failed attempt and moves on to the next registered handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use log::{debug, info, warn};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::acme::{AcmeAuthorization, AcmeChallenge, AcmeError, ChallengeKind, ChallengeStatus};
use crate::store::{ChallengeStore, StoreError};

/// How long a published http-01 response stays served.
const HTTP_RESPONSE_TTL: Duration = Duration::from_secs(300);

/// One domain-ownership validation strategy.
#[async_trait]
pub trait ChallengeHandler: Send + Sync {
    fn kind(&self) -> ChallengeKind;

    /// Runs the strategy against one authorization. `Ok(())` means the
    /// authorization reached a valid status.
    async fn handle(
        &self,
        authorization: &dyn AcmeAuthorization,
        cancel: &CancellationToken,
    ) -> Result<(), ChallengeError>;
}

#[derive(Error, Debug)]
pub enum ChallengeError {
    #[error("{kind} challenge was rejected by the CA")]
    Rejected { kind: ChallengeKind },
    #[error("{kind} challenge validation timed out")]
    Timeout { kind: ChallengeKind },
    #[error("challenge validation cancelled")]
    Cancelled,
    #[error("authorization offers no {0} challenge")]
    NotOffered(ChallengeKind),
    #[error(transparent)]
    Acme(#[from] AcmeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Dns(#[from] DnsError),
}

/// External DNS automation used by the dns-01 handler.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn create_txt_record(&self, name: &str, value: &str) -> Result<(), DnsError>;
    async fn delete_txt_record(&self, name: &str, value: &str) -> Result<(), DnsError>;
}

#[derive(Error, Debug)]
pub enum DnsError {
    #[error("dns api error: {0}")]
    Api(String),
    #[error("dns authentication error: {0}")]
    Authentication(String),
    #[error("dns record not found: {0}")]
    RecordNotFound(String),
    #[error("dns configuration error: {0}")]
    Configuration(String),
}

/// Handles http-01: publishes `(token -> key-authorization)` into the
/// challenge store, from which an external endpoint serves
/// `/.well-known/acme-challenge/{token}`.
pub struct Http01Handler {
    store: Arc<dyn ChallengeStore>,
    validation_timeout: Duration,
}

impl Http01Handler {
    pub fn new(store: Arc<dyn ChallengeStore>, validation_timeout: Duration) -> Self {
        Self {
            store,
            validation_timeout,
        }
    }
}

#[async_trait]
impl ChallengeHandler for Http01Handler {
    fn kind(&self) -> ChallengeKind {
        ChallengeKind::Http01
    }

    async fn handle(
        &self,
        authorization: &dyn AcmeAuthorization,
        cancel: &CancellationToken,
    ) -> Result<(), ChallengeError> {
        let challenge = authorization
            .challenge(ChallengeKind::Http01)
            .await?
            .ok_or(ChallengeError::NotOffered(ChallengeKind::Http01))?;

        let token = challenge.token().to_string();
        debug!("received http-01 challenge, token: {token}");
        self.store
            .put(&token, &challenge.key_authorization(), HTTP_RESPONSE_TTL)
            .await?;

        info!("requesting validation for http-01 challenge");
        challenge.validate().await?;

        let status = poll_until_terminal(
            challenge.as_ref(),
            Duration::from_secs(1),
            Some(self.validation_timeout),
            ChallengeKind::Http01,
            cancel,
        )
        .await?;

        if status != ChallengeStatus::Valid {
            warn!("http-01 challenge validation failed with status {status:?}");
            return Err(ChallengeError::Rejected {
                kind: ChallengeKind::Http01,
            });
        }
        info!("http-01 challenge valid");
        Ok(())
    }
}

/// Handles dns-01: creates the `_acme-challenge` TXT record through the
/// DNS provider, waits out propagation, validates, and always deletes the
/// record again no matter how validation ends.
pub struct Dns01Handler {
    dns: Arc<dyn DnsProvider>,
    propagation_delay: Duration,
}

impl Dns01Handler {
    pub fn new(dns: Arc<dyn DnsProvider>, propagation_delay: Duration) -> Self {
        Self {
            dns,
            propagation_delay,
        }
    }

    async fn publish_and_validate(
        &self,
        challenge: &dyn AcmeChallenge,
        record_name: &str,
        txt_value: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ChallengeError> {
        info!(
            "creating TXT record {record_name}, waiting {}s for propagation",
            self.propagation_delay.as_secs()
        );
        self.dns.create_txt_record(record_name, txt_value).await?;

        tokio::select! {
            _ = cancel.cancelled() => return Err(ChallengeError::Cancelled),
            _ = tokio::time::sleep(self.propagation_delay) => {}
        }

        info!("validating dns-01 challenge");
        challenge.validate().await?;

        let status = poll_until_terminal(
            challenge,
            Duration::from_secs(2),
            None,
            ChallengeKind::Dns01,
            cancel,
        )
        .await?;

        if status != ChallengeStatus::Valid {
            warn!("dns-01 challenge failed with status {status:?}");
            return Err(ChallengeError::Rejected {
                kind: ChallengeKind::Dns01,
            });
        }
        info!("dns-01 challenge validated successfully");
        Ok(())
    }
}

#[async_trait]
impl ChallengeHandler for Dns01Handler {
    fn kind(&self) -> ChallengeKind {
        ChallengeKind::Dns01
    }

    async fn handle(
        &self,
        authorization: &dyn AcmeAuthorization,
        cancel: &CancellationToken,
    ) -> Result<(), ChallengeError> {
        let challenge = authorization
            .challenge(ChallengeKind::Dns01)
            .await?
            .ok_or(ChallengeError::NotOffered(ChallengeKind::Dns01))?;
        let identifier = authorization.state().await?.identifier;

        let record_name = dns_record_name(&identifier);
        let txt_value = dns_txt_value(&challenge.key_authorization());
        info!("handling dns-01 challenge for {identifier}, record: {record_name}");

        let outcome = self
            .publish_and_validate(challenge.as_ref(), &record_name, &txt_value, cancel)
            .await;

        // Cleanup runs on every exit path, including rejection, timeout
        // and cancellation.
        info!("cleaning up TXT record {record_name}");
        if let Err(e) = self.dns.delete_txt_record(&record_name, &txt_value).await {
            warn!("failed to delete TXT record {record_name}: {e}");
        }

        outcome
    }
}

/// TXT record name for an identifier; wildcard prefixes are stripped.
pub fn dns_record_name(identifier: &str) -> String {
    let host = identifier.trim_start_matches('*').trim_start_matches('.');
    format!("_acme-challenge.{host}")
}

/// TXT record value: base64url(SHA-256(key-authorization)), unpadded.
pub fn dns_txt_value(key_authorization: &str) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, key_authorization.as_bytes());
    URL_SAFE_NO_PAD.encode(digest.as_ref())
}

/// Polls the challenge resource at a fixed interval until it reaches a
/// terminal status. With a budget, exceeding it fails with
/// [`ChallengeError::Timeout`]; without one, only cancellation stops the
/// wait.
async fn poll_until_terminal(
    challenge: &dyn AcmeChallenge,
    interval: Duration,
    budget: Option<Duration>,
    kind: ChallengeKind,
    cancel: &CancellationToken,
) -> Result<ChallengeStatus, ChallengeError> {
    let max_polls = budget.map(|b| (b.as_secs_f64() / interval.as_secs_f64()).ceil() as u64);
    let mut polls: u64 = 0;

    let mut status = challenge.status().await?;
    while !status.is_terminal() {
        if let Some(max) = max_polls {
            if polls >= max {
                warn!("validation timed out for {kind} challenge");
                return Err(ChallengeError::Timeout { kind });
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(ChallengeError::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
        status = challenge.status().await?;
        polls += 1;
    }
    Ok(status)
}
