//! Contract for the external ACME protocol client.
//!
//! The wire protocol itself (JWS signing, nonces, directory discovery) is
//! out of scope for this crate. The lifecycle engine drives any client that
//! implements these traits; a fake implementation is enough for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// External Account Binding credentials handed to account registration.
#[derive(Debug, Clone)]
pub struct ExternalAccountBinding {
    pub key_id: String,
    pub hmac_key: String,
}

/// RFC 8555 order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// RFC 8555 authorization status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

/// RFC 8555 challenge status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl ChallengeStatus {
    /// Whether the status can still change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChallengeStatus::Valid | ChallengeStatus::Invalid)
    }
}

/// Challenge types the engine knows how to dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    Http01,
    Dns01,
}

impl ChallengeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeKind::Http01 => "http-01",
            ChallengeKind::Dns01 => "dns-01",
        }
    }
}

impl std::fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RFC 5280 revocation reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    Superseded,
    CessationOfOperation,
}

/// Snapshot of an order resource.
#[derive(Debug, Clone)]
pub struct OrderState {
    pub status: OrderStatus,
    pub identifiers: Vec<String>,
}

/// Snapshot of an authorization resource.
#[derive(Debug, Clone)]
pub struct AuthorizationState {
    /// The domain this authorization proves control over. May carry a
    /// leading `*.` for wildcard identifiers.
    pub identifier: String,
    pub status: AuthorizationStatus,
}

/// Entry point: the directory of one certificate authority.
#[async_trait]
pub trait AcmeDirectory: Send + Sync {
    /// Restores the account bound to a previously persisted key.
    async fn restore_account(&self, key_pem: &str) -> Result<Box<dyn AcmeAccount>, AcmeError>;

    /// Registers a new account, generating a fresh account key.
    /// Returns the account together with the key PEM to persist.
    async fn new_account(
        &self,
        contact: &[String],
        terms_of_service_agreed: bool,
        eab: Option<&ExternalAccountBinding>,
    ) -> Result<(Box<dyn AcmeAccount>, String), AcmeError>;
}

/// An account context bound to a key.
#[async_trait]
pub trait AcmeAccount: Send + Sync {
    async fn new_order(&self, domains: &[String]) -> Result<Box<dyn AcmeOrder>, AcmeError>;

    /// Binds to an existing order by its location URI.
    async fn order(&self, uri: &str) -> Result<Box<dyn AcmeOrder>, AcmeError>;

    async fn revoke_certificate(
        &self,
        certificate_der: &[u8],
        reason: RevocationReason,
    ) -> Result<(), AcmeError>;

    /// Requests an account key change to the given key.
    async fn change_key(&self, new_key_pem: &str) -> Result<(), AcmeError>;
}

#[async_trait]
pub trait AcmeOrder: Send + Sync {
    /// The order's location URI, stable across restarts.
    fn location(&self) -> &str;

    /// Fetches the current order resource.
    async fn state(&self) -> Result<OrderState, AcmeError>;

    async fn authorizations(&self) -> Result<Vec<Box<dyn AcmeAuthorization>>, AcmeError>;

    async fn finalize(&self, csr_der: &[u8]) -> Result<(), AcmeError>;

    /// Downloads the issued certificate chain as DER, leaf first.
    async fn download(&self) -> Result<Vec<Vec<u8>>, AcmeError>;
}

#[async_trait]
pub trait AcmeAuthorization: Send + Sync {
    async fn state(&self) -> Result<AuthorizationState, AcmeError>;

    /// The challenge of the given type offered by this authorization, if any.
    async fn challenge(
        &self,
        kind: ChallengeKind,
    ) -> Result<Option<Box<dyn AcmeChallenge>>, AcmeError>;
}

#[async_trait]
pub trait AcmeChallenge: Send + Sync {
    fn token(&self) -> &str;

    /// The key authorization string for this challenge and account.
    fn key_authorization(&self) -> String;

    /// Asks the CA to start validating this challenge.
    async fn validate(&self) -> Result<(), AcmeError>;

    /// Re-fetches the challenge resource and returns its status.
    async fn status(&self) -> Result<ChallengeStatus, AcmeError>;
}

#[derive(Error, Debug)]
pub enum AcmeError {
    #[error("acme protocol error: {detail}")]
    Protocol { detail: String },
    #[error("transport error: {0}")]
    Transport(Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error("invalid account key: {0}")]
    InvalidKey(String),
}

impl AcmeError {
    pub fn protocol(detail: impl Into<String>) -> Self {
        AcmeError::Protocol {
            detail: detail.into(),
        }
    }
}
