use thiserror::Error;

use crate::acme::AcmeError;
use crate::config::KeyError;
use crate::lock::LockError;
use crate::pkcs12::Pkcs12Error;
use crate::store::StoreError;

/// Failures surfaced by the lifecycle operations.
///
/// The renewal scheduler treats every variant the same way: log, notify the
/// lifecycle hooks, and keep going with the next domain. Callers that drive
/// the orchestrator directly can match on the variants they care about.
#[derive(Error, Debug)]
pub enum OrderError {
    #[error("at least one domain must be specified")]
    NoDomains,
    /// No registered challenge handler managed to validate the authorization.
    /// The persisted order is left in place so a later attempt can resume it.
    #[error("no challenge handler validated the authorization for {identifier}")]
    ValidationFailed { identifier: String },
    #[error("no account key is stored")]
    AccountMissing,
    #[error("no certificate is stored for {domain}")]
    CertificateNotFound { domain: String },
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Acme(#[from] AcmeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Pkcs12(#[from] Pkcs12Error),
    #[error(transparent)]
    Key(#[from] KeyError),
}
