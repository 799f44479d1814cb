//! Automated [ACME] certificate lifecycle management for the tokio runtime.
//!
//! The crate keeps a set of domains covered by valid certificates: it
//! registers and maintains the ACME account, orders certificates, validates
//! domain ownership through pluggable challenge handlers (http-01 and
//! dns-01), packages issued chains as password-protected PKCS#12 bundles,
//! and renews everything in the background before expiry. The ACME wire
//! protocol itself (JWS, nonces, directory discovery) is intentionally
//! behind the [`acme`] traits, so any protocol client can drive the engine.
//!
//! The central type is [`AutoCert`]. It is built from a validated
//! [`AutoCertConfig`] plus its collaborators, and every long-running wait
//! observes a [`tokio_util::sync::CancellationToken`]:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tokio_autocert::{AutoCert, AutoCertConfig, Http01Handler};
//! use tokio_autocert::stores::{FsAccountStore, FsCertificateStore, FsOrderStore, MemoryChallengeStore};
//! use tokio_autocert::FileLockProvider;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = AutoCertConfig {
//!     email: "admin@example.com".to_string(),
//!     certificate_password: "at-least-eight".to_string(),
//!     terms_of_service_agreed: true,
//!     managed_domains: vec!["example.com".to_string()],
//!     ..AutoCertConfig::default()
//! };
//!
//! let challenges = Arc::new(MemoryChallengeStore::new());
//! let engine = Arc::new(
//!     AutoCert::new(
//!         config.clone(),
//!         directory, // any impl of the acme::AcmeDirectory trait
//!         Arc::new(FsAccountStore::new(&config.certificate_path, Default::default())),
//!         Arc::new(FsCertificateStore::new(&config.certificate_path, &config.certificate_password)),
//!         Arc::new(FsOrderStore::new(&config.certificate_path)),
//!         Arc::new(FileLockProvider::new(&config.certificate_path)),
//!     )?
//!     .with_handler(Arc::new(Http01Handler::new(challenges, config.validation_timeout))),
//! );
//!
//! let cancel = CancellationToken::new();
//! tokio_autocert::renewal::spawn(engine, cancel.clone());
//! ```
//!
//! ## Storage
//!
//! Certificates, the account key, in-flight order URIs and http-01
//! responses each live behind a narrow store trait in [`store`]. The
//! [`stores`] module ships in-memory, filesystem and key-value-backed
//! implementations, and [`stores::Layered`] composes a fast tier with a
//! durable tier into a self-healing read-through cache.
//!
//! ## Concurrency
//!
//! Mutating operations serialize through a [`LockProvider`]:
//! [`FileLockProvider`] covers processes sharing a filesystem, while
//! [`DistributedLockProvider`] coordinates across hosts through a
//! [`LeaseClient`] backend such as Redis.
//!
//! Note that all defaults point at the Let's Encrypt production directory.
//! The production directory imposes strict rate limits, which are easily
//! exhausted accidentally during testing and development; use
//! [`LETS_ENCRYPT_STAGING_DIRECTORY`] while developing.
//!
//! [ACME]: https://en.wikipedia.org/wiki/Automatic_Certificate_Management_Environment

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod acme;
mod challenge;
mod config;
mod error;
mod lifecycle;
mod lock;
mod metrics;
mod pkcs12;
pub mod renewal;
mod selector;
pub mod store;
pub mod stores;
#[cfg(test)]
mod test_support;

pub use challenge::*;
pub use config::*;
pub use error::*;
pub use lifecycle::*;
pub use lock::*;
pub use metrics::*;
pub use pkcs12::*;
pub use renewal::RenewalScheduler;
pub use selector::*;
