//! Keyed mutual exclusion.
//!
//! Every mutating lifecycle operation runs under a named lock
//! (`cert:<domain>`, `account:rollover`). Guards release on drop, so the
//! lock is freed on every exit path of the caller. Acquisition waits
//! observe the caller's cancellation token and abort immediately instead of
//! running out their timeout.

use std::collections::HashMap;
use std::fs::TryLockError;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, error};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A held lock. Dropping the guard releases it.
pub trait LockGuard: Send + Sync {}

#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Blocks until the keyed lock is acquired, the provider's wait budget
    /// elapses ([`LockError::Timeout`]) or `cancel` fires
    /// ([`LockError::Cancelled`]).
    async fn acquire(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn LockGuard>, LockError>;
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("timed out waiting for lock: {key}")]
    Timeout { key: String },
    #[error("lock wait cancelled: {key}")]
    Cancelled { key: String },
    #[error("lock backend error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync + 'static>),
}

fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Lock provider backed by OS advisory locks on files under
/// `<dir>/.locks/<key>.lock`. The guard keeps the locked handle open; the
/// kernel releases the lock when the handle closes, including when the
/// holding process dies, so a leftover lock file never blocks a later
/// acquirer. Contention is retried on a fixed 200ms backoff until the wait
/// budget (30s by default) elapses.
pub struct FileLockProvider {
    dir: PathBuf,
    retry: Duration,
    timeout: Duration,
}

impl FileLockProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            retry: Duration::from_millis(200),
            timeout: Duration::from_secs(30),
        }
    }

    /// Overrides the wait budget. Mostly useful in tests.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join(".locks").join(format!("{}.lock", sanitize(key)))
    }
}

#[async_trait]
impl LockProvider for FileLockProvider {
    async fn acquire(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn LockGuard>, LockError> {
        let path = self.lock_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LockError::Backend(e.into()))?;
        }

        let started = Instant::now();
        loop {
            let file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .open(&path)
                .map_err(|e| LockError::Backend(e.into()))?;
            match file.try_lock() {
                Ok(()) => {
                    debug!("acquired lock for {key}");
                    return Ok(Box::new(FileLock {
                        key: key.to_string(),
                        _file: file,
                    }));
                }
                Err(TryLockError::WouldBlock) => {
                    if started.elapsed() > self.timeout {
                        error!("timed out waiting for lock: {key}");
                        return Err(LockError::Timeout {
                            key: key.to_string(),
                        });
                    }
                }
                Err(TryLockError::Error(e)) => return Err(LockError::Backend(e.into())),
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(LockError::Cancelled { key: key.to_string() });
                }
                _ = tokio::time::sleep(self.retry) => {}
            }
        }
    }
}

/// The lock file itself stays behind; the OS lock on the open handle is
/// what other acquirers contend on, and closing the handle releases it.
struct FileLock {
    key: String,
    _file: std::fs::File,
}

impl LockGuard for FileLock {}

impl Drop for FileLock {
    fn drop(&mut self) {
        debug!("released lock for {}", self.key);
    }
}

/// Narrow contract over an external lease service (e.g. Redis SET NX with
/// expiry). Leases expire on their own, which is what gives crash safety.
#[async_trait]
pub trait LeaseClient: Send + Sync {
    /// Attempts to take the lease; returns false when it is already held.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, LockError>;
    async fn release(&self, key: &str) -> Result<(), LockError>;
}

/// Lock provider over a [`LeaseClient`]: 30s lease expiry, 30s maximum
/// wait, 1s retry interval.
pub struct DistributedLockProvider {
    client: Arc<dyn LeaseClient>,
    expiry: Duration,
    wait: Duration,
    retry: Duration,
}

impl DistributedLockProvider {
    pub fn new(client: Arc<dyn LeaseClient>) -> Self {
        Self {
            client,
            expiry: Duration::from_secs(30),
            wait: Duration::from_secs(30),
            retry: Duration::from_secs(1),
        }
    }

    /// Overrides the acquisition timing. Mostly useful in tests.
    pub fn with_timing(mut self, expiry: Duration, wait: Duration, retry: Duration) -> Self {
        self.expiry = expiry;
        self.wait = wait;
        self.retry = retry;
        self
    }
}

#[async_trait]
impl LockProvider for DistributedLockProvider {
    async fn acquire(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn LockGuard>, LockError> {
        let started = Instant::now();
        loop {
            if self.client.try_acquire(key, self.expiry).await? {
                debug!("acquired distributed lock for {key}");
                return Ok(Box::new(DistributedLock {
                    key: key.to_string(),
                    client: Arc::clone(&self.client),
                }));
            }
            if started.elapsed() + self.retry > self.wait {
                error!("failed to acquire distributed lock for {key}");
                return Err(LockError::Timeout {
                    key: key.to_string(),
                });
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(LockError::Cancelled { key: key.to_string() });
                }
                _ = tokio::time::sleep(self.retry) => {}
            }
        }
    }
}

struct DistributedLock {
    key: String,
    client: Arc<dyn LeaseClient>,
}

impl LockGuard for DistributedLock {}

impl Drop for DistributedLock {
    fn drop(&mut self) {
        let key = std::mem::take(&mut self.key);
        let client = Arc::clone(&self.client);
        // Off-runtime drops fall back to lease expiry.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = client.release(&key).await {
                    error!("failed to release distributed lock for {key}: {e}");
                } else {
                    debug!("released distributed lock for {key}");
                }
            });
        }
    }
}

/// In-process [`LeaseClient`] honoring lease expiry. Backs tests and
/// single-instance deployments.
#[derive(Default)]
pub struct MemoryLeaseClient {
    leases: Mutex<HashMap<String, Instant>>,
}

impl MemoryLeaseClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseClient for MemoryLeaseClient {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut leases = self.leases.lock().unwrap();
        let now = Instant::now();
        match leases.get(key) {
            Some(expires) if *expires > now => Ok(false),
            _ => {
                leases.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str) -> Result<(), LockError> {
        self.leases.lock().unwrap().remove(key);
        Ok(())
    }
}
