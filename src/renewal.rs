//! Background renewal loop for managed domains.

use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::lifecycle::AutoCert;

/// Periodically checks every managed domain and renews certificates that
/// are missing or within the renewal threshold of expiry.
///
/// Domains are checked sequentially and failures are isolated: one failing
/// domain never stops the others from being checked.
pub struct RenewalScheduler {
    engine: Arc<AutoCert>,
}

impl RenewalScheduler {
    pub fn new(engine: Arc<AutoCert>) -> Self {
        Self { engine }
    }

    /// Runs renewal checks until the token is cancelled. Cancellation is
    /// honored promptly, including between domains of one sweep.
    pub async fn run(&self, cancel: CancellationToken) {
        let interval = self.engine.config().renewal_check_interval;
        info!(
            "renewal scheduler started, checking every {}s",
            interval.as_secs()
        );
        loop {
            self.run_once(&cancel).await;
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("renewal scheduler stopped");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// One sweep over all managed domains.
    pub async fn run_once(&self, cancel: &CancellationToken) {
        let domains = self.engine.config().managed_domains.clone();
        for domain in &domains {
            if cancel.is_cancelled() {
                return;
            }
            if let Err(e) = self.check_domain(domain, cancel).await {
                warn!("renewal check for {domain} failed: {e}");
                if let Some(metrics) = self.engine.metrics() {
                    metrics.renewal_failures.inc();
                }
                for hook in self.engine.hooks() {
                    if let Err(hook_err) = hook.on_renewal_failed(domain, &e).await {
                        warn!("lifecycle hook failed for {domain}: {hook_err}");
                    }
                }
            }
        }
    }

    async fn check_domain(
        &self,
        domain: &str,
        cancel: &CancellationToken,
    ) -> Result<(), crate::error::OrderError> {
        let stored = self.engine.certificates().load(domain).await?;
        let threshold = self.engine.config().renewal_threshold;

        match stored {
            None => {
                info!("no certificate stored for {domain}, ordering one");
                self.engine
                    .order_certificate(&[domain.to_string()], cancel)
                    .await?;
            }
            Some(certificate) => {
                let remaining = certificate.remaining(Utc::now());
                if let Some(metrics) = self.engine.metrics() {
                    metrics
                        .certificate_expiry_days
                        .with_label_values(&[domain])
                        .set(remaining.num_seconds() as f64 / 86_400.0);
                }
                if remaining <= chrono::Duration::seconds(threshold.as_secs() as i64) {
                    info!(
                        "certificate for {domain} expires in {}h, renewing",
                        remaining.num_hours()
                    );
                    self.engine
                        .order_certificate(&[domain.to_string()], cancel)
                        .await?;
                } else {
                    info!(
                        "certificate for {domain} is valid for another {} days",
                        remaining.num_days()
                    );
                }
            }
        }
        Ok(())
    }
}

/// Spawns the scheduler onto the current runtime.
pub fn spawn(engine: Arc<AutoCert>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        RenewalScheduler::new(engine).run(cancel).await;
    })
}
