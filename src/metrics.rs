//! Prometheus instrumentation for the certificate lifecycle.
//!
//! Collectors register against a caller-supplied [`prometheus::Registry`],
//! so embedding applications expose them through whatever scrape endpoint
//! they already run.

use prometheus::{GaugeVec, Histogram, HistogramOpts, IntCounter, Opts, Registry};

#[derive(Clone)]
pub struct Metrics {
    pub certificates_renewed: IntCounter,
    pub renewal_failures: IntCounter,
    pub challenge_validation_seconds: Histogram,
    pub certificate_expiry_days: GaugeVec,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let certificates_renewed = IntCounter::with_opts(Opts::new(
            "acme_certificates_renewed_total",
            "Certificates successfully ordered or renewed",
        ))?;
        let renewal_failures = IntCounter::with_opts(Opts::new(
            "acme_certificate_renewal_failures_total",
            "Certificate orders or renewals that ended in an error",
        ))?;
        let challenge_validation_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "acme_challenge_validation_seconds",
                "Wall-clock time spent validating one authorization",
            )
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
        )?;
        let certificate_expiry_days = GaugeVec::new(
            Opts::new(
                "acme_certificate_expiry_days",
                "Days until the stored certificate for a domain expires",
            ),
            &["domain"],
        )?;

        registry.register(Box::new(certificates_renewed.clone()))?;
        registry.register(Box::new(renewal_failures.clone()))?;
        registry.register(Box::new(challenge_validation_seconds.clone()))?;
        registry.register(Box::new(certificate_expiry_days.clone()))?;

        Ok(Self {
            certificates_renewed,
            renewal_failures,
            challenge_validation_seconds,
            certificate_expiry_days,
        })
    }
}

#[cfg(test)]
mod tests {
    use prometheus::{Encoder, TextEncoder};

    use super::*;

    #[test]
    fn collectors_register_and_export() {
        let registry = Registry::new();
        let metrics = Metrics::new(&registry).unwrap();

        metrics.certificates_renewed.inc();
        metrics
            .certificate_expiry_days
            .with_label_values(&["example.com"])
            .set(42.0);

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .unwrap();
        let exported = String::from_utf8(buffer).unwrap();
        assert!(exported.contains("acme_certificates_renewed_total 1"));
        assert!(exported.contains("acme_certificate_expiry_days{domain=\"example.com\"} 42"));
    }

    #[test]
    fn double_registration_fails() {
        let registry = Registry::new();
        Metrics::new(&registry).unwrap();
        assert!(Metrics::new(&registry).is_err());
    }
}
