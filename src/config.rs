use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Directory URL of the Let's Encrypt production environment.
pub const LETS_ENCRYPT_PRODUCTION_DIRECTORY: &str =
    "https://acme-v02.api.letsencrypt.org/directory";

/// Directory URL of the Let's Encrypt staging environment.
///
/// The production directory imposes strict rate limits, which are easily
/// exhausted accidentally during testing and development.
pub const LETS_ENCRYPT_STAGING_DIRECTORY: &str =
    "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Configuration for the certificate lifecycle engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoCertConfig {
    /// Email address used for ACME account registration.
    pub email: String,
    /// ACME directory URL of the certificate authority.
    pub directory_url: String,
    /// Filesystem path used by the directory-backed stores and lock files.
    pub certificate_path: String,
    /// Key ID for External Account Binding (EAB). Required by some
    /// providers, e.g. ZeroSSL.
    pub account_key_id: Option<String>,
    /// HMAC key for External Account Binding (EAB).
    pub account_hmac_key: Option<String>,
    /// Whether the CA's terms of service are agreed to.
    pub terms_of_service_agreed: bool,
    /// Subject fields for generated certificate signing requests.
    pub csr: CsrProfile,
    /// Interval between renewal checks. Defaults to 24 hours.
    pub renewal_check_interval: Duration,
    /// Remaining lifetime below which a certificate is renewed.
    /// Defaults to 30 days.
    pub renewal_threshold: Duration,
    /// Budget for challenge validation polling. Defaults to 60 seconds.
    pub validation_timeout: Duration,
    /// Delay to wait for DNS propagation before validating dns-01
    /// challenges. Defaults to 30 seconds.
    pub dns_propagation_delay: Duration,
    /// Password protecting stored PKCS#12 bundles and the account key at
    /// rest. Must be set and at least 8 characters long.
    pub certificate_password: String,
    /// Algorithm for generated private keys. Defaults to ES256.
    pub key_algorithm: KeyAlgorithm,
    /// Domains kept valid automatically by the renewal scheduler.
    pub managed_domains: Vec<String>,
}

impl Default for AutoCertConfig {
    fn default() -> Self {
        Self {
            email: String::new(),
            directory_url: LETS_ENCRYPT_PRODUCTION_DIRECTORY.to_string(),
            certificate_path: "certificates".to_string(),
            account_key_id: None,
            account_hmac_key: None,
            terms_of_service_agreed: false,
            csr: CsrProfile::default(),
            renewal_check_interval: Duration::from_secs(24 * 60 * 60),
            renewal_threshold: Duration::from_secs(30 * 24 * 60 * 60),
            validation_timeout: Duration::from_secs(60),
            dns_propagation_delay: Duration::from_secs(30),
            certificate_password: String::new(),
            key_algorithm: KeyAlgorithm::ES256,
            managed_domains: Vec::new(),
        }
    }
}

impl AutoCertConfig {
    /// Checks the invariants that must hold before any operation runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let password = self.certificate_password.trim();
        if password.is_empty() || password.len() < 8 {
            return Err(ConfigError::WeakPassword);
        }
        Ok(())
    }

    /// Whether External Account Binding credentials are configured.
    pub fn has_eab(&self) -> bool {
        matches!((&self.account_key_id, &self.account_hmac_key), (Some(id), Some(hmac))
            if !id.is_empty() && !hmac.is_empty())
    }
}

/// Subject fields used when building certificate signing requests.
/// The common name is always the primary ordered domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CsrProfile {
    pub country: String,
    pub state: String,
    pub locality: String,
    pub organization: String,
    pub organizational_unit: String,
}

impl CsrProfile {
    pub(crate) fn distinguished_name(&self, common_name: &str) -> rcgen::DistinguishedName {
        let mut name = rcgen::DistinguishedName::new();
        for (ty, value) in [
            (rcgen::DnType::CountryName, &self.country),
            (rcgen::DnType::StateOrProvinceName, &self.state),
            (rcgen::DnType::LocalityName, &self.locality),
            (rcgen::DnType::OrganizationName, &self.organization),
            (rcgen::DnType::OrganizationalUnitName, &self.organizational_unit),
        ] {
            if !value.is_empty() {
                name.push(ty, value.as_str());
            }
        }
        name.push(rcgen::DnType::CommonName, common_name);
        name
    }
}

/// Algorithm used for generated private keys (account and certificate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    /// ECDSA over P-256 with SHA-256.
    #[default]
    ES256,
    /// ECDSA over P-384 with SHA-384.
    ES384,
    /// ECDSA over P-521 with SHA-512. Not supported by the ring backend.
    ES521,
    /// RSA 2048 with SHA-256. ring cannot generate RSA keys.
    RS256,
}

impl KeyAlgorithm {
    /// Generates a fresh key pair with this algorithm.
    pub fn generate_key_pair(&self) -> Result<rcgen::KeyPair, KeyError> {
        let alg = match self {
            KeyAlgorithm::ES256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            KeyAlgorithm::ES384 => &rcgen::PKCS_ECDSA_P384_SHA384,
            KeyAlgorithm::ES521 => return Err(KeyError::Unsupported(*self)),
            KeyAlgorithm::RS256 => &rcgen::PKCS_RSA_SHA256,
        };
        Ok(rcgen::KeyPair::generate_for(alg)?)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("certificate_password must be set and at least 8 characters long")]
    WeakPassword,
}

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("key algorithm {0:?} is not supported by the crypto backend")]
    Unsupported(KeyAlgorithm),
    #[error("key generation failed: {0}")]
    Generation(#[from] rcgen::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AutoCertConfig::default();
        assert_eq!(config.renewal_check_interval, Duration::from_secs(86_400));
        assert_eq!(config.renewal_threshold, Duration::from_secs(2_592_000));
        assert_eq!(config.validation_timeout, Duration::from_secs(60));
        assert_eq!(config.dns_propagation_delay, Duration::from_secs(30));
        assert_eq!(config.key_algorithm, KeyAlgorithm::ES256);
    }

    #[test]
    fn validate_rejects_missing_or_short_password() {
        let mut config = AutoCertConfig::default();
        assert!(config.validate().is_err());
        config.certificate_password = "short".to_string();
        assert!(config.validate().is_err());
        config.certificate_password = "long enough".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn eab_requires_both_credentials() {
        let mut config = AutoCertConfig::default();
        assert!(!config.has_eab());
        config.account_key_id = Some("kid-1".to_string());
        assert!(!config.has_eab());
        config.account_hmac_key = Some("secret".to_string());
        assert!(config.has_eab());
    }

    #[test]
    fn partial_json_config_falls_back_to_defaults() {
        let config: AutoCertConfig = serde_json::from_str(
            r#"{
                "email": "admin@example.com",
                "certificate_password": "test-password-1",
                "managed_domains": ["example.com"]
            }"#,
        )
        .unwrap();
        assert_eq!(config.email, "admin@example.com");
        assert_eq!(config.managed_domains, vec!["example.com"]);
        assert_eq!(config.directory_url, LETS_ENCRYPT_PRODUCTION_DIRECTORY);
        assert_eq!(config.renewal_check_interval, Duration::from_secs(86_400));
    }

    #[test]
    fn config_json_round_trip() {
        let mut config = AutoCertConfig::default();
        config.email = "admin@example.com".to_string();
        config.key_algorithm = KeyAlgorithm::ES384;

        let json = serde_json::to_string(&config).unwrap();
        let back: AutoCertConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.email, config.email);
        assert_eq!(back.key_algorithm, KeyAlgorithm::ES384);
        assert_eq!(back.renewal_threshold, config.renewal_threshold);
    }

    #[test]
    fn es256_key_generation_succeeds() {
        assert!(KeyAlgorithm::ES256.generate_key_pair().is_ok());
    }

    #[test]
    fn es521_reports_unsupported() {
        assert!(matches!(
            KeyAlgorithm::ES521.generate_key_pair(),
            Err(KeyError::Unsupported(KeyAlgorithm::ES521))
        ));
    }
}
