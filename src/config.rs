use std::collections::HashMap;
use std::path::PathBuf;

use ::config::{Config as ConfigLib, ConfigError, Environment as EnvSource, File};

use crate::bank::{self, Bank, BankProfile, Command};
use crate::digest::DigestMethod;
use crate::error::{Error, Result};
use crate::params::{Environment, SigningParameters};
use crate::trust::TrustVerifier;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub environment: Environment,
    pub digest_method: DigestMethod,
    pub templates_dir: PathBuf,
    /// PEM root certificate path per bank, keyed by bank name.
    #[serde(default)]
    pub root_certificates: HashMap<String, PathBuf>,
}

impl ClientConfig {
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    pub fn load_with_sources(
        overrides: Option<HashMap<String, String>>,
    ) -> std::result::Result<Self, ConfigError> {
        let mut builder = ConfigLib::builder()
            .set_default("environment", "test")?
            .set_default("digest_method", "sha1")?
            .set_default("templates_dir", bank::bundled_templates().to_string_lossy().to_string())?
            .add_source(File::with_name("config/sepafm").required(false));

        // explicit overrides replace the process environment entirely
        if let Some(vars) = overrides {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // SEPAFM_ENVIRONMENT, SEPAFM_ROOT_CERTIFICATES__NORDEA, ...
            builder = builder.add_source(
                EnvSource::with_prefix("SEPAFM")
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        builder.build()?.try_deserialize()
    }

    pub fn profile(&self, bank: Bank) -> Box<dyn BankProfile> {
        bank::profile_for(bank, self.templates_dir.clone())
    }

    /// Parameters pre-filled with the configured environment and digest method.
    pub fn parameters(&self, bank: Bank, command: Command, customer_id: &str) -> SigningParameters {
        SigningParameters::new(bank, command, customer_id)
            .environment(self.environment)
            .digest_method(self.digest_method)
    }

    pub fn root_certificate(&self, bank: Bank) -> Result<openssl::x509::X509> {
        let path = self
            .root_certificates
            .get(&bank.to_string())
            .ok_or_else(|| ConfigError::NotFound(format!("root_certificates.{}", bank)))?;
        let pem = std::fs::read(path)?;
        openssl::x509::X509::from_pem(&pem).map_err(|e| {
            Error::CertificateDecode(format!("invalid root certificate {}: {}", path.display(), e))
        })
    }

    pub fn trust_verifier(&self, bank: Bank) -> Result<TrustVerifier> {
        Ok(TrustVerifier::new(self.root_certificate(bank)?, self.environment))
    }

    /// Verifier for the response to a request built from `params`.
    pub fn response_verifier(&self, params: &SigningParameters) -> Result<TrustVerifier> {
        Ok(self.trust_verifier(params.bank)?.for_parameters(params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn testdata(name: &str) -> String {
        format!("{}/testdata/{}", env!("CARGO_MANIFEST_DIR"), name)
    }

    #[test]
    fn defaults_apply_without_overrides() {
        let config = ClientConfig::load_with_sources(Some(HashMap::new())).unwrap();
        assert_eq!(config.environment, Environment::Test);
        assert_eq!(config.digest_method, DigestMethod::Sha1);
        assert_eq!(config.templates_dir, bank::bundled_templates());
        assert!(config.root_certificates.is_empty());
    }

    #[test]
    fn overrides_replace_defaults() {
        let mut vars = HashMap::new();
        vars.insert("environment".to_string(), "production".to_string());
        vars.insert("digest_method".to_string(), "sha256".to_string());
        vars.insert("root_certificates.nordea".to_string(), testdata("bank_root.pem"));

        let config = ClientConfig::load_with_sources(Some(vars)).unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.digest_method, DigestMethod::Sha256);

        let params = config.parameters(Bank::Nordea, Command::UploadFile, "11111111");
        assert_eq!(params.environment, Environment::Production);
        assert_eq!(params.digest_method, DigestMethod::Sha256);

        let verifier = config.trust_verifier(Bank::Nordea).unwrap();
        assert!(crate::x509_name_to_string(verifier.root().subject_name()).contains("Test Bank Root CA"));
    }

    #[test]
    fn response_verifier_takes_the_request_environment() {
        let mut vars = HashMap::new();
        vars.insert("root_certificates.op".to_string(), testdata("bank_root.pem"));
        let config = ClientConfig::load_with_sources(Some(vars)).unwrap();
        assert_eq!(config.environment, Environment::Test);

        let params = config
            .parameters(Bank::Op, Command::DownloadFileList, "11111111")
            .environment(Environment::Production);
        let verifier = config.response_verifier(&params).unwrap();
        assert_eq!(verifier.environment(), Environment::Production);
        assert_eq!(config.trust_verifier(Bank::Op).unwrap().environment(), Environment::Test);
    }

    #[test]
    fn missing_root_certificate_is_a_config_error() {
        let config = ClientConfig::load_with_sources(Some(HashMap::new())).unwrap();
        assert!(matches!(config.root_certificate(Bank::Op), Err(Error::Config(_))));
    }

    #[test]
    fn unreadable_root_certificate_is_reported() {
        let mut vars = HashMap::new();
        vars.insert("root_certificates.danske".to_string(), testdata("missing.pem"));
        vars.insert("root_certificates.op".to_string(), testdata("signing_key.pem"));
        let config = ClientConfig::load_with_sources(Some(vars)).unwrap();

        assert!(matches!(config.root_certificate(Bank::Danske), Err(Error::Io(_))));
        assert!(matches!(
            config.root_certificate(Bank::Op),
            Err(Error::CertificateDecode(_))
        ));
    }

    #[test]
    fn profiles_use_configured_templates() {
        let config = ClientConfig::load_with_sources(Some(HashMap::new())).unwrap();
        let profile = config.profile(Bank::Danske);
        assert_eq!(profile.templates_root(), bank::bundled_templates().as_path());
        assert_eq!(profile.receiver_id(), "DABAFIHH");
    }
}
