use crate::bank::{Bank, Command};
use crate::digest::DigestMethod;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Test,
    Production,
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "production" => Ok(Environment::Production),
            e => Err(format!("unknown environment: {}", e)),
        }
    }
}

/// The inner, bank specific business payload. Built elsewhere; the envelope
/// only ever needs its base64 form.
pub trait ApplicationRequest {
    fn to_base64(&self) -> String;
}

/// An application request that has already been serialized.
#[derive(Debug, Clone)]
pub struct RawApplicationRequest(pub Vec<u8>);

impl ApplicationRequest for RawApplicationRequest {
    fn to_base64(&self) -> String {
        base64::encode(&self.0)
    }
}

/// The caller's own signing key and certificate.
#[derive(Clone)]
pub struct Credentials {
    pub private_key: openssl::pkey::PKey<openssl::pkey::Private>,
    pub certificate: openssl::x509::X509,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("certificate", &crate::x509_name_to_string(self.certificate.subject_name()))
            .finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn new(
        private_key: openssl::pkey::PKey<openssl::pkey::Private>,
        certificate: openssl::x509::X509,
    ) -> Result<Self> {
        let pub_pkey = match certificate.public_key() {
            Ok(d) => d,
            Err(e) => return Err(Error::CertificateDecode(format!("openssl error: {}", e))),
        };
        if !private_key.public_eq(&pub_pkey) {
            return Err(Error::Signing("public and private key don't match".to_string()));
        }
        if private_key.rsa().is_err() {
            return Err(Error::Signing(format!(
                "unsupported key format {:?}",
                private_key.id()
            )));
        }
        Ok(Credentials {
            private_key,
            certificate,
        })
    }

    pub fn from_pem(private_key_pem: &[u8], certificate_pem: &[u8]) -> Result<Self> {
        let private_key = openssl::pkey::PKey::private_key_from_pem(private_key_pem)
            .map_err(|e| Error::Signing(format!("invalid private key: {}", e)))?;
        let certificate = openssl::x509::X509::from_pem(certificate_pem)
            .map_err(|e| Error::CertificateDecode(format!("invalid certificate: {}", e)))?;
        Credentials::new(private_key, certificate)
    }
}

/// Everything one message build needs. Not mutated during the build.
#[derive(Debug, Clone)]
pub struct SigningParameters {
    pub bank: Bank,
    pub command: Command,
    pub environment: Environment,
    pub customer_id: String,
    /// Required for every command outside the certificate service.
    pub credentials: Option<Credentials>,
    pub target_id: Option<String>,
    pub file_reference: Option<String>,
    pub file_type: Option<String>,
    pub language: String,
    pub digest_method: DigestMethod,
}

impl SigningParameters {
    pub fn new(bank: Bank, command: Command, customer_id: &str) -> Self {
        SigningParameters {
            bank,
            command,
            environment: Environment::default(),
            customer_id: customer_id.to_string(),
            credentials: None,
            target_id: None,
            file_reference: None,
            file_type: None,
            language: "EN".to_string(),
            digest_method: DigestMethod::default(),
        }
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn digest_method(mut self, digest_method: DigestMethod) -> Self {
        self.digest_method = digest_method;
        self
    }

    pub fn language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn target_id(mut self, target_id: &str) -> Self {
        self.target_id = Some(target_id.to_string());
        self
    }

    pub fn file_reference(mut self, file_reference: &str) -> Self {
        self.file_reference = Some(file_reference.to_string());
        self
    }

    pub fn file_type(mut self, file_type: &str) -> Self {
        self.file_type = Some(file_type.to_string());
        self
    }
}
