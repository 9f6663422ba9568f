//! Trust checks on the bank's signing certificate carried in a response.
//!
//! Where the certificate lives differs per bank and comes from
//! [`BankProfile::certificate_location`]; the check itself is the same for
//! every bank. A certificate that decodes but does not chain to the root is
//! an [`TrustOutcome::Untrusted`] result, never an error.

use crate::bank::{BankProfile, CertificateLocation};
use crate::error::{Error, Result};
use crate::params::{Environment, SigningParameters};
use crate::tree::Document;
use crate::verify::{decode_base64, security_token_certificate, verify_envelope, EnvelopeVerification};
use openssl::x509::{X509Ref, X509};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustOutcome {
    /// The certificate was issued under the configured root.
    Verified,
    /// Test environment: the root check was not performed.
    Bypassed,
    Untrusted(String),
}

impl TrustOutcome {
    pub fn is_trusted(&self) -> bool {
        matches!(self, TrustOutcome::Verified | TrustOutcome::Bypassed)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            TrustOutcome::Verified => None,
            TrustOutcome::Bypassed => Some("root certificate check skipped in test environment"),
            TrustOutcome::Untrusted(reason) => Some(reason.as_str()),
        }
    }
}

impl std::fmt::Display for TrustOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrustOutcome::Verified => write!(f, "verified"),
            TrustOutcome::Bypassed => write!(f, "not verified (test environment)"),
            TrustOutcome::Untrusted(reason) => write!(f, "untrusted: {}", reason),
        }
    }
}

fn decode_certificate(text: &str) -> Result<X509> {
    let der = decode_base64(text)
        .map_err(|e| Error::CertificateDecode(format!("error decoding X509 cert: {}", e)))?;
    X509::from_der(&der).map_err(|e| Error::CertificateDecode(format!("error decoding X509 cert: {}", e)))
}

/// Extracts the bank's signing certificate from a response. For banks that
/// sign with the inline security token this is the exact certificate
/// [`verify_envelope`] checks the response signature with.
pub fn signing_certificate(response: &Document, profile: &dyn BankProfile) -> Result<X509> {
    match profile.certificate_location() {
        CertificateLocation::SecurityToken => security_token_certificate(response),
        CertificateLocation::ApplicationResponse {
            container: (container_namespace, container_name),
            certificate: (namespace, local_name),
        } => {
            let path = response.require(container_namespace, container_name)?;
            let encoded = response.text(&path).unwrap_or_default();
            let decoded = decode_base64(&encoded)
                .map_err(|e| Error::CertificateDecode(format!("invalid application response: {}", e)))?;
            let source = String::from_utf8(decoded)
                .map_err(|e| Error::CertificateDecode(format!("invalid application response: {}", e)))?;
            let application_response = Document::parse(&source)?;
            let path = application_response.require(namespace, local_name)?;
            decode_certificate(&application_response.text(&path).unwrap_or_default())
        }
    }
}

/// Signature and trust results for one response.
#[derive(Debug, Clone)]
pub struct ResponseVerification {
    pub envelope: EnvelopeVerification,
    pub trust: TrustOutcome,
}

impl ResponseVerification {
    pub fn is_valid(&self) -> bool {
        self.envelope.is_valid() && self.trust.is_trusted()
    }
}

/// Checks response certificates against one bank's root certificate.
pub struct TrustVerifier {
    root: X509,
    environment: Environment,
}

impl TrustVerifier {
    pub fn new(root: X509, environment: Environment) -> Self {
        TrustVerifier { root, environment }
    }

    pub fn from_pem(root_pem: &[u8], environment: Environment) -> Result<Self> {
        let root = X509::from_pem(root_pem)
            .map_err(|e| Error::CertificateDecode(format!("invalid root certificate: {}", e)))?;
        Ok(TrustVerifier::new(root, environment))
    }

    pub fn root(&self) -> &X509Ref {
        &self.root
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Same root, environment taken from the parameters of the exchange.
    pub fn for_parameters(&self, params: &SigningParameters) -> TrustVerifier {
        TrustVerifier::new(self.root.clone(), params.environment)
    }

    /// Decodes the signing certificate of `response` and checks it against
    /// the root. Malformed or missing certificates are errors in every
    /// environment; the root check only runs in production.
    pub fn is_trusted(&self, response: &Document, profile: &dyn BankProfile) -> Result<TrustOutcome> {
        let certificate = signing_certificate(response, profile)?;

        if self.environment == Environment::Test {
            log::warn!(
                "{} response certificate {} accepted without root verification (test environment)",
                profile.bank(),
                crate::x509_name_to_string(certificate.subject_name())
            );
            return Ok(TrustOutcome::Bypassed);
        }

        let outcome = self.check_certificate(&certificate);
        log::debug!("{} response certificate {}", profile.bank(), outcome);
        Ok(outcome)
    }

    pub fn is_trusted_response(&self, response_xml: &str, profile: &dyn BankProfile) -> Result<TrustOutcome> {
        self.is_trusted(&Document::parse(response_xml)?, profile)
    }

    /// Verifies the response signature and the trust of its signing
    /// certificate on one parsed document.
    pub fn verify_trusted_response(
        &self,
        response_xml: &str,
        profile: &dyn BankProfile,
    ) -> Result<ResponseVerification> {
        let document = Document::parse(response_xml)?;
        let envelope = verify_envelope(&document)?;
        let trust = self.is_trusted(&document, profile)?;
        Ok(ResponseVerification { envelope, trust })
    }

    /// Root check alone, independent of the environment.
    pub fn check_certificate(&self, certificate: &X509Ref) -> TrustOutcome {
        let issuer = crate::x509_name_to_string(certificate.issuer_name());
        let root_subject = crate::x509_name_to_string(self.root.subject_name());
        if issuer != root_subject {
            return TrustOutcome::Untrusted(format!("issuer {} is not the root {}", issuer, root_subject));
        }

        let root_key = match self.root.public_key() {
            Ok(k) => k,
            Err(e) => return TrustOutcome::Untrusted(format!("unusable root key: {}", e)),
        };

        match certificate.verify(&root_key) {
            Ok(true) => TrustOutcome::Verified,
            Ok(false) => TrustOutcome::Untrusted("certificate signature does not verify against the root".to_string()),
            Err(e) => TrustOutcome::Untrusted(format!("openssl error: {}", e)),
        }
    }
}
