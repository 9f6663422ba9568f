//! WS-Security header composition.
//!
//! A header build moves through a fixed sequence of states, each one a type,
//! so a step can only run once the steps before it have finished:
//!
//! `Empty -> TokenBound -> TimestampSet -> ReferencesDigested -> SignedInfoReady
//! -> Signed -> CertificateEmbedded`
//!
//! The build owns the whole envelope document (header template with the body
//! already attached) and hands it back at the end.

use crate::digest::{self, DigestMethod};
use crate::error::{Error, Result};
use crate::ns;
use crate::params::Credentials;
use crate::reference::{random_id, Reference, ReferenceResolver};
use crate::tree::{Document, NodePath};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::RngCore;
use std::marker::PhantomData;
use xml::name::OwnedName;

/// Lifetime of the `wsu:Timestamp`, `Expires = Created + 300s`.
pub const TIMESTAMP_VALIDITY_SECS: i64 = 300;

pub mod state {
    pub struct Empty;
    pub struct TokenBound;
    pub struct TimestampSet;
    pub struct ReferencesDigested;
    pub struct SignedInfoReady;
    pub struct Signed;
    pub struct CertificateEmbedded;
}

use state::*;

/// The caller's certificate as embedded in `wsse:BinarySecurityToken`:
/// base64 DER without PEM delimiters or line breaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityToken(String);

impl SecurityToken {
    pub fn from_certificate(certificate: &openssl::x509::X509Ref) -> Result<Self> {
        match certificate.to_der() {
            Ok(der) => Ok(SecurityToken(base64::encode(der))),
            Err(e) => Err(Error::CertificateDecode(format!("openssl error: {}", e))),
        }
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        let delimiters = regex::Regex::new(r"-----(BEGIN|END) CERTIFICATE-----|\s+")
            .map_err(|e| Error::CertificateDecode(e.to_string()))?;
        Ok(SecurityToken(delimiters.replace_all(pem, "").to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub fn iso_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn wsu_id() -> OwnedName {
    OwnedName {
        local_name: "Id".to_string(),
        namespace: Some(ns::WSU.to_string()),
        prefix: Some("wsu".to_string()),
    }
}

pub struct HeaderBuild<S> {
    document: Document,
    digest_method: DigestMethod,
    references: ReferenceResolver,
    token_id: Option<String>,
    _state: PhantomData<S>,
}

impl<S> HeaderBuild<S> {
    fn into_state<T>(self) -> HeaderBuild<T> {
        HeaderBuild {
            document: self.document,
            digest_method: self.digest_method,
            references: self.references,
            token_id: self.token_id,
            _state: PhantomData,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn references(&self) -> &[Reference] {
        self.references.references()
    }

    pub fn token_id(&self) -> Option<&str> {
        self.token_id.as_deref()
    }

    fn signed_info_reference(&self, index: usize) -> Result<NodePath> {
        let signed_info = self.document.require(ns::DSIG, "SignedInfo")?;
        self.document
            .find_all_within(&signed_info, ns::DSIG, "Reference")
            .into_iter()
            .nth(index)
            .ok_or_else(|| Error::MissingNode(format!("ds:Reference #{}", index)))
    }

    /// Ids `target`, digests it and writes the digest into the `index`-th
    /// `ds:Reference`. The id goes on first since it is part of the digest.
    fn digest_reference<R: RngCore + ?Sized>(
        &mut self,
        target: &NodePath,
        local_name: &str,
        index: usize,
        rng: &mut R,
    ) -> Result<()> {
        let id = self
            .references
            .assign_reference(&mut self.document, target, ns::WSU, local_name, index, rng)?;
        let digest = digest::digest(&self.document, target, self.digest_method)?;
        let encoded = base64::encode(&digest);
        self.references.record_digest(&id, digest)?;

        let reference = self.signed_info_reference(index)?;
        let digest_value = self.document.require_within(&reference, ns::DSIG, "DigestValue")?;
        self.document.set_text(&digest_value, &encoded)?;
        log::debug!("{} digest ({}) {}", local_name, self.digest_method, encoded);
        Ok(())
    }
}

impl HeaderBuild<Empty> {
    pub fn new(document: Document, digest_method: DigestMethod) -> Self {
        HeaderBuild {
            document,
            digest_method,
            references: ReferenceResolver::new(),
            token_id: None,
            _state: PhantomData,
        }
    }

    /// Gives the `BinarySecurityToken` a random id and points the key info
    /// `wsse:Reference` at it.
    pub fn bind_token<R: RngCore + ?Sized>(mut self, rng: &mut R) -> Result<HeaderBuild<TokenBound>> {
        let token_id = random_id("token", rng);
        let token = self.document.require(ns::WSSE, "BinarySecurityToken")?;
        self.document.set_attribute(&token, wsu_id(), &token_id)?;

        let token_reference = self.document.require(ns::WSSE, "SecurityTokenReference")?;
        let reference = self.document.require_within(&token_reference, ns::WSSE, "Reference")?;
        self.document
            .set_attribute(&reference, OwnedName::local("URI"), &format!("#{}", token_id))?;

        self.token_id = Some(token_id);
        Ok(self.into_state())
    }
}

impl HeaderBuild<TokenBound> {
    pub fn set_timestamp(mut self, now: DateTime<Utc>) -> Result<HeaderBuild<TimestampSet>> {
        let expires = now + chrono::Duration::seconds(TIMESTAMP_VALIDITY_SECS);
        let created_node = self.document.require(ns::WSU, "Created")?;
        self.document.set_text(&created_node, &iso_time(now))?;
        let expires_node = self.document.require(ns::WSU, "Expires")?;
        self.document.set_text(&expires_node, &iso_time(expires))?;
        Ok(self.into_state())
    }
}

impl HeaderBuild<TimestampSet> {
    pub fn digest_timestamp<R: RngCore + ?Sized>(
        mut self,
        rng: &mut R,
    ) -> Result<HeaderBuild<ReferencesDigested>> {
        let timestamp = self.document.require(ns::WSU, "Timestamp")?;
        self.digest_reference(&timestamp, "Timestamp", 0, rng)?;
        Ok(self.into_state())
    }
}

impl HeaderBuild<ReferencesDigested> {
    /// Digests the SOAP body and sets every algorithm URI in the signature
    /// block to match the selected digest method.
    pub fn digest_body<R: RngCore + ?Sized>(mut self, rng: &mut R) -> Result<HeaderBuild<SignedInfoReady>> {
        let body = self.document.require(ns::SOAP_ENV, "Body")?;
        self.digest_reference(&body, "Body", 1, rng)?;

        let algorithm = OwnedName::local("Algorithm");
        for path in self.document.find_all(ns::DSIG, "DigestMethod") {
            self.document
                .set_attribute(&path, algorithm.clone(), self.digest_method.digest_uri())?;
        }
        for path in self.document.find_all(ns::DSIG, "SignatureMethod") {
            self.document
                .set_attribute(&path, algorithm.clone(), self.digest_method.signature_uri())?;
        }
        Ok(self.into_state())
    }
}

impl HeaderBuild<SignedInfoReady> {
    pub fn sign(
        mut self,
        private_key: &openssl::pkey::PKeyRef<openssl::pkey::Private>,
    ) -> Result<HeaderBuild<Signed>> {
        debug_assert!(self.references().iter().all(|r| r.digest_value.is_some()));

        let signed_info = self.document.require(ns::DSIG, "SignedInfo")?;
        let canonical_signed_info = crate::c14n::canonicalize(&self.document.events(&signed_info)?)?;

        let mut signer = match openssl::sign::Signer::new(self.digest_method.message_digest(), private_key) {
            Ok(d) => d,
            Err(e) => {
                return Err(Error::Signing(format!("openssl error: {}", e)));
            }
        };
        if let Err(e) = signer.update(canonical_signed_info.as_bytes()) {
            return Err(Error::Signing(format!("openssl error: {}", e)));
        }
        let signature = match signer.sign_to_vec() {
            Ok(d) => d,
            Err(e) => {
                return Err(Error::Signing(format!("openssl error: {}", e)));
            }
        };

        let signature_value = self.document.require(ns::DSIG, "SignatureValue")?;
        self.document.set_text(&signature_value, &base64::encode(&signature))?;
        Ok(self.into_state())
    }
}

impl HeaderBuild<Signed> {
    pub fn embed_certificate(mut self, token: &SecurityToken) -> Result<HeaderBuild<CertificateEmbedded>> {
        let token_node = self.document.require(ns::WSSE, "BinarySecurityToken")?;
        self.document.set_text(&token_node, token.as_str())?;
        Ok(self.into_state())
    }
}

impl HeaderBuild<CertificateEmbedded> {
    pub fn into_document(self) -> Document {
        self.document
    }
}

/// Runs every header step against `document` in order.
pub fn compose<R: RngCore + ?Sized>(
    document: Document,
    digest_method: DigestMethod,
    credentials: &Credentials,
    rng: &mut R,
    now: DateTime<Utc>,
) -> Result<Document> {
    let token = SecurityToken::from_certificate(&credentials.certificate)?;
    Ok(HeaderBuild::new(document, digest_method)
        .bind_token(rng)?
        .set_timestamp(now)?
        .digest_timestamp(rng)?
        .digest_body(rng)?
        .sign(&credentials.private_key)?
        .embed_certificate(&token)?
        .into_document())
}
