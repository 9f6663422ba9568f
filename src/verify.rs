//! Verification of a WS-Security signed envelope: reference digests plus the
//! `SignedInfo` signature, checked against the embedded security token.

use crate::digest::{self, DigestMethod};
use crate::error::{Error, Result};
use crate::ns;
use crate::tree::{Document, NodePath};

#[derive(Debug, Clone)]
pub struct EnvelopeVerification {
    pub digests_match: bool,
    pub signature_valid: bool,
    /// Ids of the references whose digest matched.
    pub references: Vec<String>,
}

impl EnvelopeVerification {
    pub fn is_valid(&self) -> bool {
        self.digests_match && self.signature_valid
    }
}

fn attribute(document: &Document, path: &NodePath, local_name: &str) -> Result<String> {
    document
        .element(path)
        .and_then(|e| e.attribute(None, local_name))
        .map(str::to_string)
        .ok_or_else(|| Error::MissingNode(format!("@{}", local_name)))
}

pub(crate) fn decode_base64(value: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    base64::decode(value.chars().filter(|c| !c.is_whitespace()).collect::<String>())
}

fn single(paths: Vec<NodePath>, what: &str) -> Result<NodePath> {
    let count = paths.len();
    let mut paths = paths.into_iter();
    match (paths.next(), paths.next()) {
        (Some(path), None) => Ok(path),
        (None, _) => Err(Error::MissingNode(what.to_string())),
        (Some(_), Some(_)) => Err(Error::Signing(format!("expected one {}, found {}", what, count))),
    }
}

fn envelope_root(document: &Document) -> Result<NodePath> {
    if document.root().is(ns::SOAP_ENV, "Envelope") {
        Ok(NodePath::root())
    } else {
        Err(Error::MissingNode("soapenv:Envelope".to_string()))
    }
}

/// The `soapenv:Body` that is a direct child of the envelope.
pub fn envelope_body(document: &Document) -> Result<NodePath> {
    let root = envelope_root(document)?;
    single(document.child_elements(&root, ns::SOAP_ENV, "Body"), "soapenv:Body")
}

/// `soapenv:Header/wsse:Security`, each level present exactly once.
pub fn security_header(document: &Document) -> Result<NodePath> {
    let root = envelope_root(document)?;
    let header = single(document.child_elements(&root, ns::SOAP_ENV, "Header"), "soapenv:Header")?;
    single(document.child_elements(&header, ns::WSSE, "Security"), "wsse:Security")
}

fn resolve_id(document: &Document, id: &str) -> Result<NodePath> {
    single(document.find_all_by_id(id), &format!("element with Id {}", id))
}

/// Decodes the envelope's only `wsse:BinarySecurityToken`. When key info
/// references a token, the reference must resolve to that same element.
pub fn security_token_certificate(document: &Document) -> Result<openssl::x509::X509> {
    let token = single(document.find_all(ns::WSSE, "BinarySecurityToken"), "wsse:BinarySecurityToken")?;

    if let Some(token_reference) = document.find(ns::WSSE, "SecurityTokenReference") {
        let reference = document.require_within(&token_reference, ns::WSSE, "Reference")?;
        let uri = attribute(document, &reference, "URI")?;
        let id = uri
            .strip_prefix('#')
            .ok_or_else(|| Error::Signing(format!("unsupported token reference URI: {}", uri)))?;
        if resolve_id(document, id)? != token {
            return Err(Error::Signing(format!("token reference {} does not point at the security token", uri)));
        }
    }

    let text = document.text(&token).unwrap_or_default();
    let der = decode_base64(&text)
        .map_err(|e| Error::CertificateDecode(format!("error decoding X509 cert: {}", e)))?;
    openssl::x509::X509::from_der(&der)
        .map_err(|e| Error::CertificateDecode(format!("error decoding X509 cert: {}", e)))
}

fn verify_signature(
    method: DigestMethod,
    pkey: &openssl::pkey::PKeyRef<openssl::pkey::Public>,
    sig: &[u8],
    data: &[u8],
) -> bool {
    if pkey.rsa().is_err() {
        return false;
    }

    let mut verifier = match openssl::sign::Verifier::new(method.message_digest(), pkey) {
        Ok(v) => v,
        Err(_) => return false,
    };

    match verifier.verify_oneshot(sig, data) {
        Ok(v) => v,
        Err(_) => false,
    }
}

/// Checks the envelope's signature block.
///
/// `SignedInfo` must reference exactly the envelope `Body` and the security
/// header `Timestamp`, each by an Id no other element carries. Anything else
/// is an error; a digest or signature mismatch is reported in the result.
pub fn verify_envelope(document: &Document) -> Result<EnvelopeVerification> {
    let body = envelope_body(document)?;
    let security = security_header(document)?;
    let timestamp = single(document.child_elements(&security, ns::WSU, "Timestamp"), "wsu:Timestamp")?;
    let signature = single(document.child_elements(&security, ns::DSIG, "Signature"), "ds:Signature")?;
    let signed_info = single(document.child_elements(&signature, ns::DSIG, "SignedInfo"), "ds:SignedInfo")?;

    let signature_method = document.require_within(&signed_info, ns::DSIG, "SignatureMethod")?;
    let method = DigestMethod::from_signature_uri(&attribute(document, &signature_method, "Algorithm")?)?;

    let mut body_signed = false;
    let mut timestamp_signed = false;
    let mut digests_match = true;
    let mut references = vec![];
    for reference in document.child_elements(&signed_info, ns::DSIG, "Reference") {
        let uri = attribute(document, &reference, "URI")?;
        let id = match uri.strip_prefix('#') {
            Some(id) => id,
            None => return Err(Error::Signing(format!("unsupported reference URI: {}", uri))),
        };
        let target = resolve_id(document, id)?;
        if target == body && !body_signed {
            body_signed = true;
        } else if target == timestamp && !timestamp_signed {
            timestamp_signed = true;
        } else {
            return Err(Error::Signing(format!(
                "reference {} is not the envelope body or the security timestamp",
                uri
            )));
        }

        let digest_method_node = document.require_within(&reference, ns::DSIG, "DigestMethod")?;
        let digest_method = DigestMethod::from_digest_uri(&attribute(document, &digest_method_node, "Algorithm")?)?;
        let digest_value = document.require_within(&reference, ns::DSIG, "DigestValue")?;
        let provided_digest = decode_base64(&document.text(&digest_value).unwrap_or_default())
            .map_err(|e| Error::Signing(format!("invalid digest base64: {}", e)))?;

        if digest::digest(document, &target, digest_method)? == provided_digest {
            references.push(id.to_string());
        } else {
            log::debug!("digest does not match for {}", uri);
            digests_match = false;
        }
    }
    if !body_signed {
        return Err(Error::Signing("envelope body is not signed".to_string()));
    }
    if !timestamp_signed {
        return Err(Error::Signing("security timestamp is not signed".to_string()));
    }

    let signed_info_data = crate::c14n::canonicalize(&document.events(&signed_info)?)?;
    let certificate = security_token_certificate(document)?;
    let pkey = certificate
        .public_key()
        .map_err(|e| Error::CertificateDecode(format!("error decoding X509 cert: {}", e)))?;

    let signature_value = single(
        document.child_elements(&signature, ns::DSIG, "SignatureValue"),
        "ds:SignatureValue",
    )?;
    let sig_data = decode_base64(&document.text(&signature_value).unwrap_or_default())
        .map_err(|e| Error::Signing(format!("error decoding signature: {}", e)))?;

    let signature_valid = verify_signature(method, &pkey, &sig_data, signed_info_data.as_bytes());
    if !signature_valid {
        log::debug!("signature does not verify");
    }

    Ok(EnvelopeVerification {
        digests_match,
        signature_valid,
        references,
    })
}

/// Parses a raw response and verifies its signature block.
pub fn verify_response(source_xml: &str) -> Result<EnvelopeVerification> {
    verify_envelope(&Document::parse(source_xml)?)
}
