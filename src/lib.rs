#[macro_use]
extern crate serde_derive;

pub mod application;
pub mod bank;
pub mod c14n;
pub mod config;
pub mod digest;
pub mod envelope;
pub mod error;
pub mod params;
pub mod reference;
pub mod security;
pub mod tree;
pub mod trust;
pub mod verify;

pub use application::BxdApplicationRequest;
pub use bank::{Bank, BankProfile, Command};
pub use digest::DigestMethod;
pub use envelope::EnvelopeAssembler;
pub use error::{Error, Result};
pub use params::{ApplicationRequest, Credentials, Environment, SigningParameters};
pub use trust::{TrustOutcome, TrustVerifier};

pub mod ns {
    pub const SOAP_ENV: &str = "http://schemas.xmlsoap.org/soap/envelope/";
    pub const WSSE: &str =
        "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
    pub const WSU: &str =
        "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
    pub const DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";
    pub const BXD_MODEL: &str = "http://model.bxd.fi";
    pub const BXD_XMLDATA: &str = "http://bxd.fi/xmldata/";
    pub const BXD_CERTIFICATE: &str = "http://bxd.fi/CertificateService";
    pub const OP_CERTIFICATE: &str = "http://mlp.op.fi/OPCertificateService";
}

pub const DIGEST_SHA1: &'static str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const DIGEST_SHA256: &'static str = "http://www.w3.org/2001/04/xmlenc#sha256";

pub const CANONICAL_EXCLUSIVE_1_0: &'static str = "http://www.w3.org/2001/10/xml-exc-c14n#";

pub const SIGNATURE_RSA_SHA1: &'static str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const SIGNATURE_RSA_SHA256: &'static str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";

#[inline]
pub fn x509_name_to_string(name: &openssl::x509::X509NameRef) -> String {
    name.entries()
        .map(|e| {
            format!(
                "{}=\"{}\"",
                e.object().nid().short_name().unwrap_or_default(),
                match e.data().as_utf8() {
                    Ok(d) => d.to_string(),
                    Err(_) => String::new(),
                }
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Serializes reader events as an XML document with escaping enabled.
pub fn events_to_string(events: &[xml::reader::XmlEvent]) -> Result<String> {
    let mut output = Vec::new();
    let mut output_writer = xml::writer::EventWriter::new_with_config(
        &mut output,
        xml::writer::EmitterConfig {
            perform_indent: false,
            perform_escaping: true,
            write_document_declaration: true,
            autopad_comments: false,
            cdata_to_characters: true,
            line_separator: std::borrow::Cow::Borrowed("\n"),
            normalize_empty_elements: false,
            ..std::default::Default::default()
        },
    );

    for event in events {
        if let Some(e) = event.as_writer_event() {
            output_writer
                .write(e)
                .map_err(|e| Error::Canonicalization(format!("unable to write XML: {}", e)))?;
        }
    }

    String::from_utf8(output).map_err(|e| Error::Canonicalization(e.to_string()))
}
