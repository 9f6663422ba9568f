use crate::error::{Error, Result};
use crate::tree::{Document, NodePath};

/// Digest selector for one envelope build. Chooses both the reference digest
/// and the RSA signature hash, so the two can never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DigestMethod {
    #[default]
    Sha1,
    Sha256,
}

impl DigestMethod {
    pub fn digest_uri(&self) -> &'static str {
        match self {
            DigestMethod::Sha1 => crate::DIGEST_SHA1,
            DigestMethod::Sha256 => crate::DIGEST_SHA256,
        }
    }

    pub fn signature_uri(&self) -> &'static str {
        match self {
            DigestMethod::Sha1 => crate::SIGNATURE_RSA_SHA1,
            DigestMethod::Sha256 => crate::SIGNATURE_RSA_SHA256,
        }
    }

    pub fn message_digest(&self) -> openssl::hash::MessageDigest {
        match self {
            DigestMethod::Sha1 => openssl::hash::MessageDigest::sha1(),
            DigestMethod::Sha256 => openssl::hash::MessageDigest::sha256(),
        }
    }

    pub fn from_digest_uri(uri: &str) -> Result<Self> {
        match uri {
            crate::DIGEST_SHA1 => Ok(DigestMethod::Sha1),
            crate::DIGEST_SHA256 => Ok(DigestMethod::Sha256),
            u => Err(Error::Signing(format!("unsupported digest: {}", u))),
        }
    }

    pub fn from_signature_uri(uri: &str) -> Result<Self> {
        match uri {
            crate::SIGNATURE_RSA_SHA1 => Ok(DigestMethod::Sha1),
            crate::SIGNATURE_RSA_SHA256 => Ok(DigestMethod::Sha256),
            u => Err(Error::Signing(format!("unsupported signature method: {}", u))),
        }
    }
}

impl std::str::FromStr for DigestMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sha1" => Ok(DigestMethod::Sha1),
            "sha256" => Ok(DigestMethod::Sha256),
            u => Err(Error::Signing(format!("unsupported digest method: {}", u))),
        }
    }
}

impl std::fmt::Display for DigestMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DigestMethod::Sha1 => write!(f, "sha1"),
            DigestMethod::Sha256 => write!(f, "sha256"),
        }
    }
}

pub fn hash(method: DigestMethod, data: &[u8]) -> Result<Vec<u8>> {
    match openssl::hash::hash(method.message_digest(), data) {
        Ok(d) => Ok(d.to_vec()),
        Err(e) => Err(Error::Signing(format!("openssl error: {}", e))),
    }
}

/// Hash of the exclusive canonical form of the element at `path`.
pub fn digest(document: &Document, path: &NodePath, method: DigestMethod) -> Result<Vec<u8>> {
    let canonical = crate::c14n::canonicalize(&document.events(path)?)?;
    hash(method, canonical.as_bytes())
}

/// Parses an XML fragment and digests its document element.
pub fn digest_str(source: &str, method: DigestMethod) -> Result<Vec<u8>> {
    let canonical = crate::c14n::canonicalize_str(source)?;
    hash(method, canonical.as_bytes())
}
