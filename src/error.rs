/// Errors produced while building a signed envelope or checking a response.
///
/// A certificate that parses but does not chain to the bank root is not an
/// error, see [`crate::trust::TrustOutcome::Untrusted`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to load template {path}: {reason}")]
    TemplateLoad { path: String, reason: String },

    #[error("canonicalization error: {0}")]
    Canonicalization(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("certificate decode error: {0}")]
    CertificateDecode(String),

    #[error("missing required node: {0}")]
    MissingNode(String),

    #[error("command {command} is not supported by {bank}")]
    UnsupportedCommand { bank: String, command: String },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
