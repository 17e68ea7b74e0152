use thiserror::Error;

/// Domain-specific errors for identity and pinning operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Failed to generate RSA private key: {0}")]
    KeyGeneration(#[from] rsa::Error),

    #[error("Failed to encode private key: {0}")]
    KeyEncoding(String),

    #[error("Failed to parse PKCS#1 private key: {0}")]
    KeyParse(String),

    #[error("Certificate error: {0}")]
    Certificate(#[from] rcgen::Error),

    #[error("Failed to parse X.509 certificate: {0}")]
    CertParse(String),

    #[error("Failed to parse certificate CommonName as UUID: {0}")]
    BadCommonName(String),

    #[error("Failed to build trust anchor from pinned certificate: {0}")]
    TrustAnchor(String),

    #[error("Certificate does not chain to the pinned certificate: {0}")]
    PinMismatch(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
