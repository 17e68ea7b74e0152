//! Certificate fingerprinting.
//!
//! The fingerprint shown to the operator during verification is the SHA-1
//! digest of the certificate's DER body as lowercase hex. The frontend
//! renders this value verbatim, so the encoding is part of the wire
//! contract.

use sha1::{Digest, Sha1};

/// Compute the fingerprint of a DER-encoded certificate.
///
/// Returns lowercase hex with no separators (40 characters).
pub fn fingerprint(cert_der: &[u8]) -> String {
    hex::encode(Sha1::digest(cert_der))
}
