//! Chain-to-pin verification.
//!
//! Trust-on-first-use pins the first certificate seen for a UUID. Every
//! later presentation must chain to that pinned certificate under a
//! one-element root pool — a UUID never re-binds to a different key. This
//! replaces ordinary CA and hostname validation entirely.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;

use crate::error::{CryptoError, Result};

/// Require `presented` to chain to `pinned` under a root pool containing
/// only `pinned`.
///
/// The same check is applied to inbound client certificates and outbound
/// server certificates; a mismatch means a different key is claiming the
/// pinned UUID.
pub fn verify_chains_to_pin(
    presented: &CertificateDer<'_>,
    pinned: &CertificateDer<'_>,
) -> Result<()> {
    let mut roots = RootCertStore::empty();
    roots
        .add(pinned.clone().into_owned())
        .map_err(|e| CryptoError::TrustAnchor(e.to_string()))?;

    let verifier = WebPkiClientVerifier::builder_with_provider(
        Arc::new(roots),
        Arc::new(rustls::crypto::ring::default_provider()),
    )
    .build()
    .map_err(|e| CryptoError::TrustAnchor(e.to_string()))?;

    verifier
        .verify_client_cert(presented, &[], UnixTime::now())
        .map_err(|e| CryptoError::PinMismatch(e.to_string()))?;

    Ok(())
}
