//! CryptoChat crypto — node identity and trust pinning primitives.
//!
//! This crate owns everything X.509: generating the node's self-signed
//! identity certificate, encoding/loading it from the store's DER blobs,
//! fingerprinting certificates for display to the operator, and verifying
//! that a presented certificate chains to a previously pinned one.

pub mod error;
pub mod fingerprint;
pub mod identity;
pub mod pinning;

pub use self::error::{CryptoError, Result};
pub use self::fingerprint::fingerprint;
pub use self::identity::{common_name_uuid, generate, Identity, CERT_VALIDITY, DEFAULT_KEY_BITS};
pub use self::pinning::verify_chains_to_pin;
