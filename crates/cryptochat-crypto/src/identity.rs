//! Node identity: a self-signed RSA X.509 certificate whose CommonName is
//! the node UUID.
//!
//! The certificate is generated once on first start and persisted as two
//! DER blobs: the certificate itself and the RSA private key in PKCS#1
//! form. rustls consumes the PKCS#1 encoding directly; rcgen needs PKCS#8
//! for signing, so the conversion happens only at issuance time.

use rcgen::{
    CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
    SerialNumber,
};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer};
use ::time::OffsetDateTime;
use uuid::Uuid;
use x509_parser::prelude::*;

use crate::error::{CryptoError, Result};
use crate::fingerprint::fingerprint;

/// RSA modulus size for generated identities.
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Identity certificates are valid for one year and never rotated
/// automatically.
pub const CERT_VALIDITY: ::time::Duration = ::time::Duration::days(365);

/// The node's certificate and private key, ready for both storage and TLS.
pub struct Identity {
    cert_der: CertificateDer<'static>,
    key_pkcs1: Vec<u8>,
    uuid: Uuid,
}

/// Generate a fresh self-signed identity.
///
/// The certificate carries digitalSignature+keyEncipherment key usage,
/// serverAuth+clientAuth extended key usage, and a random 128-bit serial.
pub fn generate(key_bits: usize, common_name: &str, valid_for: ::time::Duration) -> Result<Identity> {
    let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, key_bits)?;

    let key_pkcs1 = key
        .to_pkcs1_der()
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?
        .as_bytes()
        .to_vec();
    let key_pkcs8 = key
        .to_pkcs8_der()
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
    let signer = KeyPair::from_der_and_sign_algo(
        &PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pkcs8.as_bytes().to_vec())),
        &rcgen::PKCS_RSA_SHA256,
    )?;

    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params.serial_number = Some(SerialNumber::from(rand::random::<[u8; 16]>().to_vec()));

    let not_before = OffsetDateTime::now_utc();
    params.not_before = not_before;
    params.not_after = not_before + valid_for;

    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];

    let cert = params.self_signed(&signer)?;

    Identity::from_der(cert.der().to_vec(), key_pkcs1)
}

impl Identity {
    /// Reassemble an identity from the store's DER blobs.
    ///
    /// Both blobs are validated: the certificate must parse and carry a
    /// UUID CommonName, the key must be well-formed PKCS#1.
    pub fn from_der(cert_der: Vec<u8>, key_pkcs1: Vec<u8>) -> Result<Self> {
        let uuid = common_name_uuid(&cert_der)?;
        RsaPrivateKey::from_pkcs1_der(&key_pkcs1)
            .map_err(|e| CryptoError::KeyParse(e.to_string()))?;

        Ok(Self {
            cert_der: CertificateDer::from(cert_der),
            key_pkcs1,
            uuid,
        })
    }

    /// The node UUID, parsed from the certificate CommonName.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    pub fn key_pkcs1_der(&self) -> &[u8] {
        &self.key_pkcs1
    }

    /// Fingerprint of the identity certificate.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.cert_der)
    }

    /// Certificate chain for rustls configs (always a single self-signed
    /// leaf).
    pub fn tls_cert_chain(&self) -> Vec<CertificateDer<'static>> {
        vec![self.cert_der.clone()]
    }

    /// Private key for rustls configs.
    pub fn tls_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(self.key_pkcs1.clone()))
    }
}

/// Parse a certificate's CommonName as a UUID.
///
/// Peers without a UUID CommonName are rejected at the TLS layer.
pub fn common_name_uuid(cert_der: &[u8]) -> Result<Uuid> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| CryptoError::CertParse(e.to_string()))?;

    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .ok_or_else(|| CryptoError::BadCommonName("certificate has no CommonName".into()))?;

    Uuid::parse_str(cn).map_err(|e| CryptoError::BadCommonName(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    // Key generation is the slow part of these tests (ring insists on a
    // 2048-bit minimum for signing), so most tests share one identity.
    fn shared_identity() -> &'static Identity {
        static IDENTITY: OnceLock<Identity> = OnceLock::new();
        IDENTITY.get_or_init(|| {
            generate(
                DEFAULT_KEY_BITS,
                &Uuid::new_v4().to_string(),
                ::time::Duration::days(1),
            )
            .unwrap()
        })
    }

    #[test]
    fn generate_produces_uuid_common_name() {
        let identity = shared_identity();
        assert_eq!(
            common_name_uuid(identity.cert_der()).unwrap(),
            identity.uuid()
        );
    }

    #[test]
    fn fingerprint_survives_encode_load_round_trip() {
        let identity = shared_identity();
        let reloaded = Identity::from_der(
            identity.cert_der().to_vec(),
            identity.key_pkcs1_der().to_vec(),
        )
        .unwrap();

        assert_eq!(identity.fingerprint(), reloaded.fingerprint());
        assert_eq!(identity.uuid(), reloaded.uuid());
    }

    #[test]
    fn fingerprint_is_forty_hex_chars() {
        let fp = shared_identity().fingerprint();
        assert_eq!(fp.len(), 40);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_serials_are_distinct() {
        let serial = |identity: &Identity| {
            let (_, cert) = X509Certificate::from_der(identity.cert_der()).unwrap();
            cert.raw_serial().to_vec()
        };

        let fresh = generate(
            DEFAULT_KEY_BITS,
            &Uuid::new_v4().to_string(),
            ::time::Duration::days(1),
        )
        .unwrap();
        assert_ne!(serial(shared_identity()), serial(&fresh));
    }

    #[test]
    fn non_uuid_common_name_is_rejected() {
        let identity = generate(DEFAULT_KEY_BITS, "not-a-uuid", ::time::Duration::days(1));
        assert!(matches!(identity, Err(CryptoError::BadCommonName(_))));
    }

    #[test]
    fn garbage_cert_is_rejected() {
        assert!(matches!(
            common_name_uuid(b"definitely not DER"),
            Err(CryptoError::CertParse(_))
        ));
    }
}
