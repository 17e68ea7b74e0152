//! The trust layer: certificate pinning and operator verification.
//!
//! Trust is split across two stages. The *pin check* runs synchronously
//! inside the rustls handshake for both inbound and outbound connections:
//! parse the leaf's CommonName as a UUID, pin the certificate on first
//! sight, or require it to chain to the pinned one. The *gate* runs in the
//! connection task right after the handshake and before any request is
//! served: it parks unverified peers on a pending-verification signal until
//! the operator accepts or rejects them from the UI, racing the wait
//! against connection liveness so a dropped peer unblocks promptly.
//!
//! Each wait suspends only its own connection task; the rest of the node
//! keeps running.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme};
use tokio::net::TcpStream;
use tokio::sync::watch;
use uuid::Uuid;

use cryptochat_common::types::VerificationNotice;
use cryptochat_crypto::{common_name_uuid, fingerprint, verify_chains_to_pin, CryptoError, Identity};
use cryptochat_events::{Broker, StreamName};
use cryptochat_store::{Store, StoreError, UserRecord};

use crate::pending::PendingVerifications;

/// How often the gate re-checks connection liveness while parked.
const LIVENESS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("peer presented no certificate")]
    NoCertificate,

    #[error("no user record for peer {0}")]
    UnknownUser(Uuid),

    #[error("verification was rejected")]
    Rejected,

    #[error("connection closed while awaiting verification")]
    Cancelled,

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

/// Shared trust state: the store of pinned users, the local identity, and
/// the in-flight verification prompts.
pub struct TrustStore {
    store: Arc<Store>,
    events: Arc<Broker>,
    identity: Arc<Identity>,
    pending: Arc<PendingVerifications>,
    provider: Arc<CryptoProvider>,
}

impl TrustStore {
    pub fn new(store: Arc<Store>, events: Arc<Broker>, identity: Arc<Identity>) -> Arc<Self> {
        Arc::new(Self {
            store,
            events,
            identity,
            pending: Arc::new(PendingVerifications::new()),
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        })
    }

    /// Server TLS config for the peer API: our identity plus the pinning
    /// verifier, with a client certificate required.
    pub fn server_config(self: &Arc<Self>) -> Result<Arc<rustls::ServerConfig>, TrustError> {
        let config = rustls::ServerConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| TrustError::Tls(e.to_string()))?
            .with_client_cert_verifier(Arc::new(PeerVerifier::new(self)))
            .with_single_cert(self.identity.tls_cert_chain(), self.identity.tls_key())
            .map_err(|e| TrustError::Tls(e.to_string()))?;

        Ok(Arc::new(config))
    }

    /// Client TLS config for outbound dispatch: our identity as the client
    /// credential, and the pinning verifier in place of hostname/CA checks
    /// (meaningless against self-signed LAN peers).
    pub fn client_config(self: &Arc<Self>) -> Result<Arc<rustls::ClientConfig>, TrustError> {
        let config = rustls::ClientConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| TrustError::Tls(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(PeerVerifier::new(self)))
            .with_client_auth_cert(self.identity.tls_cert_chain(), self.identity.tls_key())
            .map_err(|e| TrustError::Tls(e.to_string()))?;

        Ok(Arc::new(config))
    }

    /// The pin check: resolve a presented leaf certificate to a user
    /// record, pinning it on first sight.
    ///
    /// A UUID never re-binds: once pinned, any later presentation must
    /// chain to the stored certificate under a one-element root pool.
    pub fn check_peer(&self, presented: &CertificateDer<'_>) -> Result<UserRecord, TrustError> {
        let uuid = common_name_uuid(presented)?;

        loop {
            if let Some(record) = self.store.user(uuid)? {
                verify_chains_to_pin(presented, &CertificateDer::from(record.cert_der.clone()))?;
                return Ok(record);
            }

            if self.store.insert_user_if_absent(uuid, presented)? {
                return Ok(UserRecord {
                    uuid,
                    cert_der: presented.to_vec(),
                    verified: false,
                });
            }
            // Lost a first-sight race; re-read and chain-check instead.
        }
    }

    /// The gate: block this connection until the peer is verified.
    ///
    /// Publishes the `verification` prompt when this peer's entry is first
    /// created, then parks until the operator decides or the connection
    /// drops. Re-reads the record afterwards, so a rejection (which leaves
    /// `verified` false) fails the connection.
    pub async fn authorize(&self, uuid: Uuid, conn: &TcpStream) -> Result<(), TrustError> {
        let record = self
            .store
            .user(uuid)?
            .ok_or(TrustError::UnknownUser(uuid))?;
        if record.verified {
            tracing::debug!(%uuid, "Peer verification passed");
            return Ok(());
        }

        tracing::debug!(%uuid, "Waiting for user verification");
        let (mut waiter, created) = self.pending.subscribe(uuid);
        if created {
            self.events.publish_json(
                StreamName::Verification,
                &VerificationNotice {
                    uuid,
                    fingerprint: fingerprint(&record.cert_der),
                },
            );
        }

        tokio::select! {
            _ = waiter.decided() => {}
            _ = connection_closed(conn) => return Err(TrustError::Cancelled),
        }

        let record = self
            .store
            .user(uuid)?
            .ok_or(TrustError::UnknownUser(uuid))?;
        if record.verified {
            tracing::debug!(%uuid, "Peer verification passed");
            Ok(())
        } else {
            Err(TrustError::Rejected)
        }
    }

    /// Take the pending decision signal for a UUID, if any. Consumed by
    /// the UI verify endpoints.
    pub fn take_pending(&self, uuid: Uuid) -> Option<Arc<watch::Sender<bool>>> {
        self.pending.take(uuid)
    }
}

/// Resolve when the peer half-closes or resets the connection.
///
/// Pending readable data (the peer's buffered request) keeps this polling;
/// only EOF or a socket error ends the wait.
async fn connection_closed(conn: &TcpStream) {
    loop {
        match conn.ready(tokio::io::Interest::READABLE).await {
            Ok(ready) if ready.is_read_closed() => return,
            Ok(_) => tokio::time::sleep(LIVENESS_INTERVAL).await,
            Err(_) => return,
        }
    }
}

/// rustls verifier running the pin check in both TLS directions.
///
/// Signature verification delegates to the crypto provider; chain and
/// hostname validation are replaced entirely by the pin check.
pub(crate) struct PeerVerifier {
    trust: Arc<TrustStore>,
    provider: Arc<CryptoProvider>,
}

impl PeerVerifier {
    fn new(trust: &Arc<TrustStore>) -> Self {
        Self {
            trust: Arc::clone(trust),
            provider: trust.provider.clone(),
        }
    }

    fn check(&self, end_entity: &CertificateDer<'_>) -> Result<(), rustls::Error> {
        match self.trust.check_peer(end_entity) {
            Ok(record) => {
                tracing::trace!(uuid = %record.uuid, "Peer pin check passed");
                Ok(())
            }
            Err(e) => {
                tracing::debug!(error = %e, "Peer pin check failed");
                Err(rustls::Error::General(e.to_string()))
            }
        }
    }
}

impl std::fmt::Debug for PeerVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PeerVerifier")
    }
}

impl ClientCertVerifier for PeerVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        self.check(end_entity).map(|_| ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

impl ServerCertVerifier for PeerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.check(end_entity).map(|_| ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
