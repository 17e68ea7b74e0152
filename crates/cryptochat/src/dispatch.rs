//! Outbound message dispatch.
//!
//! Each UI-submitted message fans out to every peer currently advertising
//! the room. Delivery is best-effort LAN semantics: per-peer failures are
//! logged and skipped, nothing is retried, and partial fan-out is normal.
//!
//! Outbound connections are pinned symmetrically with inbound ones: the
//! TLS client config carries the node identity and replaces hostname/CA
//! validation with the pin check, and the same verification gate runs
//! before the request is sent — so talking *to* an unverified peer also
//! raises a prompt and waits for the operator.

use anyhow::Context;
use axum::http::{header, Method, Request};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use cryptochat_common::api::ErrorBody;
use cryptochat_common::types::{RoomMember, RoomMessage};
use cryptochat_crypto::common_name_uuid;

use crate::state::AppState;
use crate::trust::TrustError;

/// Deliver a message to every member of a room. Runs as a spawned task;
/// the submitting request has already been answered.
pub async fn fan_out(state: AppState, room: String, message: RoomMessage) {
    let members = state.discovery.room_members(&room);
    if members.is_empty() {
        tracing::debug!(room, "No peers advertising room");
        return;
    }

    let connector = match state.trust.client_config() {
        Ok(config) => TlsConnector::from(config),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build outbound TLS config");
            return;
        }
    };

    for member in members {
        if let Err(e) = send_to_peer(&state, &connector, &room, member, &message).await {
            tracing::warn!(
                uuid = %member.uuid,
                addr = %member.addr,
                room = %room,
                error = %e,
                "Failed to deliver message to peer"
            );
        }
    }
}

async fn send_to_peer(
    state: &AppState,
    connector: &TlsConnector,
    room: &str,
    member: RoomMember,
    message: &RoomMessage,
) -> anyhow::Result<()> {
    let tcp = TcpStream::connect(member.addr)
        .await
        .context("failed to connect")?;

    // The pin check runs inside this handshake via the server certificate
    // verifier; the name is unused but rustls requires one.
    let server_name = ServerName::IpAddress(member.addr.ip().into());
    let tls = connector
        .connect(server_name, tcp)
        .await
        .context("TLS handshake failed")?;

    {
        let (tcp, session) = tls.get_ref();
        let peer_der = session
            .peer_certificates()
            .and_then(|certs| certs.first())
            .ok_or(TrustError::NoCertificate)?
            .clone()
            .into_owned();
        let uuid = common_name_uuid(&peer_der)?;
        state.trust.authorize(uuid, tcp).await?;
    }

    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(tls))
        .await
        .context("HTTP handshake failed")?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!(error = %e, "Outbound peer connection closed");
        }
    });

    let body = serde_json::to_vec(message).context("failed to marshal message")?;
    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/rooms/{room}/message"))
        .header(header::HOST, member.addr.to_string())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))?;

    let response = sender
        .send_request(request)
        .await
        .context("failed to send request")?;

    let status = response.status();
    if status.as_u16() >= 400 {
        let bytes = response
            .into_body()
            .collect()
            .await
            .context("failed to read error response")?
            .to_bytes();
        let message = serde_json::from_slice::<ErrorBody>(&bytes)
            .map(|e| e.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
        anyhow::bail!("peer responded with HTTP {status}: {message}");
    }

    Ok(())
}
