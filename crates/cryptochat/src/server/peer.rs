//! The peer API: mutually authenticated message submission.
//!
//! Connections are accepted by hand so the trust layer can run between the
//! TLS handshake (where the pin check happens) and request serving (which
//! only starts once the peer is verified). The authenticated peer UUID is
//! injected into the router as a request extension.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Json, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use cryptochat_common::api::problem_response;
use cryptochat_common::types::{MessageEvent, MessageSender, RoomMessage};
use cryptochat_events::StreamName;

use crate::state::AppState;
use crate::trust::{TrustError, TrustStore};

/// The peer authenticated by the TLS session, as seen by handlers.
#[derive(Debug, Clone, Copy)]
pub struct PeerIdentity {
    pub uuid: Uuid,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/rooms/{room}/message", post(send_message))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Accept loop for the peer API listener.
pub async fn serve(
    state: AppState,
    listener: TcpListener,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let acceptor = TlsAcceptor::from(state.trust.server_config()?);
    let router = routes(state.clone());

    tracing::info!(addr = %listener.local_addr()?, "Peer API listening");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, remote) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept peer connection");
                        continue;
                    }
                };

                let acceptor = acceptor.clone();
                let router = router.clone();
                let trust = state.trust.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(acceptor, router, trust, stream).await {
                        tracing::debug!(%remote, error = %e, "Peer connection closed");
                    }
                });
            }
        }
    }

    tracing::debug!("Peer API stopped");
    Ok(())
}

async fn handle_connection(
    acceptor: TlsAcceptor,
    router: Router,
    trust: Arc<TrustStore>,
    stream: TcpStream,
) -> anyhow::Result<()> {
    // The pin check (first-sight insert or chain-to-pin) runs inside this
    // handshake, via the client certificate verifier.
    let tls = acceptor.accept(stream).await?;

    let peer_der = {
        let (_, session) = tls.get_ref();
        session
            .peer_certificates()
            .and_then(|certs| certs.first())
            .ok_or(TrustError::NoCertificate)?
            .clone()
            .into_owned()
    };
    let uuid = cryptochat_crypto::common_name_uuid(&peer_der)?;

    // Park until the operator verifies this peer; tears down on rejection
    // or if the peer gives up. Only this connection's task waits.
    {
        let (tcp, _) = tls.get_ref();
        trust.authorize(uuid, tcp).await?;
    }

    let service = TowerToHyperService::new(router.layer(Extension(PeerIdentity { uuid })));
    ConnectionBuilder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(tls), service)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(())
}

async fn send_message(
    State(state): State<AppState>,
    Extension(peer): Extension<PeerIdentity>,
    Path(room): Path<String>,
    body: Result<Json<RoomMessage>, JsonRejection>,
) -> Response {
    let Json(message) = match body {
        Ok(body) => body,
        Err(e) => {
            return problem_response(
                StatusCode::BAD_REQUEST,
                format!("failed to parse request body: {e}"),
            )
        }
    };

    if !state.discovery.is_member(&room) {
        return problem_response(StatusCode::BAD_REQUEST, "user is not a member of this room");
    }

    // Published before the 204 goes out: once the sender sees success, the
    // local UI subscriber already has the event queued.
    state.events.publish_json(
        StreamName::Messages,
        &MessageEvent {
            sender: MessageSender {
                uuid: peer.uuid,
                username: message.username,
            },
            room,
            content: message.content,
        },
    );

    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::test_state;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn request(room: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/rooms/{room}/message"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn peer_router(state: &AppState, peer: Uuid) -> Router {
        routes(state.clone()).layer(Extension(PeerIdentity { uuid: peer }))
    }

    #[tokio::test]
    async fn message_to_joined_room_is_published() {
        let (_dir, state) = test_state();
        state.discovery.add_room("demo");
        let peer = Uuid::new_v4();
        let mut messages = state.events.subscribe(StreamName::Messages);

        let response = peer_router(&state, peer)
            .oneshot(request("demo", r#"{"username":"alice","content":"hi"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let event: MessageEvent = serde_json::from_str(&messages.try_recv().unwrap()).unwrap();
        assert_eq!(event.sender.uuid, peer);
        assert_eq!(event.sender.username, "alice");
        assert_eq!(event.room, "demo");
        assert_eq!(event.content, "hi");
    }

    #[tokio::test]
    async fn message_to_unjoined_room_is_rejected() {
        let (_dir, state) = test_state();
        let mut messages = state.events.subscribe(StreamName::Messages);

        let response = peer_router(&state, Uuid::new_v4())
            .oneshot(request("demo", r#"{"username":"alice","content":"hi"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let (_dir, state) = test_state();
        state.discovery.add_room("demo");

        let response = peer_router(&state, Uuid::new_v4())
            .oneshot(request("demo", "{not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
