//! The local UI API: room management, verification decisions, outbound
//! messages, the SSE event stream, and the embedded frontend.
//!
//! Served as plaintext HTTP, bound to loopback by default — this surface
//! trusts its caller.

use std::collections::HashMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use cryptochat_common::api::problem_response;
use cryptochat_common::types::{NodeInfo, RoomMember, RoomMessage};
use cryptochat_events::StreamName;

use crate::dispatch;
use crate::server::spa;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/info", get(info))
        .route("/api/rooms", get(rooms))
        .route("/api/rooms/{room}", post(join_room).delete(leave_room))
        .route("/api/rooms/{room}/message", post(send_message))
        .route("/api/users/{uuid}/verify", post(verify_user).delete(reject_user))
        .route("/api/events", get(events))
        .fallback(spa::handler)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(
    state: AppState,
    listener: TcpListener,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "UI listening");

    axum::serve(listener, routes(state))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await?;

    tracing::debug!("UI server stopped");
    Ok(())
}

async fn info(State(state): State<AppState>) -> Json<NodeInfo> {
    Json(NodeInfo {
        uuid: state.identity.uuid(),
        fingerprint: state.identity.fingerprint(),
    })
}

async fn rooms(State(state): State<AppState>) -> Json<HashMap<String, Vec<RoomMember>>> {
    Json(state.discovery.rooms())
}

async fn join_room(State(state): State<AppState>, Path(room): Path<String>) -> Response {
    if state.discovery.add_room(&room) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        problem_response(
            StatusCode::BAD_REQUEST,
            "user is already a member of this room",
        )
    }
}

async fn leave_room(State(state): State<AppState>, Path(room): Path<String>) -> Response {
    if state.discovery.remove_room(&room) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        problem_response(StatusCode::BAD_REQUEST, "user is not a member of this room")
    }
}

async fn send_message(
    State(state): State<AppState>,
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

    // Fan-out is best-effort and runs in the background; the UI gets 204
    // regardless of per-peer outcomes.
    tokio::spawn(dispatch::fan_out(state, room, message));

    StatusCode::NO_CONTENT.into_response()
}

async fn verify_user(State(state): State<AppState>, Path(uuid): Path<Uuid>) -> Response {
    let Some(decision) = state.trust.take_pending(uuid) else {
        return problem_response(StatusCode::BAD_REQUEST, "user verification not in progress");
    };

    if let Err(e) = state.store.mark_verified(uuid) {
        return problem_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to mark user as verified: {e}"),
        );
    }
    let _ = decision.send(true);

    tracing::info!(%uuid, "Marked user as verified");
    StatusCode::NO_CONTENT.into_response()
}

async fn reject_user(State(state): State<AppState>, Path(uuid): Path<Uuid>) -> Response {
    let Some(decision) = state.trust.take_pending(uuid) else {
        return problem_response(StatusCode::BAD_REQUEST, "user verification not in progress");
    };

    // Waking the gate without setting the verified flag is the rejection.
    let _ = decision.send(true);

    tracing::info!(%uuid, "Rejected user verification");
    StatusCode::NO_CONTENT.into_response()
}

/// SSE stream multiplexing both broker streams; the stream name becomes
/// the SSE event name.
async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let mut verification = state.events.subscribe(StreamName::Verification);
    let mut messages = state.events.subscribe(StreamName::Messages);

    let stream = async_stream::stream! {
        loop {
            let (stream_name, payload) = tokio::select! {
                payload = verification.recv() => (StreamName::Verification, payload),
                payload = messages.recv() => (StreamName::Messages, payload),
            };

            match payload {
                Ok(data) => {
                    yield Ok(Event::default().event(stream_name.as_str()).data(data));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(stream = %stream_name, skipped, "SSE subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::test_state;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use cryptochat_common::api::ErrorBody;
    use tower::ServiceExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    fn req(method: &str, path: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn info_returns_uuid_and_fingerprint() {
        let (_dir, state) = test_state();
        let expected_uuid = state.identity.uuid();
        let expected_fp = state.identity.fingerprint();

        let response = routes(state).oneshot(get("/api/info")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let info = body_json(response).await;
        assert_eq!(info["uuid"], expected_uuid.to_string());
        assert_eq!(info["fingerprint"], expected_fp);
        assert_eq!(info["fingerprint"].as_str().unwrap().len(), 40);
    }

    #[tokio::test]
    async fn join_then_rejoin_room() {
        let (_dir, state) = test_state();
        let app = routes(state);

        let response = app
            .clone()
            .oneshot(req("POST", "/api/rooms/demo"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.oneshot(req("POST", "/api/rooms/demo")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/problem+json"
        );
        let body = body_json(response).await;
        assert_eq!(body["message"], "user is already a member of this room");
    }

    #[tokio::test]
    async fn leave_requires_membership() {
        let (_dir, state) = test_state();
        let app = routes(state);

        let response = app
            .clone()
            .oneshot(req("DELETE", "/api/rooms/demo"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        app.clone()
            .oneshot(req("POST", "/api/rooms/demo"))
            .await
            .unwrap();
        let response = app.oneshot(req("DELETE", "/api/rooms/demo")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn rooms_snapshot_is_json_object() {
        let (_dir, state) = test_state();
        let response = routes(state).oneshot(get("/api/rooms")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_json(response).await.is_object());
    }

    #[tokio::test]
    async fn verify_without_pending_is_rejected() {
        let (_dir, state) = test_state();
        let app = routes(state);
        let uuid = Uuid::new_v4();

        for method in ["POST", "DELETE"] {
            let response = app
                .clone()
                .oneshot(req(method, &format!("/api/users/{uuid}/verify")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body: ErrorBody =
                serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap())
                    .unwrap();
            assert_eq!(body.message, "user verification not in progress");
        }
    }

    #[tokio::test]
    async fn send_message_returns_no_content_without_peers() {
        let (_dir, state) = test_state();
        state.discovery.add_room("demo");

        let request = Request::builder()
            .method("POST")
            .uri("/api/rooms/demo/message")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"username":"alice","content":"hi"}"#))
            .unwrap();

        let response = routes(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn unknown_path_serves_spa() {
        let (_dir, state) = test_state();
        let response = routes(state).oneshot(get("/some/client/route")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );
    }
}
