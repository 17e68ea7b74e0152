use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request body for message submission, on both the peer API and the UI API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomMessage {
    pub username: String,
    pub content: String,
}

/// Originator of a delivered message. The UUID is the peer's authenticated
/// identity from TLS; the username is whatever they claimed in the request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageSender {
    pub uuid: Uuid,
    pub username: String,
}

/// Payload of a `messages` stream event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageEvent {
    pub sender: MessageSender,
    pub room: String,
    pub content: String,
}

/// Payload of a `verification` stream event. The fingerprint is shown to
/// the operator so they can compare it out-of-band before accepting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationNotice {
    pub uuid: Uuid,
    pub fingerprint: String,
}

/// Response body for `GET /api/info`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    pub uuid: Uuid,
    pub fingerprint: String,
}

/// A peer observed advertising membership of a room. This is THE member
/// representation across discovery, the rooms snapshot, and the dispatcher.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomMember {
    pub uuid: Uuid,
    pub addr: SocketAddr,
}
