//! CryptoChat events — the in-memory broker behind the UI event stream.
//!
//! Two named streams exist for the lifetime of the node: `verification`
//! (operator prompts for unverified peers) and `messages` (delivered chat
//! messages). Publishing delivers to every currently subscribed consumer;
//! there is no replay — a subscriber that connects mid-stream misses prior
//! events. Within one stream, a subscriber sees events in publish order.

use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of each stream's broadcast channel. A subscriber that falls
/// further behind than this skips the lagged events rather than blocking
/// publishers.
const STREAM_CAPACITY: usize = 256;

/// The broker's named streams. A closed set: publishing to an unknown
/// stream is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamName {
    Verification,
    Messages,
}

impl StreamName {
    /// The wire name, used as the SSE event name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamName::Verification => "verification",
            StreamName::Messages => "messages",
        }
    }
}

impl std::fmt::Display for StreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi-subscriber fan-out of JSON payloads to the local UI.
pub struct Broker {
    verification: broadcast::Sender<String>,
    messages: broadcast::Sender<String>,
}

impl Broker {
    pub fn new() -> Self {
        let (verification, _) = broadcast::channel(STREAM_CAPACITY);
        let (messages, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            verification,
            messages,
        }
    }

    fn sender(&self, stream: StreamName) -> &broadcast::Sender<String> {
        match stream {
            StreamName::Verification => &self.verification,
            StreamName::Messages => &self.messages,
        }
    }

    /// Deliver a payload to every current subscriber of a stream.
    ///
    /// Publishing with no subscribers is not an error; the event is simply
    /// dropped.
    pub fn publish(&self, stream: StreamName, payload: String) {
        let receivers = self.sender(stream).send(payload).unwrap_or(0);
        tracing::trace!(stream = %stream, receivers, "Published event");
    }

    /// Serialize a value and publish it. Encode failures are logged and
    /// swallowed — event delivery is best-effort.
    pub fn publish_json<T: Serialize>(&self, stream: StreamName, value: &T) {
        match serde_json::to_string(value) {
            Ok(payload) => self.publish(stream, payload),
            Err(e) => {
                tracing::error!(stream = %stream, error = %e, "Failed to encode event payload")
            }
        }
    }

    /// Subscribe to a stream. The receiver sees only events published after
    /// this call.
    pub fn subscribe(&self, stream: StreamName) -> broadcast::Receiver<String> {
        self.sender(stream).subscribe()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_in_publish_order() {
        let broker = Broker::new();
        let mut rx = broker.subscribe(StreamName::Messages);

        broker.publish(StreamName::Messages, "one".into());
        broker.publish(StreamName::Messages, "two".into());
        broker.publish(StreamName::Messages, "three".into());

        assert_eq!(rx.recv().await.unwrap(), "one");
        assert_eq!(rx.recv().await.unwrap(), "two");
        assert_eq!(rx.recv().await.unwrap(), "three");
    }

    #[tokio::test]
    async fn late_subscriber_misses_prior_events() {
        let broker = Broker::new();
        broker.publish(StreamName::Messages, "missed".into());

        let mut rx = broker.subscribe(StreamName::Messages);
        broker.publish(StreamName::Messages, "seen".into());

        assert_eq!(rx.recv().await.unwrap(), "seen");
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn streams_are_independent() {
        let broker = Broker::new();
        let mut verification = broker.subscribe(StreamName::Verification);
        let mut messages = broker.subscribe(StreamName::Messages);

        broker.publish(StreamName::Verification, "v".into());
        assert_eq!(verification.recv().await.unwrap(), "v");
        assert!(matches!(
            messages.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn every_subscriber_receives_each_event() {
        let broker = Broker::new();
        let mut a = broker.subscribe(StreamName::Messages);
        let mut b = broker.subscribe(StreamName::Messages);

        broker.publish(StreamName::Messages, "hello".into());

        assert_eq!(a.recv().await.unwrap(), "hello");
        assert_eq!(b.recv().await.unwrap(), "hello");
    }

    #[test]
    fn publish_json_encodes_payloads() {
        let broker = Broker::new();
        let mut rx = broker.subscribe(StreamName::Verification);

        #[derive(serde::Serialize)]
        struct Notice<'a> {
            uuid: &'a str,
        }

        broker.publish_json(StreamName::Verification, &Notice { uuid: "abc" });
        assert_eq!(rx.try_recv().unwrap(), r#"{"uuid":"abc"}"#);
    }
}
