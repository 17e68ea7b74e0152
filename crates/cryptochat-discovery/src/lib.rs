//! CryptoChat discovery — DNS-SD peer and room discovery.
//!
//! Each node advertises itself as an instance of `_cryptochat._tcp.local.`
//! named by its UUID, on the peer API port, with one `room=<name>` TXT
//! record per joined room. A background loop browses the same service type
//! every few seconds and maintains the observed peer→rooms registry.
//!
//! Discovery is mDNS-only by design: the system works within a single
//! broadcast domain and makes no attempt to reach further.

mod daemon;
pub mod error;
mod registry;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use cryptochat_common::types::RoomMember;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use self::daemon::{MdnsDaemon, Sighting};
use self::registry::{parse_room_txt, RoomRegistry};
pub use self::error::{DiscoveryError, Result};

/// DNS-SD service type, including the mDNS domain.
pub const SERVICE_TYPE: &str = "_cryptochat._tcp.local.";

/// How often the browse loop runs.
const BROWSE_INTERVAL: Duration = Duration::from_secs(3);

/// How long each browse collects results before stopping.
const BROWSE_WINDOW: Duration = Duration::from_millis(500);

/// The discovery engine: registration, browsing, and the room registry.
///
/// Membership operations work from the moment of construction; the mDNS
/// daemon itself is only brought up by [`DiscoveryCore::run`], which also
/// publishes whatever membership accumulated before it started.
pub struct DiscoveryCore {
    id: Uuid,
    daemon: OnceLock<MdnsDaemon>,
    registry: RoomRegistry,
    port: AtomicU16,
    active: AtomicBool,
}

impl DiscoveryCore {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            daemon: OnceLock::new(),
            registry: RoomRegistry::new(),
            port: AtomicU16::new(0),
            active: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Register the local service and run the browse loop until cancelled.
    pub async fn run(&self, port: u16, cancel: CancellationToken) -> Result<()> {
        let created = MdnsDaemon::new()?;
        let daemon = self.daemon.get_or_init(move || created);

        self.active.store(true, Ordering::SeqCst);
        daemon.register(
            SERVICE_TYPE,
            &self.id.to_string(),
            port,
            &self.registry.membership_txt(),
        )?;
        // Membership changes republish from here on.
        self.port.store(port, Ordering::SeqCst);
        tracing::info!(%port, "Discovery service registered");

        let mut ticker = tokio::time::interval(BROWSE_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.browse_once(daemon).await,
            }
        }

        self.shutdown();
        Ok(())
    }

    async fn browse_once(&self, daemon: &MdnsDaemon) {
        let sightings = match daemon.browse_window(SERVICE_TYPE, BROWSE_WINDOW).await {
            Ok(sightings) => sightings,
            Err(e) => {
                tracing::warn!(error = %e, "DNS-SD browse failed");
                return;
            }
        };

        for sighting in sightings {
            if let Some((member, rooms)) = accept_sighting(self.id, &sighting) {
                self.registry.observe(member, &rooms);
            }
        }
    }

    /// Join a room and republish the TXT advertisement.
    /// Returns `false` if already a member.
    pub fn add_room(&self, room: &str) -> bool {
        if !self.registry.add_room(room) {
            return false;
        }
        self.republish();
        true
    }

    /// Leave a room and republish the TXT advertisement.
    /// Returns `false` if not a member.
    pub fn remove_room(&self, room: &str) -> bool {
        if !self.registry.remove_room(room) {
            return false;
        }
        self.republish();
        true
    }

    pub fn is_member(&self, room: &str) -> bool {
        self.registry.is_member(room)
    }

    /// Deep copy of the observed room map.
    pub fn rooms(&self) -> HashMap<String, Vec<RoomMember>> {
        self.registry.rooms()
    }

    /// Members currently advertising a room.
    pub fn room_members(&self, room: &str) -> Vec<RoomMember> {
        self.registry.rooms().remove(room).unwrap_or_default()
    }

    /// Re-register with the current membership TXT records. mdns-sd has no
    /// in-place TXT update, so this is an unregister+register cycle.
    fn republish(&self) {
        let port = self.port.load(Ordering::SeqCst);
        let Some(daemon) = self.daemon.get() else {
            return;
        };
        if port == 0 {
            // run() has not registered yet; it will pick up the membership.
            return;
        }

        let instance = self.id.to_string();
        let txt = self.registry.membership_txt();

        if let Err(e) = daemon.unregister(SERVICE_TYPE, &instance) {
            tracing::debug!(error = %e, "Unregister before TXT republish failed");
        }
        if let Err(e) = daemon.register(SERVICE_TYPE, &instance, port, &txt) {
            tracing::warn!(error = %e, "Failed to republish TXT records");
        }
    }

    /// Deregister and stop the daemon. Idempotent; also invoked when the
    /// browse loop exits.
    pub fn shutdown(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let Some(daemon) = self.daemon.get() else {
            return;
        };

        if let Err(e) = daemon.unregister(SERVICE_TYPE, &self.id.to_string()) {
            tracing::debug!(error = %e, "Unregister during shutdown failed");
        }
        if let Err(e) = daemon.shutdown() {
            tracing::warn!(error = %e, "Error shutting down mDNS daemon");
        }
        tracing::info!("Discovery shut down");
    }
}

/// Turn a browse sighting into a registry update, excluding ourselves.
fn accept_sighting(self_id: Uuid, sighting: &Sighting) -> Option<(RoomMember, Vec<String>)> {
    if sighting.uuid == self_id {
        return None;
    }

    let rooms = parse_room_txt(&sighting.txt);
    if rooms.is_empty() {
        return None;
    }

    Some((
        RoomMember {
            uuid: sighting.uuid,
            addr: sighting.addr,
        },
        rooms,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sighting(uuid: Uuid, txt: Vec<(&str, &str)>) -> Sighting {
        Sighting {
            uuid,
            addr: "192.168.1.7:9443".parse().unwrap(),
            txt: txt
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn own_instance_is_excluded() {
        let self_id = Uuid::new_v4();
        let own = sighting(self_id, vec![("room", "demo")]);
        assert!(accept_sighting(self_id, &own).is_none());
    }

    #[test]
    fn peer_with_rooms_is_accepted() {
        let self_id = Uuid::new_v4();
        let peer_id = Uuid::new_v4();
        let peer = sighting(peer_id, vec![("room", "demo"), ("extra", "1")]);

        let (member, rooms) = accept_sighting(self_id, &peer).unwrap();
        assert_eq!(member.uuid, peer_id);
        assert_eq!(rooms, vec!["demo"]);
    }

    #[test]
    fn peer_without_rooms_is_skipped() {
        let self_id = Uuid::new_v4();
        let peer = sighting(Uuid::new_v4(), vec![("version", "1")]);
        assert!(accept_sighting(self_id, &peer).is_none());
    }

    #[test]
    fn membership_works_before_daemon_starts() {
        let discovery = DiscoveryCore::new(Uuid::new_v4());

        assert!(discovery.add_room("demo"));
        assert!(!discovery.add_room("demo"));
        assert!(discovery.is_member("demo"));
        assert!(discovery.remove_room("demo"));
        assert!(!discovery.remove_room("demo"));
    }
}
