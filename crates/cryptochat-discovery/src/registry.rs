use std::collections::HashMap;
use std::sync::RwLock;

use cryptochat_common::types::RoomMember;
use regex::Regex;

/// TXT record key for the local membership advertisement.
const ROOM_TXT_KEY: &str = "room";

/// Room state: the rooms this node has joined, and the rooms peers have
/// been observed advertising.
///
/// One lock guards both — membership changes and browse results touch the
/// same consumers. Locks are held only for map/Vec manipulation; snapshots
/// are deep copies taken under the read lock.
pub(crate) struct RoomRegistry {
    state: RwLock<State>,
}

struct State {
    /// Rooms this node is a member of. Order is not semantic; duplicates
    /// are forbidden.
    membership: Vec<String>,
    /// Observed peers per room. Entries are overwritten by UUID and linger
    /// until overwritten; peers that stop advertising are not evicted.
    rooms: HashMap<String, Vec<RoomMember>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                membership: Vec::new(),
                rooms: HashMap::new(),
            }),
        }
    }

    /// Join a room. Returns `false` if already a member.
    pub fn add_room(&self, room: &str) -> bool {
        let mut state = self.state.write().unwrap();
        if state.membership.iter().any(|r| r == room) {
            return false;
        }
        state.membership.push(room.to_string());
        true
    }

    /// Leave a room. Returns `false` if not a member.
    pub fn remove_room(&self, room: &str) -> bool {
        let mut state = self.state.write().unwrap();
        match state.membership.iter().position(|r| r == room) {
            Some(i) => {
                state.membership.swap_remove(i);
                true
            }
            None => false,
        }
    }

    pub fn is_member(&self, room: &str) -> bool {
        let state = self.state.read().unwrap();
        state.membership.iter().any(|r| r == room)
    }

    /// TXT pairs advertising the current membership, one `room=<name>` per
    /// joined room.
    pub fn membership_txt(&self) -> Vec<(String, String)> {
        let state = self.state.read().unwrap();
        state
            .membership
            .iter()
            .map(|room| (ROOM_TXT_KEY.to_string(), room.clone()))
            .collect()
    }

    /// Record that a peer advertised membership of the given rooms,
    /// overwriting any previous entry for its UUID in each room.
    pub fn observe(&self, member: RoomMember, rooms: &[String]) {
        if rooms.is_empty() {
            return;
        }

        let mut state = self.state.write().unwrap();
        for room in rooms {
            let members = state.rooms.entry(room.clone()).or_default();
            match members.iter_mut().find(|m| m.uuid == member.uuid) {
                Some(existing) => *existing = member,
                None => members.push(member),
            }
        }
    }

    /// Deep copy of the observed room map, safe to iterate and mutate
    /// outside the lock.
    pub fn rooms(&self) -> HashMap<String, Vec<RoomMember>> {
        let state = self.state.read().unwrap();
        state
            .rooms
            .iter()
            .map(|(room, members)| (room.clone(), members.clone()))
            .collect()
    }
}

/// Extract room names from a peer's TXT records.
///
/// Records are matched against `^room=(.+)$` after reassembling the
/// key/value split; anything else is silently ignored for forward
/// compatibility.
pub(crate) fn parse_room_txt(txt: &[(String, String)]) -> Vec<String> {
    // Compiling per call is fine at one browse every few seconds.
    let room_re = Regex::new(r"^room=(.+)$").unwrap();

    txt.iter()
        .filter_map(|(key, value)| {
            let record = format!("{key}={value}");
            room_re
                .captures(&record)
                .map(|captures| captures[1].to_string())
        })
        .collect()
}
