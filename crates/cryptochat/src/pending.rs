//! Pending peer verifications.
//!
//! When an unverified peer connects, its handshake gate parks on a
//! per-UUID decision signal until the operator accepts or rejects via the
//! UI. Several concurrent connections from the same peer share one signal,
//! and the UI prompt is published only when the entry is first created.
//!
//! Entries are removed when the operator decides, or when the last waiter
//! abandons the wait (its connection dropped) — a cancelled handshake
//! leaves nothing behind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use uuid::Uuid;

struct Entry {
    decision: Arc<watch::Sender<bool>>,
    waiters: usize,
}

/// Map of in-flight verification prompts, keyed by peer UUID.
pub struct PendingVerifications {
    inner: Mutex<HashMap<Uuid, Entry>>,
}

impl PendingVerifications {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Register a waiter for a UUID, creating the entry if absent.
    ///
    /// Returns the waiter and whether this call created the entry (the
    /// caller publishes the verification prompt exactly then). The
    /// presence check and insert are a single atomic region.
    pub fn subscribe(self: &Arc<Self>, uuid: Uuid) -> (Waiter, bool) {
        let mut map = self.inner.lock().unwrap();

        let created = !map.contains_key(&uuid);
        let entry = map.entry(uuid).or_insert_with(|| {
            let (tx, _) = watch::channel(false);
            Entry {
                decision: Arc::new(tx),
                waiters: 0,
            }
        });

        entry.waiters += 1;
        let waiter = Waiter {
            pending: Arc::clone(self),
            uuid,
            decision: Arc::clone(&entry.decision),
            rx: entry.decision.subscribe(),
        };

        (waiter, created)
    }

    /// Take the decision sender for a UUID, removing the entry.
    ///
    /// Returns `None` when no verification is pending.
    pub fn take(&self, uuid: Uuid) -> Option<Arc<watch::Sender<bool>>> {
        let mut map = self.inner.lock().unwrap();
        map.remove(&uuid).map(|entry| entry.decision)
    }

    #[cfg(test)]
    fn contains(&self, uuid: Uuid) -> bool {
        self.inner.lock().unwrap().contains_key(&uuid)
    }
}

/// One connection's handle on a pending verification.
pub struct Waiter {
    pending: Arc<PendingVerifications>,
    uuid: Uuid,
    decision: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Waiter {
    /// Wait until the operator has decided. The decision itself (accept or
    /// reject) is read back from the user record afterwards.
    pub async fn decided(&mut self) {
        // We hold a sender clone, so the channel cannot close under us.
        let _ = self.rx.wait_for(|decided| *decided).await;
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let mut map = self.pending.inner.lock().unwrap();
        if let Some(entry) = map.get_mut(&self.uuid) {
            // Only touch the entry this waiter subscribed to; the operator
            // may have consumed it and a newer one may exist.
            if Arc::ptr_eq(&entry.decision, &self.decision) {
                entry.waiters -= 1;
                if entry.waiters == 0 {
                    map.remove(&self.uuid);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn prompt_created_once_per_entry() {
        let pending = Arc::new(PendingVerifications::new());
        let uuid = Uuid::new_v4();

        let (_a, created_a) = pending.subscribe(uuid);
        let (_b, created_b) = pending.subscribe(uuid);

        assert!(created_a);
        assert!(!created_b);
    }

    #[tokio::test]
    async fn decision_wakes_all_waiters() {
        let pending = Arc::new(PendingVerifications::new());
        let uuid = Uuid::new_v4();

        let (mut a, _) = pending.subscribe(uuid);
        let (mut b, _) = pending.subscribe(uuid);

        let decision = pending.take(uuid).unwrap();
        let _ = decision.send(true);

        tokio::time::timeout(Duration::from_secs(1), a.decided())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), b.decided())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn take_removes_entry() {
        let pending = Arc::new(PendingVerifications::new());
        let uuid = Uuid::new_v4();

        assert!(pending.take(uuid).is_none());

        let (_waiter, _) = pending.subscribe(uuid);
        assert!(pending.take(uuid).is_some());
        assert!(pending.take(uuid).is_none());
    }

    #[tokio::test]
    async fn abandoned_wait_clears_entry() {
        let pending = Arc::new(PendingVerifications::new());
        let uuid = Uuid::new_v4();

        let (waiter, _) = pending.subscribe(uuid);
        drop(waiter);

        assert!(!pending.contains(uuid));
        // A reconnecting peer raises a fresh prompt.
        let (_waiter, created) = pending.subscribe(uuid);
        assert!(created);
    }

    #[tokio::test]
    async fn surviving_waiter_keeps_entry_alive() {
        let pending = Arc::new(PendingVerifications::new());
        let uuid = Uuid::new_v4();

        let (keep, _) = pending.subscribe(uuid);
        let (dropped, _) = pending.subscribe(uuid);
        drop(dropped);

        assert!(pending.contains(uuid));
        drop(keep);
        assert!(!pending.contains(uuid));
    }
}
