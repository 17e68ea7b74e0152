//! CryptoChat store — the node's single-file database.
//!
//! One SQLite file holds two logical tables: `kv` for the node's own
//! certificate and private key, and `users` for certificates pinned on
//! first sight. The file is created with owner-only permissions because it
//! contains the node's private key.
//!
//! The [`Store`] wraps a [`rusqlite::Connection`] behind a mutex; every
//! operation is a single short statement, so callers (including the TLS
//! verifier) can use it from any thread.

mod error;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

pub use self::error::{Result, StoreError};

const KV_CERT: &str = "cert";
const KV_KEY: &str = "key";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kv(key TEXT NOT NULL PRIMARY KEY, value BLOB);
CREATE TABLE IF NOT EXISTS users(
    uuid BLOB NOT NULL PRIMARY KEY,
    cert BLOB NOT NULL,
    verified BOOL NOT NULL DEFAULT FALSE
);
";

/// A user record: a UUID pinned to the first certificate it presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub uuid: Uuid,
    pub cert_der: Vec<u8>,
    pub verified: bool,
}

/// Wrapper around the node database connection.
pub struct Store {
    conn: Mutex<Connection>,
    created: bool,
}

impl Store {
    /// Open (or create) the node database at an explicit path.
    ///
    /// A missing file is created with mode 0600 before SQLite touches it,
    /// then the schema is initialized. `created()` reports whether this
    /// call made a fresh database.
    pub fn open(path: &Path) -> Result<Self> {
        let created = !path.exists();
        if created {
            create_restricted(path)?;
        }

        tracing::info!(path = %path.display(), created, "Opening node database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
            created,
        })
    }

    /// Whether `open` created the database file.
    pub fn created(&self) -> bool {
        self.created
    }

    pub fn kv_put(&self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO kv(key, value) VALUES (?1, ?2)",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    pub fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Persist the node's identity blobs.
    pub fn save_identity(&self, cert_der: &[u8], key_der: &[u8]) -> Result<()> {
        self.kv_put(KV_CERT, cert_der)?;
        self.kv_put(KV_KEY, key_der)?;
        Ok(())
    }

    /// Load the node's identity blobs as `(cert_der, key_der)`.
    ///
    /// Missing either entry is a fatal startup condition.
    pub fn load_identity(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let cert = self.kv_get(KV_CERT)?;
        let key = self.kv_get(KV_KEY)?;
        match (cert, key) {
            (Some(cert), Some(key)) => Ok((cert, key)),
            _ => Err(StoreError::MissingIdentity),
        }
    }

    /// Pin a certificate for a UUID on first sight.
    ///
    /// Returns `true` if a new record was inserted, `false` if the UUID was
    /// already pinned. The stored certificate is never overwritten — a UUID
    /// binds to one key for the lifetime of the store.
    pub fn insert_user_if_absent(&self, uuid: Uuid, cert_der: &[u8]) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users(uuid, cert, verified) VALUES (?1, ?2, FALSE)",
            rusqlite::params![uuid.as_bytes().as_slice(), cert_der],
        )?;
        if inserted > 0 {
            tracing::debug!(%uuid, "Pinned new (unverified) user");
        }
        Ok(inserted > 0)
    }

    pub fn user(&self, uuid: Uuid) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT uuid, cert, verified FROM users WHERE uuid = ?1",
                rusqlite::params![uuid.as_bytes().as_slice()],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, bool>(2)?,
                    ))
                },
            )
            .optional()?;

        match record {
            Some((raw_uuid, cert_der, verified)) => Ok(Some(UserRecord {
                uuid: Uuid::from_slice(&raw_uuid)?,
                cert_der,
                verified,
            })),
            None => Ok(None),
        }
    }

    /// Mark a pinned user as verified by the operator.
    ///
    /// Returns `false` if no record exists for the UUID.
    pub fn mark_verified(&self, uuid: Uuid) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE users SET verified = TRUE WHERE uuid = ?1",
            rusqlite::params![uuid.as_bytes().as_slice()],
        )?;
        Ok(updated > 0)
    }
}

/// Pre-create the database file with owner-only permissions.
#[cfg(unix)]
fn create_restricted(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_restricted(path: &Path) -> std::io::Result<()> {
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn open_reports_creation_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let store = Store::open(&path).unwrap();
        assert!(store.created());
        drop(store);

        let store = Store::open(&path).unwrap();
        assert!(!store.created());
    }

    #[cfg(unix)]
    #[test]
    fn fresh_database_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let _store = Store::open(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn kv_round_trip() {
        let (_dir, store) = open_temp();
        assert_eq!(store.kv_get("cert").unwrap(), None);

        store.kv_put("cert", b"DER bytes").unwrap();
        assert_eq!(store.kv_get("cert").unwrap().unwrap(), b"DER bytes");
    }

    #[test]
    fn load_identity_requires_both_blobs() {
        let (_dir, store) = open_temp();
        assert!(matches!(
            store.load_identity(),
            Err(StoreError::MissingIdentity)
        ));

        store.kv_put("cert", b"cert").unwrap();
        assert!(matches!(
            store.load_identity(),
            Err(StoreError::MissingIdentity)
        ));

        store.kv_put("key", b"key").unwrap();
        let (cert, key) = store.load_identity().unwrap();
        assert_eq!(cert, b"cert");
        assert_eq!(key, b"key");
    }

    #[test]
    fn insert_user_if_absent_pins_once() {
        let (_dir, store) = open_temp();
        let uuid = Uuid::new_v4();

        assert!(store.insert_user_if_absent(uuid, b"first cert").unwrap());
        assert!(!store.insert_user_if_absent(uuid, b"second cert").unwrap());

        // The pinned certificate never changes.
        let record = store.user(uuid).unwrap().unwrap();
        assert_eq!(record.cert_der, b"first cert");
        assert!(!record.verified);
    }

    #[test]
    fn mark_verified_round_trip() {
        let (_dir, store) = open_temp();
        let uuid = Uuid::new_v4();

        assert!(!store.mark_verified(uuid).unwrap());

        store.insert_user_if_absent(uuid, b"cert").unwrap();
        assert!(store.mark_verified(uuid).unwrap());
        assert!(store.user(uuid).unwrap().unwrap().verified);
    }

    #[test]
    fn records_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let uuid = Uuid::new_v4();

        {
            let store = Store::open(&path).unwrap();
            store.save_identity(b"cert", b"key").unwrap();
            store.insert_user_if_absent(uuid, b"peer cert").unwrap();
            store.mark_verified(uuid).unwrap();
        }

        let store = Store::open(&path).unwrap();
        assert_eq!(store.load_identity().unwrap().0, b"cert");
        let record = store.user(uuid).unwrap().unwrap();
        assert!(record.verified);
        assert_eq!(record.cert_der, b"peer cert");
    }
}
