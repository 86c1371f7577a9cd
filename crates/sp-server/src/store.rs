//! Durable sled-backed session store.
//!
//! One tree holds one JSON-encoded record per session, keyed by session id.
//! The registry is the only writer. Writes are flushed before success is
//! reported, so a record returned by [`SessionStore::get`] was always fully
//! written by some earlier [`SessionStore::put`].

use std::path::Path;

use session_pulse_core::{ApiError, SessionRecord};
use tracing::warn;

const TREE_SESSIONS: &str = "sessions";

/// Handle to the on-disk session store. Cheap to clone.
#[derive(Clone)]
pub struct SessionStore {
    db: sled::Db,
    sessions: sled::Tree,
}

impl SessionStore {
    /// Open (or create) the store under `path`.
    pub fn open(path: &Path) -> Result<Self, ApiError> {
        let db = sled::open(path).map_err(store_err)?;
        let sessions = db.open_tree(TREE_SESSIONS).map_err(store_err)?;
        Ok(Self { db, sessions })
    }

    /// Atomically replace the record for its id. Durable once this returns.
    pub fn put(&self, record: &SessionRecord) -> Result<(), ApiError> {
        let value = serde_json::to_vec(record)
            .map_err(|e| ApiError::Internal(format!("failed to encode session record: {e}")))?;
        self.sessions
            .insert(record.id.as_bytes(), value)
            .map_err(store_err)?;
        self.sessions.flush().map_err(store_err)?;
        Ok(())
    }

    /// Fetch one record; `Ok(None)` when the id is unknown.
    pub fn get(&self, id: &str) -> Result<Option<SessionRecord>, ApiError> {
        let Some(raw) = self.sessions.get(id.as_bytes()).map_err(store_err)? else {
            return Ok(None);
        };
        let record = serde_json::from_slice(&raw)
            .map_err(|e| ApiError::Internal(format!("failed to decode session record: {e}")))?;
        Ok(Some(record))
    }

    /// Load every record for startup recovery.
    ///
    /// A record that fails to decode is logged and skipped; one bad record
    /// must not abort the sweep.
    pub fn load_all(&self) -> Result<Vec<SessionRecord>, ApiError> {
        let mut out = Vec::new();
        for entry in self.sessions.iter() {
            let (key, value) = entry.map_err(store_err)?;
            match serde_json::from_slice::<SessionRecord>(&value) {
                Ok(record) => out.push(record),
                Err(e) => {
                    let id = String::from_utf8_lossy(&key).to_string();
                    warn!("Skipping undecodable session record {id}: {e}");
                }
            }
        }
        Ok(out)
    }

    /// Remove a record. Removing an unknown id is a no-op.
    pub fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.sessions.remove(id.as_bytes()).map_err(store_err)?;
        self.sessions.flush().map_err(store_err)?;
        Ok(())
    }

    /// Flush any buffered writes; called once more on clean shutdown.
    pub fn flush(&self) -> Result<(), ApiError> {
        self.db.flush().map_err(store_err)?;
        Ok(())
    }
}

fn store_err(e: sled::Error) -> ApiError {
    ApiError::StoreUnavailable(e.to_string())
}
