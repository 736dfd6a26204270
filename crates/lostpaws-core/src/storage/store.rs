use std::sync::Arc;

use tracing::{debug, warn};

use super::StorageMedium;
use crate::auth::Session;

/// Key the session record is stored under unless configured otherwise.
pub const DEFAULT_SESSION_KEY: &str = "currentUser";

/// The persisted copy of the session.
///
/// This is a cache of the in-memory session, never the source of truth while
/// the process is live. None of its operations fail: storage errors are logged
/// and the record is treated as absent.
#[derive(Clone)]
pub struct SessionStore {
    medium: Arc<dyn StorageMedium>,
    key: String,
}

impl SessionStore {
    pub fn new(medium: Arc<dyn StorageMedium>) -> Self {
        Self::with_key(medium, DEFAULT_SESSION_KEY)
    }

    pub fn with_key(medium: Arc<dyn StorageMedium>, key: &str) -> Self {
        Self {
            medium,
            key: key.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the persisted session. A record that does not parse is erased.
    pub fn load(&self) -> Option<Session> {
        let contents = match self.medium.get(&self.key) {
            Ok(Some(contents)) => contents,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to read session record");
                return None;
            }
        };

        match serde_json::from_str::<Session>(&contents) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Discarding corrupt session record");
                self.erase();
                None
            }
        }
    }

    /// Overwrite the persisted record with `session`.
    pub fn save(&self, session: &Session) {
        let contents = match serde_json::to_string(session) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(error = %e, "Failed to serialize session");
                return;
            }
        };
        if let Err(e) = self.medium.set(&self.key, &contents) {
            warn!(key = %self.key, error = %e, "Failed to save session record");
        }
    }

    /// Remove the persisted record. Safe to call when nothing is stored.
    pub fn erase(&self) {
        match self.medium.remove(&self.key) {
            Ok(()) => debug!(key = %self.key, "Erased session record"),
            Err(e) => warn!(key = %self.key, error = %e, "Failed to erase session record"),
        }
    }
}
