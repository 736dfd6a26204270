use std::sync::Arc;

use futures::Stream;
use tokio::sync::watch;
use tracing::{debug, info};

use super::clock::Clock;
use super::session::{AuthState, Session};
use crate::storage::SessionStore;

/// The live session and the only writer of the persisted record.
///
/// Every mutation runs inside the watch channel's modify closure, so the
/// storage side effect, the in-memory replacement and the notification are
/// seen as one step by readers and subscribers. Conditional mutations
/// (expiry clears, lazy rehydration) re-check their condition inside that
/// closure, never against an earlier snapshot.
///
/// `store` is `None` when the host has no durable storage (headless
/// rendering); all persistence is then skipped.
pub struct SessionState {
    store: Option<SessionStore>,
    clock: Arc<dyn Clock>,
    tx: watch::Sender<Option<Session>>,
}

impl SessionState {
    /// Create the state and rehydrate it from `store` when one is available.
    pub fn new(store: Option<SessionStore>, clock: Arc<dyn Clock>) -> Self {
        let (tx, _) = watch::channel(None);
        let state = Self { store, clock, tx };
        state.restore();
        state
    }

    /// State for a context without durable storage.
    pub fn headless(clock: Arc<dyn Clock>) -> Self {
        Self::new(None, clock)
    }

    fn restore(&self) {
        let Some(ref store) = self.store else {
            return;
        };
        match store.load() {
            Some(session) if !session.is_expired(self.now()) => {
                info!(user_id = session.user_id, "Restored session from storage");
                self.set(session);
            }
            Some(session) => {
                info!(user_id = session.user_id, "Stored session has expired");
                self.clear();
            }
            None => self.clear(),
        }
    }

    pub fn has_storage(&self) -> bool {
        self.store.is_some()
    }

    /// Current time according to the state's clock, in epoch seconds.
    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    /// Replace the live session, persist it and notify subscribers.
    pub fn set(&self, session: Session) {
        debug!(user_id = session.user_id, "Setting session");
        self.tx.send_modify(|current| {
            if let Some(ref store) = self.store {
                store.save(&session);
            }
            *current = Some(session);
        });
    }

    /// Drop the live session and its persisted copy.
    ///
    /// Subscribers are only woken if a session was actually held.
    pub fn clear(&self) {
        let cleared = self.tx.send_if_modified(|current| {
            if let Some(ref store) = self.store {
                store.erase();
            }
            current.take().is_some()
        });
        if cleared {
            info!("Session cleared");
        }
    }

    /// Clear the session only if the one held right now has expired at `now`.
    ///
    /// Returns whether anything was cleared. A session set after the caller
    /// last looked is left alone, together with its persisted record.
    pub fn clear_expired(&self, now: i64) -> bool {
        let cleared = self.tx.send_if_modified(|current| {
            if !current.as_ref().is_some_and(|session| session.is_expired(now)) {
                return false;
            }
            if let Some(ref store) = self.store {
                store.erase();
            }
            *current = None;
            true
        });
        if cleared {
            info!("Expired session cleared");
        }
        cleared
    }

    /// Whether the held session, if any, is valid at `now`.
    fn holds_valid(&self, now: i64) -> bool {
        self.tx
            .borrow()
            .as_ref()
            .is_some_and(|session| !session.is_expired(now))
    }

    /// Replay-latest subscription to session changes.
    pub fn changes(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }

    /// The same subscription as a stream. The first item is the current value.
    pub fn change_stream(&self) -> impl Stream<Item = Option<Session>> + Send + 'static {
        let rx = self.tx.subscribe();
        futures::stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let value = rx.borrow_and_update().clone();
            Some((value, (rx, false)))
        })
    }

    /// Check if the session is valid right now, healing state on the way.
    ///
    /// An empty memory slot is refilled from a valid persisted record. An
    /// expired session, in memory or in storage, is cleared before answering.
    /// A session set concurrently is never overwritten or cleared.
    pub fn is_authenticated(&self) -> bool {
        let current = self.current();
        let now = self.now();

        if let Some(session) = current {
            if !session.is_expired(now) {
                return true;
            }
            info!(user_id = session.user_id, "Session token has expired");
            if self.clear_expired(now) {
                return false;
            }
            // Replaced since the snapshot; judge the replacement.
            return self.holds_valid(now);
        }

        let Some(ref store) = self.store else {
            return false;
        };
        match store.load() {
            Some(session) if !session.is_expired(now) => {
                let user_id = session.user_id;
                // Already persisted; only memory and subscribers need it.
                let filled = self.tx.send_if_modified(|current| {
                    if current.is_some() {
                        return false;
                    }
                    *current = Some(session);
                    true
                });
                if filled {
                    info!(user_id, "Rehydrated session from storage");
                }
                self.holds_valid(now)
            }
            Some(_) => {
                self.tx.send_if_modified(|current| {
                    if current.is_none() {
                        store.erase();
                    }
                    false
                });
                self.holds_valid(now)
            }
            None => false,
        }
    }

    /// The live token if it has not expired. Never mutates state.
    pub fn valid_token(&self) -> Option<String> {
        let now = self.now();
        self.tx
            .borrow()
            .as_ref()
            .filter(|session| !session.is_expired(now))
            .map(|session| session.token.clone())
    }

    /// Derived state at this instant, without clearing anything.
    pub fn state(&self) -> AuthState {
        AuthState::from_session(self.current(), self.now())
    }
}
