//! Background expiry checks for the live session.
//!
//! The monitor wakes once a minute (and immediately on start), clears the
//! session when its token has lapsed, and broadcasts an [`ExpiryWarning`] when
//! the token is inside the warning threshold.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::state::SessionState;
use super::token;

/// Seconds between expiry checks.
pub const CHECK_INTERVAL_SECS: u64 = 60;

/// Buffer size for the warning channel.
/// Warnings are advisory; slow receivers simply miss old ones.
pub(crate) const WARNING_CHANNEL_SIZE: usize = 16;

/// Published when the live token is about to expire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryWarning {
    pub user_id: i64,
    pub remaining: chrono::Duration,
}

/// What a single check found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No session held
    Idle,
    Valid,
    ExpiringSoon(chrono::Duration),
    /// The session was cleared
    Expired,
}

pub struct ExpirationMonitor {
    state: Arc<SessionState>,
    interval: Duration,
    threshold: chrono::Duration,
    warnings: broadcast::Sender<ExpiryWarning>,
}

impl ExpirationMonitor {
    pub fn new(state: Arc<SessionState>) -> Self {
        let (warnings, _) = broadcast::channel(WARNING_CHANNEL_SIZE);
        Self {
            state,
            interval: Duration::from_secs(CHECK_INTERVAL_SECS),
            threshold: token::default_warning_threshold(),
            warnings,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_threshold(mut self, threshold: chrono::Duration) -> Self {
        self.threshold = threshold;
        self
    }

    /// Publish warnings on an existing channel, so subscribers outlive this monitor.
    pub fn with_warnings(mut self, warnings: broadcast::Sender<ExpiryWarning>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Subscribe to expiry warnings. Having no subscribers is fine.
    pub fn warnings(&self) -> broadcast::Receiver<ExpiryWarning> {
        self.warnings.subscribe()
    }

    /// Run one check against the live session.
    pub fn tick(&self) -> TickOutcome {
        let Some(mut session) = self.state.current() else {
            return TickOutcome::Idle;
        };

        let now = self.state.now();
        if session.is_expired(now) {
            if self.state.clear_expired(now) {
                info!(user_id = session.user_id, "Session expired, logged out");
                return TickOutcome::Expired;
            }
            // A new session replaced the stale one while checking.
            match self.state.current() {
                Some(fresh) if !fresh.is_expired(now) => session = fresh,
                _ => return TickOutcome::Idle,
            }
        }

        let remaining = session.time_until_expiry(now);
        if remaining <= self.threshold {
            warn!(
                user_id = session.user_id,
                seconds = remaining.num_seconds(),
                "Session expires soon"
            );
            // No receivers is not an error
            let _ = self.warnings.send(ExpiryWarning {
                user_id: session.user_id,
                remaining,
            });
            return TickOutcome::ExpiringSoon(remaining);
        }

        debug!(user_id = session.user_id, seconds = remaining.num_seconds(), "Session valid");
        TickOutcome::Valid
    }

    /// Spawn the repeating check on the current tokio runtime.
    ///
    /// The first check runs immediately. The monitor is consumed: once the
    /// returned handle is stopped, a new monitor must be built to check again.
    pub fn start(self) -> MonitorHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let period = self.interval;

        let task = tokio::spawn(async move {
            info!(interval_secs = period.as_secs(), "Expiration monitor started");
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        self.tick();
                    }
                }
            }
            debug!("Expiration monitor loop exited");
        });

        MonitorHandle { shutdown, task }
    }
}

/// Cancellation handle for a started [`ExpirationMonitor`].
///
/// Dropping the handle stops the monitor.
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop the monitor. Calling this more than once is harmless.
    pub fn stop(&self) {
        let was_stopped = self.shutdown.send_replace(true);
        self.task.abort();
        if !was_stopped {
            info!("Expiration monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        !*self.shutdown.borrow() && !self.task.is_finished()
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::{GatedClock, ManualClock};
    use crate::auth::session::session_expiring_at;
    use crate::storage::{MemoryStorage, SessionStore};

    const NOW: i64 = 1_700_000_000;

    fn setup() -> (Arc<ManualClock>, Arc<SessionState>) {
        let clock = Arc::new(ManualClock::new(NOW));
        let state = Arc::new(SessionState::headless(clock.clone()));
        (clock, state)
    }

    #[test]
    fn test_tick_without_session_is_idle() {
        let (_, state) = setup();
        let monitor = ExpirationMonitor::new(state);
        assert_eq!(monitor.tick(), TickOutcome::Idle);
    }

    #[test]
    fn test_tick_clears_expired_session() {
        let (_, state) = setup();
        state.set(session_expiring_at(NOW - 1));
        let monitor = ExpirationMonitor::new(state.clone());
        assert_eq!(monitor.tick(), TickOutcome::Expired);
        assert_eq!(state.current(), None);
    }

    #[test]
    fn test_tick_keeps_session_set_after_stale_read() {
        let medium = Arc::new(MemoryStorage::new());
        let clock = Arc::new(GatedClock::new(NOW));
        let state = Arc::new(SessionState::new(
            Some(SessionStore::new(medium.clone())),
            clock.clone(),
        ));
        state.set(session_expiring_at(NOW - 1));
        let monitor = ExpirationMonitor::new(state.clone());
        let fresh = session_expiring_at(NOW + 3600);

        let outcome = std::thread::scope(|scope| {
            let tick = scope.spawn(|| monitor.tick());
            // The monitor holds the stale session and is about to act on it.
            clock.wait_entered();
            state.set(fresh.clone());
            clock.release();
            tick.join().unwrap()
        });

        assert_eq!(outcome, TickOutcome::Valid);
        assert_eq!(state.current(), Some(fresh.clone()));
        assert_eq!(SessionStore::new(medium).load(), Some(fresh));
    }

    #[test]
    fn test_tick_warns_without_changing_state() {
        let (_, state) = setup();
        let session = session_expiring_at(NOW + 240);
        state.set(session.clone());
        let monitor = ExpirationMonitor::new(state.clone());
        let mut warnings = monitor.warnings();

        assert_eq!(
            monitor.tick(),
            TickOutcome::ExpiringSoon(chrono::Duration::seconds(240))
        );
        assert_eq!(state.current(), Some(session));
        let warning = warnings.try_recv().unwrap();
        assert_eq!(warning.user_id, 7);
        assert_eq!(warning.remaining, chrono::Duration::minutes(4));
    }

    #[test]
    fn test_tick_warning_without_subscribers() {
        let (_, state) = setup();
        state.set(session_expiring_at(NOW + 10));
        let monitor = ExpirationMonitor::new(state);
        assert!(matches!(monitor.tick(), TickOutcome::ExpiringSoon(_)));
    }

    #[test]
    fn test_tick_valid_session() {
        let (_, state) = setup();
        state.set(session_expiring_at(NOW + 3600));
        let monitor = ExpirationMonitor::new(state.clone())
            .with_threshold(chrono::Duration::minutes(30));
        assert_eq!(monitor.tick(), TickOutcome::Valid);

        let monitor = ExpirationMonitor::new(state).with_threshold(chrono::Duration::hours(2));
        assert!(matches!(monitor.tick(), TickOutcome::ExpiringSoon(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_catches_stale_session_immediately() {
        let (_, state) = setup();
        state.set(session_expiring_at(NOW - 30));
        let mut changes = state.changes();
        changes.borrow_and_update();

        let handle = ExpirationMonitor::new(state.clone()).start();
        tokio::time::timeout(Duration::from_secs(1), changes.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.current(), None);
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_clears_session_after_token_lapses() {
        let (clock, state) = setup();
        state.set(session_expiring_at(NOW + 1));
        let monitor = ExpirationMonitor::new(state.clone());
        let mut warnings = monitor.warnings();
        let mut changes = state.changes();
        changes.borrow_and_update();

        let handle = monitor.start();

        // The immediate first tick only warns.
        let warning = warnings.recv().await.unwrap();
        assert_eq!(warning.remaining, chrono::Duration::seconds(1));
        assert!(state.current().is_some());

        clock.advance(2);
        tokio::time::timeout(Duration::from_secs(2 * CHECK_INTERVAL_SECS), changes.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.current(), None);
        assert!(handle.is_running());
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_monitor_never_fires_again() {
        let (clock, state) = setup();
        state.set(session_expiring_at(NOW + 3600));
        let handle = ExpirationMonitor::new(state.clone()).start();
        tokio::task::yield_now().await;

        handle.stop();
        handle.stop();
        assert!(!handle.is_running());

        clock.advance(7200);
        tokio::time::sleep(Duration::from_secs(10 * CHECK_INTERVAL_SECS)).await;
        // Expired, but nothing is left to notice.
        assert!(state.current().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_monitor() {
        let (clock, state) = setup();
        state.set(session_expiring_at(NOW + 3600));
        drop(ExpirationMonitor::new(state.clone()).start());

        clock.advance(7200);
        tokio::time::sleep(Duration::from_secs(10 * CHECK_INTERVAL_SECS)).await;
        assert!(state.current().is_some());
    }
}
