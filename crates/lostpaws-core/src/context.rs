//! Composition root for the session lifecycle.
//!
//! `AuthContext` owns the one `SessionState` of the process and hands shared
//! references to the guard, the request decorator and the API client. It also
//! owns the expiration monitor's handle and the warning channel every monitor
//! it starts publishes on, so teardown is a single call and subscribers survive
//! a logout and a new login.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::info;

use crate::api::ApiClient;
use crate::auth::monitor::WARNING_CHANNEL_SIZE;
use crate::auth::{
    Clock, ExpirationMonitor, ExpiryWarning, MonitorHandle, RequestDecorator, RouteGuard,
    Session, SessionState, SystemClock,
};
use crate::config::{Config, StorageKind};
use crate::storage::{
    FileStorage, KeyringStorage, SessionStore, StorageMedium, DEFAULT_SESSION_KEY,
};

pub struct AuthContext {
    state: Arc<SessionState>,
    guard: RouteGuard,
    decorator: RequestDecorator,
    api: ApiClient,
    monitor: Option<MonitorHandle>,
    warnings: broadcast::Sender<ExpiryWarning>,
}

impl AuthContext {
    /// Build from configuration and start the expiration monitor when the
    /// context has durable storage. Must be called inside a tokio runtime.
    pub fn launch(config: &Config) -> Result<Self> {
        Ok(Self::from_config(config)?.monitored())
    }

    /// Build from configuration with the wall clock. The monitor is left to
    /// the caller; see [`AuthContext::launch`].
    pub fn from_config(config: &Config) -> Result<Self> {
        let medium: Option<Arc<dyn StorageMedium>> = match config.storage {
            StorageKind::File => Some(Arc::new(FileStorage::new(config.storage_dir()?)?)),
            StorageKind::Keyring => Some(Arc::new(KeyringStorage::new())),
            StorageKind::None => None,
        };
        let key = config.session_key.as_deref().unwrap_or(DEFAULT_SESSION_KEY);
        let store = medium.map(|medium| SessionStore::with_key(medium, key));

        Self::new(store, Arc::new(SystemClock), config.api_base_url())
    }

    pub fn new(store: Option<SessionStore>, clock: Arc<dyn Clock>, api_base_url: &str) -> Result<Self> {
        let state = Arc::new(SessionState::new(store, clock));
        let decorator = RequestDecorator::new(state.clone());
        let api = ApiClient::new(api_base_url, decorator.clone())?;
        let (warnings, _) = broadcast::channel(WARNING_CHANNEL_SIZE);

        Ok(Self {
            guard: RouteGuard::new(state.clone()),
            decorator,
            api,
            state,
            monitor: None,
            warnings,
        })
    }

    /// Start the monitor and return the context. Must run inside a tokio runtime.
    pub fn monitored(mut self) -> Self {
        self.start_monitor();
        self
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    pub fn guard(&self) -> &RouteGuard {
        &self.guard
    }

    pub fn decorator(&self) -> &RequestDecorator {
        &self.decorator
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.as_ref().is_some_and(|m| m.is_running())
    }

    /// Subscribe to expiry warnings from this context's monitors.
    pub fn warnings(&self) -> broadcast::Receiver<ExpiryWarning> {
        self.warnings.subscribe()
    }

    /// Start the expiration monitor and return its warning feed.
    ///
    /// Only contexts with durable storage run a monitor. Returns `None` in a
    /// headless context. Starting again replaces a previous monitor, whose
    /// replacement checks immediately.
    pub fn start_monitor(&mut self) -> Option<broadcast::Receiver<ExpiryWarning>> {
        if !self.state.has_storage() {
            return None;
        }
        let warnings = self.warnings();
        let monitor = ExpirationMonitor::new(self.state.clone()).with_warnings(self.warnings.clone());
        if let Some(previous) = self.monitor.replace(monitor.start()) {
            previous.stop();
        }
        Some(warnings)
    }

    /// Log in against the backend and make the result the live session.
    ///
    /// Restarts the monitor if a logout had stopped it.
    pub async fn login(&mut self, email: &str, password: &str) -> Result<Session> {
        let session = self.api.login(email, password).await?;
        self.state.set(session.clone());
        info!(user_id = session.user_id, "Logged in");
        if !self.is_monitoring() {
            self.start_monitor();
        }
        Ok(session)
    }

    /// End the session and release the monitor.
    pub fn logout(&mut self) {
        self.state.clear();
        self.stop_monitor();
        info!("Logged out");
    }

    /// Release background resources. The session itself is kept.
    pub fn shutdown(&mut self) {
        self.stop_monitor();
    }

    fn stop_monitor(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::session_expiring_at;
    use crate::auth::{GuardDecision, ManualClock};
    use crate::storage::MemoryStorage;
    use reqwest::header;
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000;

    fn context(medium: Option<Arc<MemoryStorage>>) -> AuthContext {
        let store = medium.map(|m| SessionStore::new(m as Arc<dyn StorageMedium>));
        AuthContext::new(store, Arc::new(ManualClock::new(NOW)), "http://localhost:8080").unwrap()
    }

    #[test]
    fn test_consumers_share_one_state() {
        let ctx = context(Some(Arc::new(MemoryStorage::new())));
        assert!(!ctx.guard().check("/perfil", &[]).is_allowed());

        ctx.state().set(session_expiring_at(NOW + 3600));
        assert_eq!(ctx.guard().check("/perfil", &[]), GuardDecision::Allow);

        let mut headers = header::HeaderMap::new();
        assert!(ctx.decorator().decorate_headers(&mut headers));
    }

    #[test]
    fn test_persisted_session_is_restored_by_new_context() {
        let medium = Arc::new(MemoryStorage::new());
        let session = session_expiring_at(NOW + 3600);
        context(Some(medium.clone())).state().set(session.clone());

        let ctx = context(Some(medium));
        assert_eq!(ctx.state().current(), Some(session));
    }

    #[tokio::test]
    async fn test_headless_context_runs_no_monitor() {
        let mut ctx = context(None);
        assert!(ctx.start_monitor().is_none());
        assert!(!ctx.is_monitoring());
    }

    #[tokio::test]
    async fn test_monitored_context_starts_monitor_with_storage() {
        let mut ctx = context(Some(Arc::new(MemoryStorage::new()))).monitored();
        assert!(ctx.is_monitoring());
        ctx.shutdown();

        let ctx = context(None).monitored();
        assert!(!ctx.is_monitoring());
    }

    #[tokio::test(start_paused = true)]
    async fn test_warnings_outlive_monitor_restart() {
        let ctx = context(Some(Arc::new(MemoryStorage::new())));
        ctx.state().set(session_expiring_at(NOW + 60));
        let mut warnings = ctx.warnings();
        let mut ctx = ctx.monitored();

        let first = tokio::time::timeout(Duration::from_secs(1), warnings.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.user_id, 7);

        // A replacement monitor publishes on the same feed.
        ctx.start_monitor();
        let second = tokio::time::timeout(Duration::from_secs(1), warnings.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.remaining, chrono::Duration::seconds(60));
        ctx.shutdown();
    }

    #[tokio::test]
    async fn test_logout_clears_session_and_stops_monitor() {
        let medium = Arc::new(MemoryStorage::new());
        let mut ctx = context(Some(medium.clone()));
        ctx.state().set(session_expiring_at(NOW + 3600));

        assert!(ctx.start_monitor().is_some());
        assert!(ctx.is_monitoring());

        ctx.logout();
        assert!(!ctx.is_monitoring());
        assert_eq!(ctx.state().current(), None);
        assert!(medium.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_keeps_session() {
        let mut ctx = context(Some(Arc::new(MemoryStorage::new())));
        ctx.state().set(session_expiring_at(NOW + 3600));
        ctx.start_monitor();
        ctx.shutdown();
        ctx.shutdown();
        assert!(!ctx.is_monitoring());
        assert!(ctx.state().current().is_some());
    }
}
