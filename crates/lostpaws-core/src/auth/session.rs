use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::token::{self, Claims};

/// A logged-in user paired with the bearer token the backend issued.
///
/// Expiry is never stored here; it is always read back out of the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Session {
    pub user_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: String,
    pub token: String,
}

impl Session {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn claims(&self) -> Option<Claims> {
        token::decode(&self.token)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        token::is_expired(&self.token, now)
    }

    /// Check if the session will expire within the warning threshold
    pub fn expires_soon(&self, now: i64) -> bool {
        token::will_expire_soon(&self.token, token::default_warning_threshold(), now)
    }

    pub fn time_until_expiry(&self, now: i64) -> Duration {
        token::remaining_time(&self.token, now)
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self, now: i64) -> i64 {
        self.time_until_expiry(now).num_minutes()
    }
}

/// Authentication state derived from the live session at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Authenticated(Session),
    /// A session is still held but its token has lapsed; it will be purged on
    /// the next check.
    Expired,
}

impl AuthState {
    pub fn from_session(session: Option<Session>, now: i64) -> Self {
        match session {
            None => AuthState::Anonymous,
            Some(session) if session.is_expired(now) => AuthState::Expired,
            Some(session) => AuthState::Authenticated(session),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated(_))
    }
}

/// Session for user 7 whose token expires at `exp`.
#[cfg(test)]
pub(crate) fn session_expiring_at(exp: i64) -> Session {
    Session {
        user_id: 7,
        first_name: "Ana".to_string(),
        last_name: "Pereyra".to_string(),
        email: "ana@example.com".to_string(),
        role: "USUARIO".to_string(),
        token: token::token_expiring_at(exp),
    }
}
