use std::sync::Arc;

use tracing::{debug, info};

use super::state::SessionState;
use super::token;

/// Where denied navigation is sent.
pub const DENIED_PATH: &str = "/acceso-denegado";

/// Query parameter carrying the originally requested path.
pub const RETURN_URL_PARAM: &str = "returnUrl";

/// Where a login lands when there is nothing to resume.
pub const DEFAULT_LANDING_PATH: &str = "/home";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect(Redirect),
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }
}

/// A redirect to the denied-access destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub path: String,
    /// The destination that was refused, including its query string
    pub return_url: String,
}

impl Redirect {
    pub fn query(&self) -> Vec<(&str, &str)> {
        vec![(RETURN_URL_PARAM, self.return_url.as_str())]
    }

    /// The redirect as a single path-and-query string.
    pub fn to_uri(&self) -> String {
        format!(
            "{}?{}={}",
            self.path,
            RETURN_URL_PARAM,
            urlencoding::encode(&self.return_url)
        )
    }
}

/// Gate for protected destinations.
///
/// The decision is made synchronously from the session state, revalidating
/// token expiry on every call. A token that is merely present is not enough.
pub struct RouteGuard {
    state: Arc<SessionState>,
    denied_path: String,
}

impl RouteGuard {
    pub fn new(state: Arc<SessionState>) -> Self {
        Self {
            state,
            denied_path: DENIED_PATH.to_string(),
        }
    }

    pub fn with_denied_path(mut self, path: &str) -> Self {
        self.denied_path = path.to_string();
        self
    }

    /// Decide whether navigation to `path` with `query` may proceed.
    pub fn check(&self, path: &str, query: &[(&str, &str)]) -> GuardDecision {
        let requested = requested_url(path, query);

        if self.state.is_authenticated() {
            if let Some(info) = self
                .state
                .valid_token()
                .and_then(|t| token::token_info(&t, self.state.now()))
            {
                debug!(
                    url = %requested,
                    email = info.claims.email.as_deref().unwrap_or(""),
                    minutes_remaining = info.minutes_remaining(),
                    expires_soon = info.expires_soon,
                    "Access allowed"
                );
            }
            return GuardDecision::Allow;
        }

        info!(url = %requested, "Access denied, not authenticated or token expired");
        GuardDecision::Redirect(Redirect {
            path: self.denied_path.clone(),
            return_url: requested,
        })
    }

    /// Same as [`check`](Self::check) for a raw `path?query` string.
    pub fn check_uri(&self, uri: &str) -> GuardDecision {
        let (path, query) = split_uri(uri);
        let pairs: Vec<(&str, &str)> = query
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.check(&path, &pairs)
    }
}

/// Rebuild the requested destination as `path?k=v&...`.
pub fn requested_url(path: &str, query: &[(&str, &str)]) -> String {
    if query.is_empty() {
        return path.to_string();
    }
    let encoded: Vec<String> = query
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect();
    format!("{}?{}", path, encoded.join("&"))
}

/// Split `path?query` into the path and its decoded query pairs.
pub fn split_uri(uri: &str) -> (String, Vec<(String, String)>) {
    let (path, query) = match uri.split_once('?') {
        Some((path, query)) => (path, query),
        None => (uri, ""),
    };
    let pairs = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(k), decode_component(v))
        })
        .collect();
    (path.to_string(), pairs)
}

fn decode_component(s: &str) -> String {
    let spaced = s.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(spaced)
}

/// Where a successful login should navigate, given the login page's query.
///
/// Only local absolute paths are resumed; anything else lands on
/// [`DEFAULT_LANDING_PATH`].
pub fn resume_target(query: &[(&str, &str)]) -> String {
    query
        .iter()
        .find(|(k, _)| *k == RETURN_URL_PARAM)
        .map(|(_, v)| *v)
        .filter(|v| v.starts_with('/') && !v.starts_with("//") && !v.contains('\\'))
        .unwrap_or(DEFAULT_LANDING_PATH)
        .to_string()
}
