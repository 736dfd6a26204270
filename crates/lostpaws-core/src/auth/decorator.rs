use std::sync::Arc;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Request, RequestBuilder};
use tracing::{debug, warn};

use super::state::SessionState;

/// Adds the live bearer token to outbound requests.
///
/// Reads the session without mutating it. When there is no valid token the
/// request goes out unchanged and the backend decides; the decorator never
/// blocks, retries, or touches the body.
#[derive(Clone)]
pub struct RequestDecorator {
    state: Arc<SessionState>,
}

impl RequestDecorator {
    pub fn new(state: Arc<SessionState>) -> Self {
        Self { state }
    }

    /// The `Authorization` value for the live token, if any.
    pub fn authorization(&self) -> Option<HeaderValue> {
        let token = self.state.valid_token()?;
        match HeaderValue::from_str(&format!("Bearer {}", token)) {
            Ok(mut value) => {
                value.set_sensitive(true);
                Some(value)
            }
            Err(e) => {
                warn!(error = %e, "Token is not a valid header value");
                None
            }
        }
    }

    /// Insert or overwrite the authorization header. Returns whether it did.
    pub fn decorate_headers(&self, headers: &mut HeaderMap) -> bool {
        match self.authorization() {
            Some(value) => {
                headers.insert(header::AUTHORIZATION, value);
                true
            }
            None => false,
        }
    }

    pub fn decorate(&self, request: &mut Request) -> bool {
        let decorated = self.decorate_headers(request.headers_mut());
        if decorated {
            debug!(url = %request.url(), "Added bearer token to request");
        }
        decorated
    }

    pub fn decorate_builder(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.authorization() {
            Some(value) => builder.header(header::AUTHORIZATION, value),
            None => builder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::session::session_expiring_at;
    use reqwest::{Method, Url};

    const NOW: i64 = 1_700_000_000;

    fn setup() -> (Arc<ManualClock>, Arc<SessionState>, RequestDecorator) {
        let clock = Arc::new(ManualClock::new(NOW));
        let state = Arc::new(SessionState::headless(clock.clone()));
        (clock, state.clone(), RequestDecorator::new(state))
    }

    fn request() -> Request {
        let mut request = Request::new(
            Method::POST,
            Url::parse("http://localhost:8080/mascotas").unwrap(),
        );
        *request.body_mut() = Some("{\"nombre\":\"Luna\"}".into());
        request
    }

    #[test]
    fn test_valid_session_adds_bearer_header() {
        let (_, state, decorator) = setup();
        let session = session_expiring_at(NOW + 3600);
        state.set(session.clone());

        let mut request = request();
        assert!(decorator.decorate(&mut request));
        let value = request.headers().get(header::AUTHORIZATION).unwrap();
        assert_eq!(value.to_str().unwrap(), format!("Bearer {}", session.token));
        assert!(value.is_sensitive());
        assert_eq!(
            request.body().and_then(|b| b.as_bytes()),
            Some(&b"{\"nombre\":\"Luna\"}"[..])
        );
    }

    #[test]
    fn test_no_session_forwards_unchanged() {
        let (_, _, decorator) = setup();
        let mut request = request();
        assert!(!decorator.decorate(&mut request));
        assert!(request.headers().get(header::AUTHORIZATION).is_none());
    }

    #[test]
    fn test_expired_token_is_not_attached_and_state_is_untouched() {
        let (clock, state, decorator) = setup();
        state.set(session_expiring_at(NOW + 10));
        clock.advance(60);

        let mut request = request();
        assert!(!decorator.decorate(&mut request));
        assert!(request.headers().get(header::AUTHORIZATION).is_none());
        assert!(state.current().is_some());
    }

    #[test]
    fn test_existing_authorization_is_overwritten() {
        let (_, state, decorator) = setup();
        let session = session_expiring_at(NOW + 3600);
        state.set(session.clone());

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(decorator.decorate_headers(&mut headers));
        assert_eq!(headers.get_all(header::AUTHORIZATION).iter().count(), 1);
        assert_eq!(
            headers[header::AUTHORIZATION].to_str().unwrap(),
            format!("Bearer {}", session.token)
        );
    }

    #[test]
    fn test_decorate_builder() {
        let (_, state, decorator) = setup();
        state.set(session_expiring_at(NOW + 3600));
        let request = decorator
            .decorate_builder(reqwest::Client::new().get("http://localhost/usuarios/7"))
            .build()
            .unwrap();
        assert!(request.headers().contains_key(header::AUTHORIZATION));
    }
}
