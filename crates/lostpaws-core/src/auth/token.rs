//! Bearer token decoding and expiry arithmetic.
//!
//! Tokens are read, never verified: the signature segment is ignored and the
//! claims are trusted as far as the transport and the backend are. Every
//! function here is total. A token that cannot be decoded behaves exactly like
//! an expired one.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Minutes before expiry at which a token counts as "expiring soon".
pub const EXPIRY_WARNING_MINUTES: i64 = 5;

/// Largest span `chrono::Duration::seconds` accepts without panicking.
const MAX_REMAINING_SECS: i64 = i64::MAX / 1_000;

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);

/// JWTs use the url-safe alphabet, but some issuers emit the standard one.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);

/// Claims carried in the token payload, as issued by the registry backend.
///
/// Decoding is lenient about shape: numeric dates may be fractional, `userId`
/// may arrive as a string, and the role is read from `tipo` or `role`. Only a
/// missing or non-numeric `exp` rejects the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawClaims")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: Option<i64>,
    pub sub: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "tipo")]
    pub role: Option<String>,
    /// Issued-at, seconds since epoch
    pub iat: Option<i64>,
    /// Expires-at, seconds since epoch
    pub exp: i64,
}

/// Payload as found on the wire, before any field is interpreted.
#[derive(Deserialize)]
struct RawClaims {
    #[serde(rename = "userId")]
    user_id: Option<Value>,
    sub: Option<Value>,
    email: Option<Value>,
    tipo: Option<Value>,
    role: Option<Value>,
    iat: Option<Value>,
    exp: Option<Value>,
}

impl TryFrom<RawClaims> for Claims {
    type Error = String;

    fn try_from(raw: RawClaims) -> Result<Self, Self::Error> {
        let exp = raw
            .exp
            .as_ref()
            .and_then(whole_number)
            .ok_or_else(|| "missing or non-numeric exp".to_string())?;

        Ok(Claims {
            user_id: raw.user_id.as_ref().and_then(whole_number),
            sub: raw.sub.as_ref().and_then(text),
            email: raw.email.as_ref().and_then(text),
            role: raw.tipo.as_ref().and_then(text).or_else(|| raw.role.as_ref().and_then(text)),
            iat: raw.iat.as_ref().and_then(whole_number),
            exp,
        })
    }
}

/// A JSON number, or a string holding one, floored to a whole number.
fn whole_number(value: &Value) -> Option<i64> {
    let number = match value {
        Value::Number(n) => return n.as_i64().or_else(|| n.as_f64().map(|f| f.floor() as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then(|| number.floor() as i64)
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Diagnostic snapshot of a token at a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub claims: Claims,
    pub remaining: Duration,
    pub expires_soon: bool,
}

impl TokenInfo {
    /// Get minutes remaining until expiry (for display)
    pub fn minutes_remaining(&self) -> i64 {
        self.remaining.num_minutes()
    }
}

/// Default threshold used by [`will_expire_soon`] callers.
pub fn default_warning_threshold() -> Duration {
    Duration::minutes(EXPIRY_WARNING_MINUTES)
}

/// Decode the payload segment of a three-segment token.
///
/// Returns `None` for the wrong number of segments, a payload that is not
/// base64, or a payload that is not a JSON claims object with an `exp`.
pub fn decode(token: &str) -> Option<Claims> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        debug!(segments = segments.len(), "Token does not have three segments");
        return None;
    }

    let payload = segments[1];
    let bytes = match URL_SAFE_LENIENT
        .decode(payload)
        .or_else(|_| STANDARD_LENIENT.decode(payload))
    {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "Token payload is not base64");
            return None;
        }
    };

    match serde_json::from_slice::<Claims>(&bytes) {
        Ok(claims) => Some(claims),
        Err(e) => {
            debug!(error = %e, "Token payload is not a claims object");
            None
        }
    }
}

/// True if the token cannot be decoded or `exp` is before `now`.
pub fn is_expired(token: &str, now: i64) -> bool {
    match decode(token) {
        Some(claims) => claims.exp < now,
        None => true,
    }
}

/// Time left before `exp`, floored at zero. Zero for undecodable tokens.
pub fn remaining_time(token: &str, now: i64) -> Duration {
    match decode(token) {
        Some(claims) => remaining_for(&claims, now),
        None => Duration::zero(),
    }
}

/// True if the remaining time is at most `threshold`.
pub fn will_expire_soon(token: &str, threshold: Duration, now: i64) -> bool {
    remaining_time(token, now) <= threshold
}

/// Decode once and compute every expiry fact for display.
pub fn token_info(token: &str, now: i64) -> Option<TokenInfo> {
    let claims = decode(token)?;
    let remaining = remaining_for(&claims, now);
    Some(TokenInfo {
        claims,
        remaining,
        expires_soon: remaining <= default_warning_threshold(),
    })
}

fn remaining_for(claims: &Claims, now: i64) -> Duration {
    let secs = claims.exp.saturating_sub(now).clamp(0, MAX_REMAINING_SECS);
    Duration::seconds(secs)
}

/// Build an unsigned token around a JSON payload.
#[cfg(test)]
pub(crate) fn encode_unsigned(payload: &serde_json::Value) -> String {
    let header = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#);
    let body = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{}.{}.signature", header, body)
}

/// Token for a user that expires at `exp`, issued an hour earlier.
#[cfg(test)]
pub(crate) fn token_expiring_at(exp: i64) -> String {
    encode_unsigned(&serde_json::json!({
        "userId": 7,
        "sub": "ana@example.com",
        "email": "ana@example.com",
        "tipo": "USUARIO",
        "iat": exp - 3600,
        "exp": exp,
    }))
}
