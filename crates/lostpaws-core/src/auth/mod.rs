//! Client-side authentication: the session lifecycle.
//!
//! This module provides:
//! - `token`: bearer token claim decoding and expiry arithmetic
//! - `Session` / `AuthState`: the logged-in user and the derived state
//! - `SessionState`: the live session with a change stream
//! - `ExpirationMonitor`: background expiry checks
//! - `RouteGuard`: allow/redirect decisions for protected destinations
//! - `RequestDecorator`: bearer header injection for outbound calls
//!
//! Nothing here returns an error. Undecodable tokens, corrupt storage and
//! expiry all resolve to the anonymous state.

pub mod clock;
pub mod decorator;
pub mod guard;
pub mod monitor;
pub mod session;
pub mod state;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decorator::RequestDecorator;
pub use guard::{GuardDecision, Redirect, RouteGuard};
pub use monitor::{ExpirationMonitor, ExpiryWarning, MonitorHandle, TickOutcome};
pub use session::{AuthState, Session};
pub use state::SessionState;
pub use token::{Claims, TokenInfo};
