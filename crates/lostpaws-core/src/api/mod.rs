//! REST client for the pet registry backend.
//!
//! Only the login exchange and generic JSON reads live here; listing,
//! sighting and profile CRUD is driven by the UI. Every request passes
//! through the `RequestDecorator`, so the bearer token is attached whenever
//! the session is valid.

pub mod client;
pub mod error;

pub use client::{ApiClient, LoginRequest, LoginResponse};
pub use error::ApiError;
