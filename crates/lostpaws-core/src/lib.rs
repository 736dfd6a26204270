//! Core library for lostpaws.
//!
//! Holds the client-side session lifecycle of the pet registry: token
//! decoding, the live session and its persisted copy, background expiry
//! checks, the navigation guard and bearer injection for API calls.

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod storage;

pub use context::AuthContext;
