//! Durable storage for the session record.
//!
//! This module provides:
//! - `StorageMedium`: the key/value surface a storage backend must offer
//! - `FileStorage`, `KeyringStorage`, `MemoryStorage`: the available backends
//! - `SessionStore`: the session record on top of a medium

pub mod error;
pub mod file;
pub mod keychain;
pub mod memory;
pub mod store;

pub use error::StorageError;
pub use file::FileStorage;
pub use keychain::KeyringStorage;
pub use memory::MemoryStorage;
pub use store::{SessionStore, DEFAULT_SESSION_KEY};

/// A named-key string store, shaped like browser local storage.
pub trait StorageMedium: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Overwrite the value under `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}
