use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Invalid storage key: {0:?}")]
    InvalidKey(String),
}

impl StorageError {
    /// Keys become file names and keychain entry names, so keep them plain.
    pub fn check_key(key: &str) -> Result<(), StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(())
        } else {
            Err(StorageError::InvalidKey(key.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_key() {
        assert!(StorageError::check_key("currentUser").is_ok());
        assert!(StorageError::check_key("session_v2-a").is_ok());
        assert!(StorageError::check_key("").is_err());
        assert!(StorageError::check_key("../etc/passwd").is_err());
        assert!(StorageError::check_key("a b").is_err());
    }
}
