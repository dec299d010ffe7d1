use thiserror::Error;

#[derive(Error, Debug)]
pub enum NestError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("You cannot pair with yourself")]
    SelfPairingRejected,

    #[error("Pairing conflict: {0}")]
    ConcurrentPairingConflict(String),

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Secure storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Network error: {0}")]
    TransientNetwork(String),

    #[error("Invalid pairing code: {0}")]
    InvalidPairingCode(String),

    #[error("Pairing code already in use: {0}")]
    PairingCodeTaken(String),

    #[error("Invalid nest: {0}")]
    InvalidNest(String),

    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Invalid PIN")]
    InvalidPin,

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Session is locked")]
    Locked,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session is not running")]
    SessionStopped,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NestError {
    /// Errors worth retrying once connectivity returns.
    pub fn is_transient(&self) -> bool {
        matches!(self, NestError::TransientNetwork(_))
    }
}

impl From<nest_secret::Error> for NestError {
    fn from(err: nest_secret::Error) -> Self {
        match err {
            nest_secret::Error::SecretNotFound => NestError::NotFound("secret".into()),
            other => NestError::StorageUnavailable(other.to_string()),
        }
    }
}

impl serde::Serialize for NestError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_errors_map_to_storage_unavailable() {
        let err: NestError = nest_secret::Error::AccessDenied.into();
        assert!(matches!(err, NestError::StorageUnavailable(_)));

        let err: NestError = nest_secret::Error::SecretNotFound.into();
        assert!(matches!(err, NestError::NotFound(_)));
    }

    #[test]
    fn test_error_serializes_as_message() {
        let json = serde_json::to_string(&NestError::SelfPairingRejected).unwrap();
        assert_eq!(json, "\"You cannot pair with yourself\"");
    }
}
