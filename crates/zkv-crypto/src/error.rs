use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Failures of the client-side encryption engine.
///
/// Authentication failures carry no detail beyond the chunk
/// index: a wrong password, a wrong key and tampered ciphertext all look the
/// same to the caller.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication failed: invalid key or corrupted data")]
    Authentication,

    #[error("chunk {index} failed authentication: invalid key or corrupted data")]
    ChunkAuthentication { index: u64 },

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("not authenticated: no master key loaded")]
    NotAuthenticated,

    #[error("key not available for resource {0}")]
    KeyNotAvailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CryptoError {
    /// True for every tag-verification failure, however it is surfaced.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            CryptoError::Authentication
                | CryptoError::ChunkAuthentication { .. }
                | CryptoError::InvalidCredentials
        )
    }
}
