use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Failures surfaced by the vault layer.
///
/// `DecryptionFailed` carries no detail: a wrong key, a flipped bit, a
/// truncated envelope and a mismatched auth context all produce the same value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("base64 decode failed: {0}")]
    Decode(String),

    #[error("salt is required for key derivation")]
    MissingSalt,

    #[error("no active session key")]
    MissingKey,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("a file password is required")]
    PasswordRequired,

    #[error("unsupported envelope: {0}")]
    UnsupportedVersion(String),

    #[error("invalid KDF parameters: {0}")]
    InvalidParams(String),

    #[error("an auth context is required by policy")]
    MissingAuthContext,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("background task failed: {0}")]
    Task(String),
}
