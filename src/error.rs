use thiserror::Error;

/// Error surface of the core. `Unrecoverable` decoder states are not
/// errors; they show up as an empty output list and the caller retries
/// once more packets arrive.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Size or framing violation. The operation had no effect.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// AEAD tag mismatch. The plaintext buffer has been zeroed.
    #[error("authentication failure")]
    AuthFailure,

    /// FEC packet referencing only sequence numbers that left the window.
    #[error("stale packet")]
    Stale,

    /// Path validation exhausted its attempts; the path was removed.
    #[error("path {0} unusable")]
    PathUnusable(u32),

    /// CPU feature detection failed; the library refuses to initialize.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<&'static str> for CoreError {
    fn from(s: &'static str) -> Self {
        CoreError::InvalidInput(s.to_string())
    }
}

impl From<String> for CoreError {
    fn from(s: String) -> Self {
        CoreError::InvalidInput(s)
    }
}
