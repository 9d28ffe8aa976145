//! Session codec error types.
//!
//! Decoding fails closed: every variant means "no usable session", and no
//! partial bundle is ever returned alongside one.

/// Unified error type for session encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The input does not start with the session marker.
    #[error("not a session string: missing {marker:?} prefix")]
    MissingMarker { marker: &'static str },

    /// The outer payload or one of the file entries is not valid base64.
    #[error("invalid base64 in {context}: {source}")]
    Base64 {
        context: String,
        #[source]
        source: base64::DecodeError,
    },

    /// The decoded payload is not a JSON object of strings.
    #[error("invalid session payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading or writing the session directory failed.
    #[error("session i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A file name would escape the session directory.
    #[error("invalid session file name: {name:?}")]
    InvalidFileName { name: String },

    /// The given path exists but is not a directory.
    #[error("not a directory: {path}")]
    NotADirectory { path: String },
}

/// Convenience alias used throughout the session crate.
pub type SessionResult<T> = Result<T, SessionError>;
