//! Error types shared across FrameRec crates.

/// Top-level error type for FrameRec operations.
///
/// Setup failures (`BackendUnavailable`, `Allocation`, `Open`) leave a
/// recorder closed. `Conversion` aborts a single frame. `Encode` is raised by
/// backends for a single frame and is absorbed by the recorder, which logs it
/// and keeps going.
#[derive(Debug, thiserror::Error)]
pub enum FramerecError {
    #[error("Encoder backend unavailable: {message}")]
    BackendUnavailable { message: String },

    #[error("Allocation failed: {message}")]
    Allocation { message: String },

    #[error("Open failed: {message}")]
    Open { message: String },

    #[error("Color conversion failed: {message}")]
    Conversion { message: String },

    #[error("Encode failed: {message}")]
    Encode { message: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Frame size mismatch: expected {expected} bytes, got {actual}")]
    FrameSize { expected: usize, actual: usize },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using FramerecError.
pub type FramerecResult<T> = Result<T, FramerecError>;

impl FramerecError {
    pub fn backend_unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: msg.into(),
        }
    }

    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation {
            message: msg.into(),
        }
    }

    pub fn open(msg: impl Into<String>) -> Self {
        Self::Open {
            message: msg.into(),
        }
    }

    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion {
            message: msg.into(),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether this error happened while setting a session up.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. } | Self::Allocation { .. } | Self::Open { .. }
        )
    }
}
