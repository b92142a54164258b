//! Error types for vcgan-rs.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor/layer error.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// A segment length or encoding mode the networks are not built for.
    #[error("not implemented: {0}")]
    Unsupported(String),

    /// Invalid configuration value.
    #[error("config: {0}")]
    Config(String),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for construction-time "not implemented" failures.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported(_))
    }
}
