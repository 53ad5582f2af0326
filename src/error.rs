use thiserror::Error;

/// Central error type for the stem-splitter-web crate.
#[derive(Debug, Error)]
pub enum StemError {
    // Generic fallback (wraps anyhow)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),

    // Domain-specific variants
    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Checksum mismatch for {path}")]
    Checksum { path: String },

    #[error("Cache dir not available")]
    CacheDirUnavailable,

    #[error("Failed to load audio {path}: {reason}")]
    AudioLoad { path: String, reason: String },

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Separation model is not available (it failed to load at startup)")]
    ModelUnavailable,

    #[error("Configuration error: {0}")]
    Config(String),
}

// Library errors without a domain variant of their own.
impl From<std::io::Error> for StemError {
    fn from(e: std::io::Error) -> Self {
        StemError::Anyhow(e.into())
    }
}

impl From<serde_json::Error> for StemError {
    fn from(e: serde_json::Error) -> Self {
        StemError::Anyhow(e.into())
    }
}

impl From<reqwest::Error> for StemError {
    fn from(e: reqwest::Error) -> Self {
        StemError::Anyhow(e.into())
    }
}

impl From<hex::FromHexError> for StemError {
    fn from(e: hex::FromHexError) -> Self {
        StemError::Anyhow(e.into())
    }
}

impl From<ndarray::ShapeError> for StemError {
    fn from(e: ndarray::ShapeError) -> Self {
        StemError::Anyhow(e.into())
    }
}

impl From<hound::Error> for StemError {
    fn from(e: hound::Error) -> Self {
        StemError::Encode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StemError>;
