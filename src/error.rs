//! Error types
//!
//! One crate-level error covers model acquisition, lifecycle transitions and
//! inference requests. Engine failures are wrapped from [`EngineError`].

use thiserror::Error;

use crate::inference::engine::EngineError;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure while talking to a model host
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success, non-redirect HTTP response
    #[error("Download failed with status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Redirect chain longer than the configured cap
    #[error("Too many redirects ({hops}) while fetching {url}")]
    TooManyRedirects { hops: usize, url: String },

    /// Artifact failed the size heuristic
    #[error("Integrity check failed for {model_id}: {reason}")]
    Integrity { model_id: String, reason: String },

    /// A load or download sequence is already running
    #[error("A model load or download is already in progress")]
    AlreadyLoading,

    /// Inference requested without a ready model
    #[error("No model is loaded")]
    ModelNotLoaded,

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Artifact is loaded or being downloaded
    #[error("Model is in use: {0}")]
    ModelInUse(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
