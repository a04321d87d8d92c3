use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum RepackError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("HTTP Request Error: {0}")]
    Http(#[from] Arc<reqwest::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Marketplace API Error: {0}")]
    Api(String),

    #[error("Marketplace Scrape Error: {0}")]
    Scrape(String),

    #[error("DownloadError: Failed to download '{0}' from '{1}': {2}")]
    DownloadError(String, String, String),

    #[error("Size limit exceeded: {0}")]
    SizeLimit(String),

    #[error("Store Error: {0}")]
    Store(String),

    #[error("Resource Not Found: {0}")]
    NotFound(String),

    #[error("Validation Error: {0}")]
    ValidationError(String),

    #[error("Repackaging tool '{0}' failed: {1}")]
    Tool(String, String),

    #[error("Hub Error: {0}")]
    Hub(String),

    #[error("Generic Error: {0}")]
    Generic(String),
}

impl From<std::io::Error> for RepackError {
    fn from(err: std::io::Error) -> Self {
        RepackError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for RepackError {
    fn from(err: reqwest::Error) -> Self {
        RepackError::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for RepackError {
    fn from(err: serde_json::Error) -> Self {
        RepackError::Json(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, RepackError>;
