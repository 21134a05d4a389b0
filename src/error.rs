use std::time::Duration;
use thiserror::Error;
use tokio::sync::AcquireError;

pub type Result<T, E = PageSnapError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error)]
pub enum PageSnapError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Browser launch failed: {0}")]
    BrowserLaunch(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Navigation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Page transformation failed: {0}")]
    Transformation(String),

    #[error("Watermark source unavailable: {0}")]
    WatermarkSource(String),

    #[error("Render failed: {0}")]
    Render(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Semaphore acquire error: {0}")]
    Semaphore(String),
}

impl PageSnapError {
    /// Fatal errors abort the whole invocation instead of becoming a per-URL entry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PageSnapError::Configuration(_) | PageSnapError::BrowserLaunch(_)
        )
    }

    /// Stable short label, used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            PageSnapError::Configuration(_) => "configuration",
            PageSnapError::BrowserLaunch(_) => "browser_launch",
            PageSnapError::Navigation(_) => "navigation",
            PageSnapError::Timeout(_) => "timeout",
            PageSnapError::InvalidUrl(_) => "invalid_url",
            PageSnapError::Transformation(_) => "transformation",
            PageSnapError::WatermarkSource(_) => "watermark_source",
            PageSnapError::Render(_) => "render",
            PageSnapError::Storage(_) => "storage",
            PageSnapError::Io(_) => "io",
            PageSnapError::Serialization(_) => "serialization",
            PageSnapError::Semaphore(_) => "semaphore",
        }
    }
}

impl From<AcquireError> for PageSnapError {
    fn from(err: AcquireError) -> Self {
        PageSnapError::Semaphore(err.to_string())
    }
}

impl From<std::io::Error> for PageSnapError {
    fn from(err: std::io::Error) -> Self {
        PageSnapError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PageSnapError {
    fn from(err: serde_json::Error) -> Self {
        PageSnapError::Serialization(err.to_string())
    }
}
