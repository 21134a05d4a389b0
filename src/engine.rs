use crate::browser::{BrowserLauncher, ChromiumLauncher};
use crate::config::{CaptureOptions, CaptureResult, Config};
use crate::error::Result;
use crate::progress::ProgressSink;
use crate::scheduler::CaptureScheduler;
use crate::storage::{StorageBackend, StorageProvider};
use std::sync::Arc;
use tracing::info;

/// Top-level entry point
///
/// Builds the storage backend from configuration (failing fast on a bad
/// storage section) and wires it into a [`CaptureScheduler`].
///
/// # Examples
///
/// ```rust,no_run
/// use pagesnap::{CaptureOptions, Config, PageSnapEngine};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::load(None).await?;
///     let engine = PageSnapEngine::new(config)?;
///
///     let results = engine
///         .capture(vec!["https://example.com".to_string()], &CaptureOptions::default())
///         .await?;
///     for result in &results {
///         println!("{:?}", result);
///     }
///     Ok(())
/// }
/// ```
pub struct PageSnapEngine {
    config: Config,
    storage: Arc<StorageBackend>,
    scheduler: CaptureScheduler,
}

impl PageSnapEngine {
    /// Engine driving headless Chromium.
    pub fn new(config: Config) -> Result<Self> {
        let launcher = Arc::new(ChromiumLauncher::new(config.browser.clone()));
        Self::with_launcher(config, launcher)
    }

    pub fn with_launcher(config: Config, launcher: Arc<dyn BrowserLauncher>) -> Result<Self> {
        let storage = Arc::new(StorageBackend::from_config(&config.output)?);
        let scheduler = CaptureScheduler::new(
            &config,
            launcher,
            storage.clone() as Arc<dyn StorageProvider>,
        );

        Ok(Self {
            config,
            storage,
            scheduler,
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.scheduler = self.scheduler.with_progress(progress);
        self
    }

    pub async fn capture(
        &self,
        urls: Vec<String>,
        options: &CaptureOptions,
    ) -> Result<Vec<CaptureResult>> {
        info!(
            "Capturing {} URL(s) as {:?} with concurrency {}",
            urls.len(),
            self.config.output.formats,
            self.scheduler.max_concurrency()
        );
        self.scheduler.capture(urls, options).await
    }

    /// Remove expired artifacts from the configured backend.
    pub async fn cleanup(&self) -> Result<()> {
        self.storage.cleanup().await
    }

    pub fn storage(&self) -> &StorageBackend {
        &self.storage
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
