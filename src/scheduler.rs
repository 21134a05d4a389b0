//! Bounded-concurrency capture orchestration
//!
//! One browser and one shared context are launched per [`CaptureScheduler::capture`]
//! call. Every URL runs in its own task behind a counting semaphore: it opens
//! an isolated page, navigates, runs the [`PageTransformer`], renders each
//! configured format in order and hands the bytes to storage. Failures are
//! caught at the URL boundary and become `{url, error}` entries.

use crate::browser::{BrowserLauncher, BrowserSession, CapturePage, RasterEncoding, RasterRequest};
use crate::config::{CaptureOptions, CaptureResult, Config, OutputFormat, PdfOptions};
use crate::error::{PageSnapError, Result};
use crate::metrics::CaptureMetrics;
use crate::progress::{ProgressEvent, ProgressSink, ProgressTracker, TracingProgress};
use crate::storage::StorageProvider;
use crate::transformer::PageTransformer;
use crate::network_guard::ensure_public_target;
use crate::utils::{name_for, validate_url};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

/// Fixed bound on waiting for a page's `load` milestone
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Drives a browser across many URLs with at most `max_concurrency` open pages
///
/// # Examples
///
/// ```rust,no_run
/// use pagesnap::{
///     CaptureOptions, CaptureScheduler, ChromiumLauncher, Config, InMemoryStorage,
/// };
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let scheduler = CaptureScheduler::new(
///         &config,
///         Arc::new(ChromiumLauncher::new(config.browser.clone())),
///         Arc::new(InMemoryStorage::new(16)),
///     );
///
///     let results = scheduler
///         .capture(vec!["https://example.com".to_string()], &CaptureOptions::default())
///         .await?;
///     println!("{}", serde_json::to_string_pretty(&results)?);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct CaptureScheduler {
    launcher: Arc<dyn BrowserLauncher>,
    storage: Arc<dyn StorageProvider>,
    transformer: Arc<PageTransformer>,
    progress: Arc<dyn ProgressSink>,
    metrics: Arc<CaptureMetrics>,
    formats: Vec<OutputFormat>,
    max_concurrency: usize,
    navigation_timeout: Duration,
    block_private_networks: bool,
}

impl CaptureScheduler {
    pub fn new(
        config: &Config,
        launcher: Arc<dyn BrowserLauncher>,
        storage: Arc<dyn StorageProvider>,
    ) -> Self {
        Self {
            launcher,
            storage,
            transformer: Arc::new(PageTransformer::new(
                config.sanitization.clone(),
                config.watermark.clone(),
            )),
            progress: Arc::new(TracingProgress),
            metrics: Arc::new(CaptureMetrics::new()),
            formats: config.output.formats.clone(),
            max_concurrency: config.performance.max_concurrency.max(1),
            navigation_timeout: NAVIGATION_TIMEOUT,
            block_private_networks: config.security.block_private_networks,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_navigation_timeout(mut self, navigation_timeout: Duration) -> Self {
        self.navigation_timeout = navigation_timeout;
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Capture every URL and return the flattened results.
    ///
    /// Only a browser launch failure is returned as `Err`; everything that goes
    /// wrong for a single URL is reported in the result sequence.
    pub async fn capture(
        &self,
        urls: Vec<String>,
        options: &CaptureOptions,
    ) -> Result<Vec<CaptureResult>> {
        let session = self.launcher.launch().await?;

        let tracker = ProgressTracker::new(urls.len());
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let options = Arc::new(options.clone());

        let tasks: Vec<_> = urls
            .into_iter()
            .map(|url| {
                let scheduler = self.clone();
                let session = session.clone();
                let semaphore = semaphore.clone();
                let options = options.clone();
                let tracker = tracker.clone();
                let task_url = url.clone();

                let handle = tokio::spawn(async move {
                    // Held until the page is closed
                    let _permit = match semaphore.acquire().await {
                        Ok(permit) => permit,
                        Err(e) => {
                            return vec![CaptureResult::Failed {
                                url: task_url,
                                error: PageSnapError::from(e).to_string(),
                            }]
                        }
                    };
                    scheduler
                        .capture_url(session.as_ref(), &task_url, &options, &tracker)
                        .await
                });
                (url, handle)
            })
            .collect();

        let (urls, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        let joined = join_all(handles).await;

        session.close().await;

        let mut results = Vec::new();
        for (url, outcome) in urls.into_iter().zip(joined) {
            match outcome {
                Ok(entries) => results.extend(entries),
                Err(e) => {
                    warn!("Capture task for {} did not complete: {}", url, e);
                    tracker.record_completion(false);
                    results.push(CaptureResult::Failed {
                        url,
                        error: format!("capture task aborted: {e}"),
                    });
                }
            }
        }

        let summary = tracker.get_progress();
        self.progress.report(ProgressEvent::Finished {
            succeeded: summary.success,
            failed: summary.errors,
            elapsed: summary.elapsed,
        });

        Ok(results)
    }

    async fn capture_url(
        &self,
        session: &dyn BrowserSession,
        url: &str,
        options: &CaptureOptions,
        tracker: &ProgressTracker,
    ) -> Vec<CaptureResult> {
        let started = Instant::now();
        self.progress.report(ProgressEvent::Started {
            url: url.to_string(),
        });

        let mut results = Vec::new();
        let outcome = self.run_pipeline(session, url, options, &mut results).await;
        let success = outcome.is_ok();

        if let Err(e) = outcome {
            self.metrics.record_error(e.kind());
            self.progress.report(ProgressEvent::Failed {
                url: url.to_string(),
                error: e.to_string(),
            });
            results.push(CaptureResult::Failed {
                url: url.to_string(),
                error: e.to_string(),
            });
        }

        self.metrics.record_url(started.elapsed(), success);
        tracker.record_completion(success);
        results
    }

    /// Open a page, process it and close it regardless of the outcome.
    async fn run_pipeline(
        &self,
        session: &dyn BrowserSession,
        url: &str,
        options: &CaptureOptions,
        results: &mut Vec<CaptureResult>,
    ) -> Result<()> {
        let target = validate_url(url)?;
        if self.block_private_networks {
            ensure_public_target(&target).await?;
        }

        let page = session.new_page().await?;
        let outcome = self.process_page(page.as_ref(), url, options, results).await;

        if let Err(e) = page.close().await {
            warn!("Failed to close page for {}: {}", url, e);
        }

        outcome
    }

    async fn process_page(
        &self,
        page: &dyn CapturePage,
        url: &str,
        options: &CaptureOptions,
        results: &mut Vec<CaptureResult>,
    ) -> Result<()> {
        match timeout(self.navigation_timeout, page.goto(url)).await {
            Ok(navigation) => navigation?,
            Err(_) => return Err(PageSnapError::Timeout(self.navigation_timeout)),
        }
        debug!("Loaded {}", url);

        let rules = self.transformer.rules().len();
        if rules > 0 {
            self.progress.report(ProgressEvent::Sanitizing {
                url: url.to_string(),
                rules,
            });
        }
        self.transformer.transform(page).await?;

        for &format in &self.formats {
            if !format.is_supported() {
                self.metrics.record_skipped();
                self.progress.report(ProgressEvent::FormatSkipped {
                    url: url.to_string(),
                    format,
                    reason: "format is not supported".to_string(),
                });
                continue;
            }

            let data = render(page, format, options).await?;
            let bytes = data.len();
            let file_name = name_for(url, format)?;
            let path = self.storage.save(&file_name, data).await?;

            self.metrics.record_saved(bytes);
            self.progress.report(ProgressEvent::Saved {
                url: url.to_string(),
                format,
                path: path.clone(),
                bytes,
            });
            results.push(CaptureResult::Saved {
                url: url.to_string(),
                format,
                path,
            });
        }

        Ok(())
    }
}

/// Produce the bytes for one format.
///
/// Raster formats honour `options.clip` (replacing full-page capture);
/// `pdf` ignores it and uses `options.pdf_options`.
pub async fn render(
    page: &dyn CapturePage,
    format: OutputFormat,
    options: &CaptureOptions,
) -> Result<Vec<u8>> {
    let encoding = match format {
        OutputFormat::Png => RasterEncoding::Png,
        OutputFormat::Jpg => RasterEncoding::Jpeg,
        OutputFormat::Pdf => {
            let defaults = PdfOptions::default();
            return page
                .pdf(options.pdf_options.as_ref().unwrap_or(&defaults))
                .await;
        }
        OutputFormat::Svg => {
            return Err(PageSnapError::Render(
                "svg output is not supported".to_string(),
            ))
        }
    };

    let request = RasterRequest {
        encoding,
        full_page: options.clip.is_none(),
        clip: options.clip,
        quality: match encoding {
            RasterEncoding::Jpeg => options.jpeg_quality,
            RasterEncoding::Png => None,
        },
    };
    page.screenshot(&request).await
}
