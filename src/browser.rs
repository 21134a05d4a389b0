//! Browser capability used by the capture pipeline
//!
//! The scheduler only talks to the three traits in this module. The
//! Chromium implementation launches one headless browser per run, creates a
//! single browser context shared by every page of that run, and hands out one
//! isolated page per URL.

use crate::config::{create_browser_config, BrowserSettings, ClipRegion, PdfOptions};
use crate::error::{PageSnapError, Result};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, PrintToPdfParams, Viewport,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{CallArgument, CallFunctionOnParams};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Interval between `document.readyState` checks once the protocol's own
/// navigation deadline has passed
const LOAD_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Raster encoder mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterEncoding {
    Png,
    Jpeg,
}

/// Parameters for one raster capture
///
/// `full_page` and `clip` are mutually exclusive: a clip confines the
/// capture to its rectangle.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterRequest {
    pub encoding: RasterEncoding,
    pub full_page: bool,
    pub clip: Option<ClipRegion>,
    pub quality: Option<u8>,
}

/// A single live page, owned by exactly one URL's pipeline
#[async_trait]
pub trait CapturePage: Send + Sync {
    /// Navigate and wait for the `load` milestone.
    async fn goto(&self, url: &str) -> Result<()>;

    /// Call `script` (a function declaration) with `arg` as its only argument.
    ///
    /// Promises are awaited and the return value comes back by value.
    async fn evaluate(&self, script: &str, arg: serde_json::Value) -> Result<serde_json::Value>;

    async fn screenshot(&self, request: &RasterRequest) -> Result<Vec<u8>>;

    async fn pdf(&self, options: &PdfOptions) -> Result<Vec<u8>>;

    async fn close(&self) -> Result<()>;
}

/// One launched browser plus its shared browsing context
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn CapturePage>>;

    /// Tear down the context and the browser. Never fails.
    async fn close(&self);
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>>;
}

/// Launches headless Chromium through the DevTools protocol
pub struct ChromiumLauncher {
    settings: BrowserSettings,
}

impl ChromiumLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>> {
        // Removed when the session closes, or right here if the launch fails
        let profile = tempfile::Builder::new()
            .prefix("pagesnap-chromium-")
            .tempdir()
            .map_err(|e| {
                PageSnapError::BrowserLaunch(format!("cannot create profile directory: {e}"))
            })?;
        let browser_config = create_browser_config(&self.settings, profile.path())?;

        let (mut browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| PageSnapError::BrowserLaunch(e.to_string()))?;

        // The handler implements Stream and must be polled for the browser to make progress
        let handler_task = tokio::spawn(async move {
            loop {
                match handler.next().await {
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!("Handler error: {}", e);
                        return Err(e);
                    }
                    None => {
                        debug!("Handler stream ended");
                        break;
                    }
                }
            }
            Ok(())
        });

        let context_id = match browser.execute(CreateBrowserContextParams::default()).await {
            Ok(response) => response.result.browser_context_id.clone(),
            Err(e) => {
                let _ = browser.close().await;
                handler_task.abort();
                return Err(PageSnapError::BrowserLaunch(format!(
                    "failed to create browser context: {e}"
                )));
            }
        };

        info!("Browser launched");

        Ok(Arc::new(ChromiumSession {
            browser: Mutex::new(browser),
            handler: std::sync::Mutex::new(Some(handler_task)),
            context_id,
            profile: std::sync::Mutex::new(Some(profile)),
        }))
    }
}

pub struct ChromiumSession {
    browser: Mutex<Browser>,
    handler: std::sync::Mutex<
        Option<tokio::task::JoinHandle<Result<(), chromiumoxide::error::CdpError>>>,
    >,
    context_id: BrowserContextId,
    profile: std::sync::Mutex<Option<TempDir>>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn new_page(&self) -> Result<Box<dyn CapturePage>> {
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(self.context_id.clone())
            .build()
            .map_err(PageSnapError::Navigation)?;

        let browser = self.browser.lock().await;
        let page = browser
            .new_page(params)
            .await
            .map_err(|e| PageSnapError::Navigation(format!("failed to open page: {e}")))?;

        Ok(Box::new(ChromiumPage { page }))
    }

    async fn close(&self) {
        let mut browser = self.browser.lock().await;

        if let Err(e) = browser
            .execute(DisposeBrowserContextParams::new(self.context_id.clone()))
            .await
        {
            warn!("Failed to dispose browser context: {}", e);
        }
        if let Err(e) = browser.close().await {
            warn!("Failed to close browser: {}", e);
        }

        let handler = self.handler.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handler) = handler {
            handler.abort();
        }

        remove_profile(&self.profile);

        info!("Browser closed");
    }
}

/// Delete the session's profile directory; later calls do nothing.
fn remove_profile(slot: &std::sync::Mutex<Option<TempDir>>) {
    let profile = slot.lock().ok().and_then(|mut guard| guard.take());
    if let Some(profile) = profile {
        let path = profile.path().display().to_string();
        match profile.close() {
            Ok(()) => debug!("Removed browser profile {}", path),
            Err(e) => warn!("Failed to remove browser profile {}: {}", path, e),
        }
    }
}

pub struct ChromiumPage {
    page: Page,
}

impl ChromiumPage {
    async fn wait_for_load(&self) {
        loop {
            let state = self
                .page
                .evaluate_expression("document.readyState")
                .await
                .ok()
                .and_then(|result| result.into_value::<String>().ok());

            // Evaluation fails while the document is being swapped; keep polling
            if state.as_deref() == Some("complete") {
                return;
            }
            tokio::time::sleep(LOAD_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl CapturePage for ChromiumPage {
    /// Resolves once `load` fires, however long that takes.
    ///
    /// chromiumoxide abandons a navigation after its own fixed deadline
    /// (30s), which is shorter than the pipeline's navigation timeout. When
    /// that happens the page keeps loading, so fall back to polling
    /// `document.readyState` and leave the bound to the caller.
    async fn goto(&self, url: &str) -> Result<()> {
        match self.page.goto(url).await {
            Ok(_) => Ok(()),
            Err(CdpError::Timeout) => {
                debug!("Protocol deadline passed for {}, still waiting for load", url);
                self.wait_for_load().await;
                Ok(())
            }
            Err(e) => Err(PageSnapError::Navigation(format!("{url}: {e}"))),
        }
    }

    async fn evaluate(&self, script: &str, arg: serde_json::Value) -> Result<serde_json::Value> {
        let params = CallFunctionOnParams::builder()
            .function_declaration(script)
            .argument(CallArgument::builder().value(arg).build())
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(PageSnapError::Transformation)?;

        let result = self
            .page
            .evaluate_function(params)
            .await
            .map_err(|e| PageSnapError::Transformation(e.to_string()))?;

        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn screenshot(&self, request: &RasterRequest) -> Result<Vec<u8>> {
        let format = match request.encoding {
            RasterEncoding::Png => CaptureScreenshotFormat::Png,
            RasterEncoding::Jpeg => CaptureScreenshotFormat::Jpeg,
        };

        let mut builder = ScreenshotParams::builder()
            .format(format)
            .full_page(request.full_page);

        if let Some(clip) = request.clip {
            builder = builder.clip(Viewport {
                x: clip.x,
                y: clip.y,
                width: clip.width,
                height: clip.height,
                scale: 1.0,
            });
        }

        if let (RasterEncoding::Jpeg, Some(quality)) = (request.encoding, request.quality) {
            builder = builder.quality(quality as i64);
        }

        self.page
            .screenshot(builder.build())
            .await
            .map_err(|e| PageSnapError::Render(e.to_string()))
    }

    async fn pdf(&self, options: &PdfOptions) -> Result<Vec<u8>> {
        let mut builder = PrintToPdfParams::builder();

        if let Some(landscape) = options.landscape {
            builder = builder.landscape(landscape);
        }
        if let Some(display) = options.display_header_footer {
            builder = builder.display_header_footer(display);
        }
        if let Some(background) = options.print_background {
            builder = builder.print_background(background);
        }
        if let Some(scale) = options.scale {
            builder = builder.scale(scale);
        }
        if let Some(width) = options.paper_width {
            builder = builder.paper_width(width);
        }
        if let Some(height) = options.paper_height {
            builder = builder.paper_height(height);
        }
        if let Some(margin) = options.margin_top {
            builder = builder.margin_top(margin);
        }
        if let Some(margin) = options.margin_bottom {
            builder = builder.margin_bottom(margin);
        }
        if let Some(margin) = options.margin_left {
            builder = builder.margin_left(margin);
        }
        if let Some(margin) = options.margin_right {
            builder = builder.margin_right(margin);
        }
        if let Some(ranges) = &options.page_ranges {
            builder = builder.page_ranges(ranges.clone());
        }
        if let Some(prefer) = options.prefer_css_page_size {
            builder = builder.prefer_css_page_size(prefer);
        }

        self.page
            .pdf(builder.build())
            .await
            .map_err(|e| PageSnapError::Render(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| PageSnapError::Navigation(format!("failed to close page: {e}")))
    }
}
