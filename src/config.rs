//! Configuration management with serde serialization/deserialization
//!
//! This module provides the typed configuration sections for pagesnap, their
//! documented defaults, the shallow merge of user overrides over those
//! defaults, and the request/result types exchanged with the capture pipeline.

use crate::error::{PageSnapError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Fixed desktop user agent carried by the shared browsing context
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/108.0.0.0 Safari/537.36";

/// Config file looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "pagesnap.config.json";

/// Resolved configuration for one invocation
///
/// Built once by merging user overrides over [`Config::default`] and then
/// treated as immutable for the rest of the run.
///
/// # Examples
///
/// ```rust
/// use pagesnap::{Config, OutputFormat};
///
/// let config = Config::from_json_str(r#"{
///     "output": { "formats": ["png", "pdf"] },
///     "performance": { "maxConcurrency": 2 }
/// }"#).unwrap();
///
/// assert_eq!(config.output.formats, vec![OutputFormat::Png, OutputFormat::Pdf]);
/// assert_eq!(config.output.location, "./snapshots");
/// assert_eq!(config.performance.max_concurrency, 2);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub output: OutputConfig,
    pub performance: PerformanceConfig,
    pub sanitization: SanitizationConfig,
    pub watermark: WatermarkConfig,
    pub browser: BrowserSettings,
    #[serde(default)]
    pub security: SecurityConfig,
}

/// Where artifacts go and which formats get rendered
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    /// Destination root, relative to the working directory (default: ./snapshots)
    pub location: String,

    /// Ordered set of formats rendered for every URL (default: [png])
    pub formats: Vec<OutputFormat>,

    /// Storage backend selection and its options
    pub storage: StorageConfig,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            location: "./snapshots".to_string(),
            formats: vec![OutputFormat::Png],
            storage: StorageConfig::default(),
        }
    }
}

/// Storage backend options
///
/// `provider` is the discriminator; the other keys are read only by the
/// backend that understands them.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
    /// `filesystem`, `in-memory` or `s3` (default: filesystem)
    pub provider: String,

    /// Filesystem: replace existing files (default: true)
    pub overwrite: bool,

    /// Filesystem root override; falls back to `output.location`
    pub location: Option<String>,

    /// Object store bucket, required by the `s3` provider
    pub bucket: Option<String>,

    /// Object store region, used to derive the default endpoint
    pub region: Option<String>,

    /// Object store endpoint (path-style), e.g. `http://localhost:9000`
    pub endpoint: Option<String>,

    /// Extra headers sent with every object store request (not signed)
    pub headers: BTreeMap<String, String>,

    /// Object store access key; `AWS_ACCESS_KEY_ID` when absent
    pub access_key_id: Option<String>,

    /// Object store secret key; `AWS_SECRET_ACCESS_KEY` when absent
    pub secret_access_key: Option<String>,

    /// Temporary-credential session token; `AWS_SESSION_TOKEN` when absent
    pub session_token: Option<String>,

    /// Artifacts older than this many seconds are removed by `cleanup`
    pub ttl: Option<u64>,

    /// In-memory: maximum number of cached artifacts (default: 256)
    pub max_items: usize,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("StorageConfig")
            .field("provider", &self.provider)
            .field("overwrite", &self.overwrite)
            .field("location", &self.location)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &redact(&self.secret_access_key))
            .field("session_token", &redact(&self.session_token))
            .field("ttl", &self.ttl)
            .field("max_items", &self.max_items)
            .finish()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: "filesystem".to_string(),
            overwrite: true,
            location: None,
            bucket: None,
            region: None,
            endpoint: None,
            headers: BTreeMap::new(),
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            ttl: None,
            max_items: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceConfig {
    /// Upper bound on simultaneously open pages (default: 4)
    pub max_concurrency: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { max_concurrency: 4 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SanitizationConfig {
    /// Selectors whose matching nodes are hidden and then removed before capture
    pub custom_rules: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfig {
    /// Refuse targets that resolve to loopback, private, link-local or
    /// metadata addresses (default: false)
    pub block_private_networks: bool,
}

/// Browser launch settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BrowserSettings {
    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// User agent shared by every page of a run
    pub user_agent: String,

    /// Viewport width in pixels (default: 1920)
    pub viewport_width: u32,

    /// Viewport height in pixels (default: 1080)
    pub viewport_height: u32,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            chrome_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            viewport_width: 1920,
            viewport_height: 1080,
        }
    }
}

/// Output formats
///
/// `svg` is accepted in configuration so that it can be reported, but it is
/// never produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    #[serde(alias = "jpeg")]
    Jpg,
    Pdf,
    Svg,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpg => "jpg",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Svg => "svg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpg => "image/jpeg",
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Svg => "image/svg+xml",
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, OutputFormat::Svg)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Overlay injected before rendering
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatermarkConfig {
    pub enabled: bool,

    #[serde(rename = "type")]
    pub kind: WatermarkKind,

    pub text: Option<TextWatermark>,

    pub image: Option<ImageWatermark>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkKind {
    #[default]
    Text,
    Image,
}

/// Placement of the overlay
///
/// `Tile` repeats the overlay across the whole viewport instead of placing it once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
    Center,
    Tile,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct TextWatermark {
    pub content: String,
    pub font: String,
    /// Font size in pixels
    pub size: u32,
    /// Any CSS color; alpha controls transparency
    pub color: String,
    pub position: WatermarkPosition,
    pub offset_x: i32,
    pub offset_y: i32,
    /// Rotation of the text inside a tiled pattern, in degrees
    pub angle: f64,
}

impl Default for TextWatermark {
    fn default() -> Self {
        Self {
            content: String::new(),
            font: "Arial, sans-serif".to_string(),
            size: 24,
            color: "rgba(0, 0, 0, 0.3)".to_string(),
            position: WatermarkPosition::BottomRight,
            offset_x: 20,
            offset_y: 20,
            angle: -30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageWatermark {
    /// Local file path or data URI
    pub source: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub opacity: f64,
    pub position: WatermarkPosition,
    pub offset_x: i32,
    pub offset_y: i32,
}

impl Default for ImageWatermark {
    fn default() -> Self {
        Self {
            source: String::new(),
            width: None,
            height: None,
            opacity: 0.5,
            position: WatermarkPosition::BottomRight,
            offset_x: 20,
            offset_y: 20,
        }
    }
}

/// User-supplied configuration before merging
///
/// Every top-level section is optional. Inside a section, present keys
/// replace the default; nested structures (`output.storage`,
/// `watermark.text`, `watermark.image`) are replaced as a whole.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialConfig {
    pub output: Option<PartialOutput>,
    pub performance: Option<PartialPerformance>,
    pub sanitization: Option<PartialSanitization>,
    pub watermark: Option<PartialWatermark>,
    pub browser: Option<PartialBrowser>,
    pub security: Option<PartialSecurity>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialOutput {
    pub location: Option<String>,
    pub formats: Option<Vec<OutputFormat>>,
    pub storage: Option<StorageConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialPerformance {
    pub max_concurrency: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialSanitization {
    pub custom_rules: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialWatermark {
    pub enabled: Option<bool>,
    #[serde(rename = "type")]
    pub kind: Option<WatermarkKind>,
    pub text: Option<TextWatermark>,
    pub image: Option<ImageWatermark>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialSecurity {
    pub block_private_networks: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialBrowser {
    pub chrome_path: Option<String>,
    pub user_agent: Option<String>,
    pub viewport_width: Option<u32>,
    pub viewport_height: Option<u32>,
}

impl Config {
    /// Overlay user values on top of `self`, one level deep per section.
    pub fn merge(mut self, user: PartialConfig) -> Self {
        if let Some(output) = user.output {
            if let Some(location) = output.location {
                self.output.location = location;
            }
            if let Some(formats) = output.formats {
                self.output.formats = formats;
            }
            if let Some(storage) = output.storage {
                self.output.storage = storage;
            }
        }

        if let Some(performance) = user.performance {
            if let Some(max_concurrency) = performance.max_concurrency {
                self.performance.max_concurrency = max_concurrency;
            }
        }

        if let Some(sanitization) = user.sanitization {
            if let Some(custom_rules) = sanitization.custom_rules {
                self.sanitization.custom_rules = custom_rules;
            }
        }

        if let Some(watermark) = user.watermark {
            if let Some(enabled) = watermark.enabled {
                self.watermark.enabled = enabled;
            }
            if let Some(kind) = watermark.kind {
                self.watermark.kind = kind;
            }
            if watermark.text.is_some() {
                self.watermark.text = watermark.text;
            }
            if watermark.image.is_some() {
                self.watermark.image = watermark.image;
            }
        }

        if let Some(browser) = user.browser {
            if browser.chrome_path.is_some() {
                self.browser.chrome_path = browser.chrome_path;
            }
            if let Some(user_agent) = browser.user_agent {
                self.browser.user_agent = user_agent;
            }
            if let Some(width) = browser.viewport_width {
                self.browser.viewport_width = width;
            }
            if let Some(height) = browser.viewport_height {
                self.browser.viewport_height = height;
            }
        }

        if let Some(security) = user.security {
            if let Some(block) = security.block_private_networks {
                self.security.block_private_networks = block;
            }
        }

        self
    }

    /// Check invariants and normalize the format list in place.
    pub fn validate(&mut self) -> Result<()> {
        if self.performance.max_concurrency == 0 {
            return Err(PageSnapError::Configuration(
                "performance.maxConcurrency must be a positive integer".to_string(),
            ));
        }

        let mut formats = Vec::with_capacity(self.output.formats.len());
        for format in self.output.formats.drain(..) {
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
        if formats.is_empty() {
            return Err(PageSnapError::Configuration(
                "output.formats must name at least one format".to_string(),
            ));
        }
        self.output.formats = formats;

        if self.browser.viewport_width == 0 || self.browser.viewport_height == 0 {
            return Err(PageSnapError::Configuration(
                "browser viewport dimensions must be greater than 0".to_string(),
            ));
        }

        if self.watermark.enabled {
            match self.watermark.kind {
                WatermarkKind::Text => {
                    let has_content = self
                        .watermark
                        .text
                        .as_ref()
                        .map(|text| !text.content.is_empty())
                        .unwrap_or(false);
                    if !has_content {
                        return Err(PageSnapError::Configuration(
                            "watermark.text.content is required for a text watermark".to_string(),
                        ));
                    }
                }
                WatermarkKind::Image => {
                    let has_source = self
                        .watermark
                        .image
                        .as_ref()
                        .map(|image| !image.source.is_empty())
                        .unwrap_or(false);
                    if !has_source {
                        return Err(PageSnapError::Configuration(
                            "watermark.image.source is required for an image watermark"
                                .to_string(),
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    /// Parse user JSON, merge it over the defaults and validate the result.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let user: PartialConfig = serde_json::from_str(content)
            .map_err(|e| PageSnapError::Configuration(format!("invalid config: {e}")))?;
        let mut config = Config::default().merge(user);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path`, or from [`DEFAULT_CONFIG_FILE`] when present.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_fallback(path, Path::new(DEFAULT_CONFIG_FILE)).await
    }

    async fn load_with_fallback(path: Option<&Path>, fallback: &Path) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                    PageSnapError::Configuration(format!(
                        "cannot read config file {}: {e}",
                        path.display()
                    ))
                })?;
                Self::from_json_str(&content)?
            }
            None => match tokio::fs::read_to_string(fallback).await {
                Ok(content) => Self::from_json_str(&content)?,
                Err(_) => {
                    debug!("No {} found, using defaults", fallback.display());
                    let mut config = Config::default();
                    config.validate()?;
                    config
                }
            },
        };

        info!("Configuration loaded successfully");
        info!("Output formats: {:?}", config.output.formats);
        info!("Storage provider: {}", config.output.storage.provider);
        info!("Max concurrency: {}", config.performance.max_concurrency);

        Ok(config)
    }
}

/// Rectangle, in CSS pixels, confining a raster capture
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ClipRegion {
    /// Build a clip only when all four parts are present and the area is non-empty.
    pub fn from_parts(
        x: Option<f64>,
        y: Option<f64>,
        width: Option<f64>,
        height: Option<f64>,
    ) -> Option<Self> {
        match (x, y, width, height) {
            (Some(x), Some(y), Some(width), Some(height)) if width > 0.0 && height > 0.0 => {
                Some(Self {
                    x,
                    y,
                    width,
                    height,
                })
            }
            _ => None,
        }
    }
}

/// Document export options, forwarded to the browser's print-to-PDF
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PdfOptions {
    pub landscape: Option<bool>,
    pub display_header_footer: Option<bool>,
    pub print_background: Option<bool>,
    pub scale: Option<f64>,
    /// Paper width in inches
    pub paper_width: Option<f64>,
    /// Paper height in inches
    pub paper_height: Option<f64>,
    pub margin_top: Option<f64>,
    pub margin_bottom: Option<f64>,
    pub margin_left: Option<f64>,
    pub margin_right: Option<f64>,
    /// e.g. `1-5, 8`
    pub page_ranges: Option<String>,
    pub prefer_css_page_size: Option<bool>,
}

/// Per-call capture options
///
/// `clip` applies to raster formats only and `pdf_options` to `pdf` only;
/// the two may be combined in one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureOptions {
    pub clip: Option<ClipRegion>,
    pub pdf_options: Option<PdfOptions>,
    /// JPEG quality, 0-100; ignored for other formats
    pub jpeg_quality: Option<u8>,
}

/// One entry of the flattened result sequence
///
/// Serializes as `{url, format, path}` or `{url, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CaptureResult {
    Saved {
        url: String,
        format: OutputFormat,
        path: String,
    },
    Failed {
        url: String,
        error: String,
    },
}

impl CaptureResult {
    pub fn url(&self) -> &str {
        match self {
            CaptureResult::Saved { url, .. } | CaptureResult::Failed { url, .. } => url,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CaptureResult::Saved { .. })
    }
}

/// Generate Chrome command-line arguments for headless capture
///
/// The profile directory is not part of the arguments; it is handed to
/// [`create_browser_config`] by the launcher that owns it.
///
/// # Examples
///
/// ```rust
/// use pagesnap::{BrowserSettings, get_chrome_args};
///
/// let args = get_chrome_args(&BrowserSettings::default());
/// assert!(args.contains(&"--headless".to_string()));
/// ```
pub fn get_chrome_args(settings: &BrowserSettings) -> Vec<String> {
    vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--hide-scrollbars".to_string(),
        format!(
            "--window-size={},{}",
            settings.viewport_width, settings.viewport_height
        ),
        format!("--user-agent={}", settings.user_agent),
    ]
}

/// Upper bound on any single DevTools command
///
/// Must stay above the navigation timeout: the pipeline's own deadline is
/// the one that decides when a page load has failed.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(90);

pub fn create_browser_config(
    settings: &BrowserSettings,
    profile_dir: &Path,
) -> Result<chromiumoxide::browser::BrowserConfig> {
    use chromiumoxide::browser::BrowserConfig;
    use chromiumoxide::handler::viewport::Viewport;

    let mut builder = BrowserConfig::builder()
        .window_size(settings.viewport_width, settings.viewport_height)
        .viewport(Viewport {
            width: settings.viewport_width,
            height: settings.viewport_height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: settings.viewport_width > settings.viewport_height,
            has_touch: false,
        })
        .request_timeout(COMMAND_TIMEOUT)
        .user_data_dir(profile_dir)
        .args(get_chrome_args(settings));

    if let Some(chrome_path) = &settings.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(PageSnapError::BrowserLaunch)
}
