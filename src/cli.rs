use crate::{CaptureOptions, CaptureResult, ClipRegion, Config, PageSnapEngine};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pagesnap")]
#[command(about = "Capture web pages as PNG, JPEG and PDF snapshots")]
#[command(version)]
pub struct Cli {
    #[arg(required = true, help = "URLs to capture")]
    pub urls: Vec<String>,

    #[arg(short, long, help = "Configuration file path (default: ./pagesnap.config.json)")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Clip region x offset")]
    pub x: Option<f64>,

    #[arg(long, help = "Clip region y offset")]
    pub y: Option<f64>,

    #[arg(long, help = "Clip region width")]
    pub width: Option<f64>,

    #[arg(long, help = "Clip region height")]
    pub height: Option<f64>,

    #[arg(long, help = "JPEG quality (0-100)")]
    pub quality: Option<u8>,

    #[arg(long, help = "Maximum concurrently open pages")]
    pub max_concurrency: Option<usize>,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, help = "Remove expired artifacts after capturing")]
    pub cleanup: bool,

    #[arg(long, help = "Print Prometheus metrics to stderr after the run")]
    pub metrics: bool,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,
}

impl Cli {
    /// Clip is formed only when all four coordinates are given.
    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            clip: ClipRegion::from_parts(self.x, self.y, self.width, self.height),
            pdf_options: None,
            jpeg_quality: self.quality,
        }
    }
}

pub struct CliRunner {
    pub config: Config,
    pub engine: PageSnapEngine,
}

impl CliRunner {
    pub async fn new(args: &Cli) -> anyhow::Result<Self> {
        let mut config = Config::load(args.config.as_deref())
            .await
            .context("failed to load configuration")?;

        // Override config with CLI args
        if let Some(max_concurrency) = args.max_concurrency {
            config.performance.max_concurrency = max_concurrency;
        }
        if let Some(chrome_path) = &args.chrome_path {
            config.browser.chrome_path = Some(chrome_path.clone());
        }
        config.validate().context("invalid configuration")?;

        let engine = PageSnapEngine::new(config.clone()).context("failed to set up storage")?;

        Ok(Self { config, engine })
    }

    pub async fn run(&self, args: &Cli) -> anyhow::Result<Vec<CaptureResult>> {
        let options = args.capture_options();
        if let Some(clip) = &options.clip {
            info!(
                "Clipping raster captures to {}x{} at ({}, {})",
                clip.width, clip.height, clip.x, clip.y
            );
        }

        let results = self
            .engine
            .capture(args.urls.clone(), &options)
            .await
            .context("capture run failed")?;

        if args.cleanup {
            self.engine
                .cleanup()
                .await
                .context("storage cleanup failed")?;
        }

        Ok(results)
    }
}

pub fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))?;

    Ok(())
}
