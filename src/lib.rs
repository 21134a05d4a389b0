//! # pagesnap
//!
//! Captures web pages as PNG, JPEG and PDF snapshots with a headless
//! Chromium, cleaning them up before the shot and storing the results in a
//! pluggable backend.
//!
//! ## Pipeline
//!
//! ```text
//! URLs -> CaptureScheduler (bounded fan-out)
//!      -> isolated page per URL
//!      -> PageTransformer (sanitize, then watermark)
//!      -> render each configured format in order
//!      -> StorageProvider::save
//!      -> flattened [{url, format, path} | {url, error}]
//! ```
//!
//! - **Bounded concurrency**: a semaphore admits at most
//!   `performance.maxConcurrency` URLs at a time; each URL owns one page which
//!   is closed before its slot is released.
//! - **Failure isolation**: navigation timeouts, script failures, render and
//!   storage errors become `{url, error}` entries; only configuration and
//!   browser launch errors abort a run.
//! - **Sanitization**: selectors are hidden at once with an injected
//!   stylesheet, then matching nodes are removed over five rounds spaced
//!   300ms apart to catch content the page re-inserts.
//! - **Watermarks**: text or image overlays in a corner, centred, or tiled
//!   across the viewport. Local images are embedded as data URIs.
//! - **Storage**: `filesystem`, `in-memory` (LRU) and `s3` (any
//!   S3-compatible endpoint, SigV4-signed), selected by `output.storage.provider`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagesnap::{CaptureOptions, Config, PageSnapEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_json_str(r#"{
//!         "output": { "formats": ["png", "pdf"] },
//!         "sanitization": { "customRules": [".cookie-banner"] }
//!     }"#)?;
//!     let engine = PageSnapEngine::new(config)?;
//!
//!     let results = engine
//!         .capture(vec!["https://example.com".to_string()], &CaptureOptions::default())
//!         .await?;
//!     println!("{}", serde_json::to_string_pretty(&results)?);
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! pagesnap https://example.com https://example.org --config pagesnap.config.json
//! pagesnap https://example.com --x 0 --y 0 --width 800 --height 600
//! ```

/// Configuration sections, defaults, merging and request/result types
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Browser capability traits and the Chromium implementation
pub mod browser;

/// Sanitization and watermark stages applied to live pages
pub mod transformer;

/// Watermark overlay construction
pub mod watermark;

/// Storage contract, filesystem and in-memory backends, and the backend factory
pub mod storage;

/// Object-store backend
pub mod object_store;

/// AWS Signature Version 4 request signing
pub mod sigv4;

/// Private-network guard for capture targets
pub mod network_guard;

/// Bounded-concurrency capture orchestration
pub mod scheduler;

/// Top-level facade
pub mod engine;

/// Progress events and sinks
pub mod progress;

/// Capture metrics
pub mod metrics;

/// Command-line interface implementation
pub mod cli;

/// Utility functions and helpers
pub mod utils;

#[cfg(test)]
mod tests;

pub use self::metrics::{install_prometheus_recorder, CaptureMetrics};
pub use browser::*;
pub use cli::*;
pub use config::*;
pub use engine::*;
pub use error::*;
pub use network_guard::{ensure_public_target, is_blocked_ip};
pub use object_store::*;
pub use progress::*;
pub use scheduler::*;
pub use sigv4::{AwsCredentials, RequestSigner, SignableRequest};
pub use storage::*;
pub use transformer::*;
pub use utils::*;
pub use watermark::*;
