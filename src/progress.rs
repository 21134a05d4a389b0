//! Progress reporting for capture runs
//!
//! The scheduler emits [`ProgressEvent`]s through a pluggable
//! [`ProgressSink`]; the default sink writes them to `tracing`.
//! [`ProgressTracker`] counts finished URLs for the end-of-run summary.

use crate::config::OutputFormat;
use crate::utils::format_duration;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Started {
        url: String,
    },
    Sanitizing {
        url: String,
        rules: usize,
    },
    FormatSkipped {
        url: String,
        format: OutputFormat,
        reason: String,
    },
    Saved {
        url: String,
        format: OutputFormat,
        path: String,
        bytes: usize,
    },
    Failed {
        url: String,
        error: String,
    },
    Finished {
        succeeded: usize,
        failed: usize,
        elapsed: Duration,
    },
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Default sink: one log line per event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { url } => info!("Capturing {}", url),
            ProgressEvent::Sanitizing { url, rules } => {
                info!("Sanitizing {} with {} rule(s)", url, rules)
            }
            ProgressEvent::FormatSkipped {
                url,
                format,
                reason,
            } => warn!("Skipping {} for {}: {}", format, url, reason),
            ProgressEvent::Saved {
                url,
                format,
                path,
                bytes,
            } => info!(
                "Saved {} of {} to {} ({})",
                format,
                url,
                path,
                crate::utils::format_bytes(bytes)
            ),
            ProgressEvent::Failed { url, error } => warn!("Capture of {} failed: {}", url, error),
            ProgressEvent::Finished {
                succeeded,
                failed,
                elapsed,
            } => info!(
                "Capture run finished: {} succeeded, {} failed in {}",
                succeeded,
                failed,
                format_duration(elapsed)
            ),
        }
    }
}

/// Run-level completion counters, shared across URL tasks
#[derive(Clone)]
pub struct ProgressTracker {
    total: usize,
    completed: Arc<AtomicUsize>,
    errors: Arc<AtomicUsize>,
    start_time: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: Arc::new(AtomicUsize::new(0)),
            errors: Arc::new(AtomicUsize::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn record_completion(&self, success: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_progress(&self) -> ProgressInfo {
        let completed = self.completed.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);

        ProgressInfo {
            total: self.total,
            completed,
            errors,
            success: completed - errors,
            elapsed: self.start_time.elapsed(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Relaxed) >= self.total
    }
}

#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub total: usize,
    pub completed: usize,
    pub errors: usize,
    pub success: usize,
    pub elapsed: Duration,
}
