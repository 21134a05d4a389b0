use metrics::{register_counter, register_histogram, Counter, Histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing::info;

/// Capture counters, recorded through the `metrics` facade.
///
/// Handles are registered against whatever recorder is installed when the
/// struct is built; with no recorder they are no-ops.
pub struct CaptureMetrics {
    pub urls_succeeded: Counter,
    pub urls_failed: Counter,
    pub artifacts_saved: Counter,
    pub bytes_saved: Counter,
    pub formats_skipped: Counter,
    pub url_duration: Histogram,
}

impl CaptureMetrics {
    pub fn new() -> Self {
        Self {
            urls_succeeded: register_counter!("pagesnap_urls_succeeded_total"),
            urls_failed: register_counter!("pagesnap_urls_failed_total"),
            artifacts_saved: register_counter!("pagesnap_artifacts_saved_total"),
            bytes_saved: register_counter!("pagesnap_bytes_saved_total"),
            formats_skipped: register_counter!("pagesnap_formats_skipped_total"),
            url_duration: register_histogram!("pagesnap_url_duration_seconds"),
        }
    }

    pub fn record_url(&self, duration: Duration, success: bool) {
        if success {
            self.urls_succeeded.increment(1);
        } else {
            self.urls_failed.increment(1);
        }

        self.url_duration.record(duration.as_secs_f64());
    }

    pub fn record_saved(&self, bytes: usize) {
        self.artifacts_saved.increment(1);
        self.bytes_saved.increment(bytes as u64);
    }

    pub fn record_skipped(&self) {
        self.formats_skipped.increment(1);
    }

    /// Count a per-URL failure under its error kind.
    pub fn record_error(&self, kind: &'static str) {
        metrics::increment_counter!("pagesnap_errors_total", "kind" => kind);
    }
}

impl Default for CaptureMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the Prometheus recorder globally and return a handle for rendering.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, metrics::SetRecorderError> {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::set_boxed_recorder(Box::new(recorder))?;

    info!("Prometheus recorder installed");
    Ok(handle)
}
