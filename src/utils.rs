use crate::config::OutputFormat;
use crate::error::{PageSnapError, Result};
use std::time::Duration;
use url::Url;

/// Deterministic artifact name for `(url, format)`.
///
/// The name is the URL's host followed by its path with trailing slashes
/// removed, every run of non-alphanumeric characters collapsed to a single
/// `_`, lowercased, and suffixed with the format's extension. Query strings
/// and fragments do not take part.
///
/// ```rust
/// use pagesnap::{name_for, OutputFormat};
///
/// assert_eq!(
///     name_for("https://Example.com/Docs/Intro/", OutputFormat::Png).unwrap(),
///     "example_com_docs_intro.png"
/// );
/// ```
pub fn name_for(url: &str, format: OutputFormat) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| PageSnapError::InvalidUrl(format!("{url}: {e}")))?;
    let host = parsed.host_str().unwrap_or_default();
    let raw = format!("{}{}", host, parsed.path());
    let raw = raw.trim_end_matches('/');

    let mut name = String::with_capacity(raw.len());
    let mut in_separator = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
            in_separator = false;
        } else if !in_separator {
            name.push('_');
            in_separator = true;
        }
    }

    Ok(format!("{}.{}", name, format.extension()))
}

pub fn validate_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| PageSnapError::InvalidUrl(format!("{url}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(PageSnapError::InvalidUrl(format!(
            "{url}: unsupported scheme '{scheme}'"
        ))),
    }
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else if seconds > 0 {
        format!("{}.{}s", seconds, millis / 100)
    } else {
        format!("{millis}ms")
    }
}

pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
