//! Pre-capture page transformations
//!
//! Two stages run on every live page before rendering: sanitization hides
//! and then repeatedly removes nodes matching the configured selectors, and
//! the watermark stage injects a single overlay element. Page-side logic is
//! a fixed set of script payloads; selectors and overlay descriptions travel
//! as call arguments and are never spliced into script text.

use crate::browser::CapturePage;
use crate::config::{SanitizationConfig, WatermarkConfig};
use crate::error::{PageSnapError, Result};
use crate::watermark::build_overlay;
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Number of removal rounds, regardless of how early the page runs clean
pub const SANITIZE_ROUNDS: usize = 5;

/// Pause between removal rounds so the page can re-insert content
pub const SANITIZE_SETTLE_DELAY: Duration = Duration::from_millis(300);

/// Id of the `<style>` element carrying the hide rules
pub const SANITIZE_STYLE_ID: &str = "pagesnap-sanitize-style";

/// Installs (or resets) a stylesheet with one hide rule per selector.
/// Argument: `{ id, selectors }`.
///
/// Each selector is checked with `querySelector` and inserted as its own
/// rule, so a malformed entry is dropped alone. Returns `{ rejected }`.
pub const HIDE_STYLE_SCRIPT: &str = r#"function (payload) {
    let style = document.getElementById(payload.id);
    if (!style) {
        style = document.createElement('style');
        style.id = payload.id;
        (document.head || document.documentElement).appendChild(style);
    }
    style.textContent = '';
    const sheet = style.sheet;
    const rejected = [];
    for (const selector of payload.selectors) {
        try {
            document.querySelector(selector);
            sheet.insertRule(selector + ' { display: none !important; }', sheet.cssRules.length);
        } catch (e) {
            rejected.push(selector);
        }
    }
    return { rejected: rejected };
}"#;

/// Removes every node matching any selector. Argument: selector array.
/// Returns the number of removed nodes; invalid selectors match nothing.
pub const REMOVE_NODES_SCRIPT: &str = r#"function (selectors) {
    let removed = 0;
    for (const selector of selectors) {
        let nodes;
        try {
            nodes = document.querySelectorAll(selector);
        } catch (e) {
            continue;
        }
        for (const node of nodes) {
            node.remove();
            removed += 1;
        }
    }
    return removed;
}"#;

/// Replaces the overlay element carrying `overlay.id`. Argument: overlay description.
pub const WATERMARK_SCRIPT: &str = r#"function (overlay) {
    const existing = document.getElementById(overlay.id);
    if (existing) {
        existing.remove();
    }
    const element = document.createElement(overlay.tag);
    element.id = overlay.id;
    if (overlay.text !== null && overlay.text !== undefined) {
        element.textContent = overlay.text;
    }
    if (overlay.src) {
        element.src = overlay.src;
    }
    for (const [name, value] of Object.entries(overlay.style)) {
        element.style.setProperty(name, value);
    }
    (document.body || document.documentElement).appendChild(element);
    return true;
}"#;

pub struct PageTransformer {
    sanitization: SanitizationConfig,
    watermark: WatermarkConfig,
}

impl PageTransformer {
    pub fn new(sanitization: SanitizationConfig, watermark: WatermarkConfig) -> Self {
        Self {
            sanitization,
            watermark,
        }
    }

    pub fn rules(&self) -> &[String] {
        &self.sanitization.custom_rules
    }

    /// Run both configured stages, sanitization first.
    pub async fn transform(&self, page: &dyn CapturePage) -> Result<()> {
        self.sanitize(page, &self.sanitization.custom_rules).await?;
        self.apply_watermark(page, &self.watermark).await
    }

    /// Hide matching nodes at once, then remove them over [`SANITIZE_ROUNDS`] rounds.
    pub async fn sanitize(&self, page: &dyn CapturePage, rules: &[String]) -> Result<()> {
        if rules.is_empty() {
            return Ok(());
        }

        let selectors = json!(rules);
        let installed = page
            .evaluate(
                HIDE_STYLE_SCRIPT,
                json!({ "id": SANITIZE_STYLE_ID, "selectors": selectors }),
            )
            .await?;
        for rejected in rejected_selectors(&installed) {
            warn!("Ignoring invalid sanitization selector {:?}", rejected);
        }

        for round in 1..=SANITIZE_ROUNDS {
            let removed = page.evaluate(REMOVE_NODES_SCRIPT, selectors.clone()).await?;
            debug!(
                "Sanitize round {}/{} removed {} node(s)",
                round,
                SANITIZE_ROUNDS,
                removed.as_u64().unwrap_or(0)
            );
            sleep(SANITIZE_SETTLE_DELAY).await;
        }

        Ok(())
    }

    /// Inject the overlay described by `watermark`, replacing any earlier one.
    ///
    /// An unreadable image source only skips the watermark.
    pub async fn apply_watermark(&self, page: &dyn CapturePage, watermark: &WatermarkConfig) -> Result<()> {
        let overlay = match build_overlay(watermark).await {
            Ok(Some(overlay)) => overlay,
            Ok(None) => return Ok(()),
            Err(PageSnapError::WatermarkSource(reason)) => {
                warn!("Skipping watermark, source unavailable: {}", reason);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let argument = serde_json::to_value(&overlay)?;
        page.evaluate(WATERMARK_SCRIPT, argument).await?;
        Ok(())
    }
}

/// Selectors the hide script refused, from its `{ rejected }` result
fn rejected_selectors(result: &serde_json::Value) -> Vec<&str> {
    result["rejected"]
        .as_array()
        .map(|rejected| rejected.iter().filter_map(|s| s.as_str()).collect())
        .unwrap_or_default()
}
