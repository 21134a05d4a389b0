//! Watermark overlay construction
//!
//! Everything here is page-independent: the configured watermark is turned
//! into a plain [`OverlayElement`] description which the transformer hands to
//! the page as data. Local image files are embedded as data URIs so the page
//! never fetches a filesystem path.

use crate::config::{
    ImageWatermark, TextWatermark, WatermarkConfig, WatermarkKind, WatermarkPosition,
};
use crate::error::{PageSnapError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Reserved element id; re-applying a watermark replaces the element carrying it
pub const WATERMARK_ELEMENT_ID: &str = "pagesnap-watermark";

const OVERLAY_Z_INDEX: &str = "2147483647";
const DEFAULT_TILE_SIZE: u32 = 200;

/// DOM element to inject, passed to the page as an opaque argument
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayElement {
    pub id: String,
    pub tag: String,
    pub text: Option<String>,
    pub src: Option<String>,
    pub style: BTreeMap<String, String>,
}

impl OverlayElement {
    fn new(tag: &str) -> Self {
        let mut style = BTreeMap::new();
        style.insert("position".to_string(), "fixed".to_string());
        style.insert("z-index".to_string(), OVERLAY_Z_INDEX.to_string());
        style.insert("pointer-events".to_string(), "none".to_string());

        Self {
            id: WATERMARK_ELEMENT_ID.to_string(),
            tag: tag.to_string(),
            text: None,
            src: None,
            style,
        }
    }

    fn set(&mut self, name: &str, value: impl Into<String>) {
        self.style.insert(name.to_string(), value.into());
    }

    /// Full-viewport container painting `image` as a repeating background
    fn tile_container(image: String) -> Self {
        let mut element = Self::new("div");
        element.set("top", "0");
        element.set("left", "0");
        element.set("width", "100vw");
        element.set("height", "100vh");
        element.set("background-image", image);
        element.set("background-repeat", "repeat");
        element
    }
}

/// Build the overlay for `config`, or `None` when nothing should be injected.
///
/// An unreadable image source yields [`PageSnapError::WatermarkSource`].
pub async fn build_overlay(config: &WatermarkConfig) -> Result<Option<OverlayElement>> {
    if !config.enabled {
        return Ok(None);
    }

    match config.kind {
        WatermarkKind::Text => Ok(config.text.as_ref().map(text_overlay)),
        WatermarkKind::Image => match &config.image {
            Some(image) => image_overlay(image).await.map(Some),
            None => Ok(None),
        },
    }
}

/// Fixed placement rules for a single positioned element.
///
/// `center` ignores the offsets. `tile` has no single-element placement.
pub fn placement(
    position: WatermarkPosition,
    offset_x: i32,
    offset_y: i32,
) -> Vec<(&'static str, String)> {
    let x = format!("{offset_x}px");
    let y = format!("{offset_y}px");

    match position {
        WatermarkPosition::TopLeft => vec![("top", y), ("left", x)],
        WatermarkPosition::TopRight => vec![("top", y), ("right", x)],
        WatermarkPosition::BottomLeft => vec![("bottom", y), ("left", x)],
        WatermarkPosition::BottomRight => vec![("bottom", y), ("right", x)],
        WatermarkPosition::Center => vec![
            ("top", "50%".to_string()),
            ("left", "50%".to_string()),
            ("transform", "translate(-50%, -50%)".to_string()),
        ],
        WatermarkPosition::Tile => Vec::new(),
    }
}

pub fn text_overlay(text: &TextWatermark) -> OverlayElement {
    if text.position == WatermarkPosition::Tile {
        let pattern = STANDARD.encode(tile_pattern_svg(text));
        return OverlayElement::tile_container(format!(
            "url(\"data:image/svg+xml;base64,{pattern}\")"
        ));
    }

    let mut element = OverlayElement::new("div");
    element.text = Some(text.content.clone());
    element.set("font-family", text.font.clone());
    element.set("font-size", format!("{}px", text.size));
    element.set("color", text.color.clone());
    element.set("white-space", "nowrap");
    for (name, value) in placement(text.position, text.offset_x, text.offset_y) {
        element.set(name, value);
    }
    element
}

/// Vector pattern cell with the text rotated by `angle` around its centre
pub fn tile_pattern_svg(text: &TextWatermark) -> String {
    let size = text.size.max(1) as f64;
    let chars = text.content.chars().count().max(1) as f64;
    let width = (chars * size * 0.6 + size * 2.0).max(DEFAULT_TILE_SIZE as f64).round();
    let height = (size * 4.0).max(DEFAULT_TILE_SIZE as f64 / 2.0).round();
    let cx = width / 2.0;
    let cy = height / 2.0;

    format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}">"#,
            r#"<text x="{cx}" y="{cy}" fill="{fill}" font-family="{font}" font-size="{size}" "#,
            r#"text-anchor="middle" dominant-baseline="middle" transform="rotate({angle} {cx} {cy})">"#,
            "{content}</text></svg>"
        ),
        w = width,
        h = height,
        cx = cx,
        cy = cy,
        fill = xml_escape(&text.color),
        font = xml_escape(&text.font),
        size = text.size,
        angle = text.angle,
        content = xml_escape(&text.content),
    )
}

pub async fn image_overlay(image: &ImageWatermark) -> Result<OverlayElement> {
    let source = resolve_image_source(&image.source).await?;

    if image.position == WatermarkPosition::Tile {
        let (width, height) = match (image.width, image.height, source.dimensions) {
            (Some(w), Some(h), _) => (w, h),
            (w, h, Some((dw, dh))) => (w.unwrap_or(dw), h.unwrap_or(dh)),
            (w, h, None) => (
                w.unwrap_or(DEFAULT_TILE_SIZE),
                h.unwrap_or(DEFAULT_TILE_SIZE),
            ),
        };

        let mut element = OverlayElement::tile_container(format!("url(\"{}\")", source.uri));
        element.set("background-size", format!("{width}px {height}px"));
        element.set("opacity", image.opacity.to_string());
        return Ok(element);
    }

    let mut element = OverlayElement::new("img");
    element.src = Some(source.uri);
    element.set("opacity", image.opacity.to_string());
    if let Some(width) = image.width {
        element.set("width", format!("{width}px"));
    }
    if let Some(height) = image.height {
        element.set("height", format!("{height}px"));
    }
    for (name, value) in placement(image.position, image.offset_x, image.offset_y) {
        element.set(name, value);
    }
    Ok(element)
}

struct ImageSource {
    uri: String,
    dimensions: Option<(u32, u32)>,
}

/// Inline a local file as a data URI; data and http(s) URIs pass through.
async fn resolve_image_source(source: &str) -> Result<ImageSource> {
    if source.starts_with("data:") || source.starts_with("http://") || source.starts_with("https://")
    {
        return Ok(ImageSource {
            uri: source.to_string(),
            dimensions: None,
        });
    }

    let path = Path::new(source);
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PageSnapError::WatermarkSource(format!("{source}: {e}")))?;

    let dimensions = image::io::Reader::new(Cursor::new(&bytes))
        .with_guessed_format()
        .ok()
        .and_then(|reader| reader.into_dimensions().ok());

    let mime = mime_type_for(path);
    debug!("Embedded watermark image {} ({}, {} bytes)", source, mime, bytes.len());

    Ok(ImageSource {
        uri: format!("data:{};base64,{}", mime, STANDARD.encode(&bytes)),
        dimensions,
    })
}

/// MIME type inferred from the file extension
pub fn mime_type_for(path: &Path) -> &'static str {
    let is_svg = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("svg"))
        .unwrap_or(false);
    if is_svg {
        return "image/svg+xml";
    }

    match image::ImageFormat::from_path(path) {
        Ok(image::ImageFormat::Png) => "image/png",
        Ok(image::ImageFormat::Jpeg) => "image/jpeg",
        Ok(image::ImageFormat::Gif) => "image/gif",
        Ok(image::ImageFormat::WebP) => "image/webp",
        Ok(image::ImageFormat::Bmp) => "image/bmp",
        Ok(image::ImageFormat::Ico) => "image/x-icon",
        Ok(image::ImageFormat::Tiff) => "image/tiff",
        Ok(image::ImageFormat::Avif) => "image/avif",
        _ => "application/octet-stream",
    }
}

fn xml_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
