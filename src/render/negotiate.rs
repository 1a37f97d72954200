//! Client-hint negotiation.
//!
//! Turns request headers and query parameters into a [`RenderSpec`]. The
//! negotiation is pure and total: malformed or missing signals fall back to
//! defaults and never produce an error.
//!
//! | Signal         | Header           | Query            | Default            |
//! |----------------|------------------|------------------|--------------------|
//! | format         | `Accept`         |                  | mime of extension  |
//! | DPR            | `DPR`            | `dpr`            | 1.0                |
//! | viewport width | `Viewport-Width` | `viewport-width` | unset              |
//! | width          | `Width`          | `width`          | 0 (original size)  |
//! | downlink       | `Downlink`       | `downlink`       | unset              |
//! | save-data      | `Save-Data`      | `save-data`      | false              |
//! | quality (pin)  |                  | `quality`        | computed           |
//!
//! A header wins over its query equivalent whenever the header parses. Save-Data
//! is the exception: it is on when either source carries `1`.

use std::collections::HashMap;

use http::HeaderMap;

use super::mime;

/// Default device pixel ratio.
pub const DEFAULT_DPR: f64 = 1.0;

/// Minimum resolved quality.
pub const MIN_QUALITY: u8 = 1;

/// Maximum resolved quality.
pub const MAX_QUALITY: u8 = 100;

// =============================================================================
// RenderSpec
// =============================================================================

/// Canonical output parameters for one request.
///
/// Built once by [`negotiate`] and immutable afterwards. Only `target_mime`,
/// `width`, `dpr` and `quality` affect the rendered bytes; the remaining
/// fields record the signals that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSpec {
    /// Output mime type
    pub target_mime: String,

    /// Output width in pixels (0 = original size)
    pub width: u32,

    /// Device pixel ratio
    pub dpr: f64,

    /// Resolved quality (1-100)
    pub quality: u8,

    /// Viewport width hint (0 = unset)
    pub viewport_width: u32,

    /// Downlink hint in Mbps (0 = unset)
    pub downlink: f64,

    /// Save-Data hint
    pub save_data: bool,
}

impl Default for RenderSpec {
    fn default() -> Self {
        Self {
            target_mime: mime::DEFAULT_IMAGE.to_string(),
            width: 0,
            dpr: DEFAULT_DPR,
            quality: 0,
            viewport_width: 0,
            downlink: 0.0,
            save_data: false,
        }
    }
}

impl RenderSpec {
    /// Extension of rendered artifacts for this spec's mime type.
    pub fn cache_extension(&self) -> String {
        mime::extension_for(&self.target_mime)
    }
}

// =============================================================================
// Client hints
// =============================================================================

/// Raw, validated request signals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientHints {
    pub accepts_webp: bool,
    pub dpr: Option<f64>,
    pub viewport_width: Option<u32>,
    pub width: Option<u32>,
    pub downlink: Option<f64>,
    pub save_data: bool,
    pub quality: Option<u8>,
}

impl ClientHints {
    /// Collect hints from headers, falling back to query parameters.
    pub fn from_request(headers: &HeaderMap, query: &HashMap<String, String>) -> Self {
        let accepts_webp = headers
            .get_all(http::header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains(mime::WEBP));

        Self {
            accepts_webp,
            dpr: signal(headers, query, "dpr", "dpr", parse_dpr),
            viewport_width: signal(
                headers,
                query,
                "viewport-width",
                "viewport-width",
                parse_viewport,
            ),
            width: signal(headers, query, "width", "width", parse_width),
            downlink: signal(headers, query, "downlink", "downlink", parse_downlink),
            save_data: headers
                .get("save-data")
                .and_then(|v| v.to_str().ok())
                .is_some_and(is_enabled)
                || query.get("save-data").is_some_and(|v| is_enabled(v)),
            quality: query.get("quality").and_then(|v| parse_quality(v)),
        }
    }
}

fn signal<T>(
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    header: &str,
    param: &str,
    parse: fn(&str) -> Option<T>,
) -> Option<T> {
    headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .and_then(parse)
        .or_else(|| query.get(param).and_then(|v| parse(v)))
}

fn parse_dpr(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}

fn parse_viewport(value: &str) -> Option<u32> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 1.0)
        .map(|v| v.min(u32::MAX as f64) as u32)
}

fn parse_width(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok().filter(|v| *v > 0)
}

fn parse_downlink(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Save-Data is on only for the literal `1`, from either source.
fn is_enabled(value: &str) -> bool {
    value.trim() == "1"
}

fn parse_quality(value: &str) -> Option<u8> {
    value
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|q| (MIN_QUALITY..=MAX_QUALITY).contains(q))
}

// =============================================================================
// Negotiation
// =============================================================================

/// Quality for the given signals, always within 1-100.
///
/// Higher density and slow links both lower the quality; the two discounts
/// multiply.
pub fn compute_quality(dpr: f64, downlink: f64, save_data: bool) -> u8 {
    let mut quality = 100.0 - dpr * 30.0;
    if downlink > 0.0 && downlink < 1.0 {
        quality *= downlink;
    }
    if save_data {
        quality *= 0.75;
    }
    quality
        .round()
        .clamp(MIN_QUALITY as f64, MAX_QUALITY as f64) as u8
}

/// Derive the render spec for an image at `path` requested with `hints`.
///
/// The original format comes from the path extension (PNG when unknown) and
/// is overridden by WebP when the client accepts it. Quality is computed
/// first; the width is then clamped to the viewport.
pub fn negotiate(hints: &ClientHints, path: &str) -> RenderSpec {
    let source_mime = mime::for_path(path)
        .filter(|m| m.starts_with("image/"))
        .unwrap_or(mime::DEFAULT_IMAGE);
    let target_mime = if hints.accepts_webp {
        mime::WEBP.to_string()
    } else {
        mime::canonicalize(source_mime)
    };

    let dpr = hints.dpr.unwrap_or(DEFAULT_DPR);
    let downlink = hints.downlink.unwrap_or(0.0);
    let viewport_width = hints.viewport_width.unwrap_or(0);

    let quality = hints
        .quality
        .unwrap_or_else(|| compute_quality(dpr, downlink, hints.save_data));

    let mut width = hints.width.unwrap_or(0);
    if viewport_width > 0 && width > viewport_width {
        width = viewport_width;
    }

    RenderSpec {
        target_mime,
        width,
        dpr,
        quality,
        viewport_width,
        downlink,
        save_data: hints.save_data,
    }
}
