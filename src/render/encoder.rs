//! Image transcoder.
//!
//! Decodes original bytes, optionally resizes, and re-encodes into the
//! negotiated format.
//!
//! # Design Decisions
//!
//! - **Always decode/encode**: originals are never passed through, even when
//!   the target format matches. Output bytes depend only on
//!   `(original bytes, mime, width, quality)`.
//!
//! - **Registry dispatch**: target mime types map to a [`FormatEncoder`]
//!   looked up once per request. A mime without an encoder is
//!   [`TranscodeError::UnsupportedFormat`].
//!
//! - **Width only**: the height follows from the aspect ratio. Resizing uses
//!   Catmull-Rom, which is deterministic for a given input.
//!
//! - **Never upscale**: a requested width is capped at the decoded width, so
//!   output memory is bounded by the original. Decoding itself runs under the
//!   `image` crate's default allocation limits.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::tiff::TiffEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, Frame, ImageEncoder};

use super::mime;
use super::negotiate::{RenderSpec, MAX_QUALITY, MIN_QUALITY};
use crate::error::TranscodeError;

// =============================================================================
// Encoders
// =============================================================================

/// Encodes a decoded image into one output format.
pub trait FormatEncoder: Send + Sync {
    /// Mime type produced by this encoder
    fn mime(&self) -> &'static str;

    /// Encode `image`. Lossless formats ignore `quality`.
    fn encode(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, TranscodeError>;
}

fn encode_error(e: impl std::fmt::Display) -> TranscodeError {
    TranscodeError::Encode(e.to_string())
}

/// Baseline JPEG. Alpha is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegFormat;

impl FormatEncoder for JpegFormat {
    fn mime(&self) -> &'static str {
        mime::JPEG
    }

    fn encode(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, TranscodeError> {
        let quality = quality.clamp(MIN_QUALITY, MAX_QUALITY);
        let mut output = Vec::new();
        JpegEncoder::new_with_quality(&mut output, quality)
            .encode_image(&image.to_rgb8())
            .map_err(encode_error)?;
        Ok(output)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PngFormat;

impl FormatEncoder for PngFormat {
    fn mime(&self) -> &'static str {
        mime::PNG
    }

    fn encode(&self, image: &DynamicImage, _quality: u8) -> Result<Vec<u8>, TranscodeError> {
        let rgba = image.to_rgba8();
        let mut output = Vec::new();
        PngEncoder::new(&mut output)
            .write_image(rgba.as_raw(), rgba.width(), rgba.height(), ExtendedColorType::Rgba8)
            .map_err(encode_error)?;
        Ok(output)
    }
}

/// Single-frame GIF.
#[derive(Debug, Clone, Copy, Default)]
pub struct GifFormat;

impl FormatEncoder for GifFormat {
    fn mime(&self) -> &'static str {
        mime::GIF
    }

    fn encode(&self, image: &DynamicImage, _quality: u8) -> Result<Vec<u8>, TranscodeError> {
        let mut output = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut output);
            encoder
                .encode_frame(Frame::new(image.to_rgba8()))
                .map_err(encode_error)?;
        }
        Ok(output)
    }
}

/// Lossy WebP via libwebp.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebpFormat;

impl FormatEncoder for WebpFormat {
    fn mime(&self) -> &'static str {
        mime::WEBP
    }

    fn encode(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, TranscodeError> {
        let quality = quality.clamp(MIN_QUALITY, MAX_QUALITY);
        let rgba = image.to_rgba8();
        let encoded = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height())
            .encode(quality as f32);
        Ok(encoded.to_vec())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TiffFormat;

impl FormatEncoder for TiffFormat {
    fn mime(&self) -> &'static str {
        mime::TIFF
    }

    fn encode(&self, image: &DynamicImage, _quality: u8) -> Result<Vec<u8>, TranscodeError> {
        let rgba = image.to_rgba8();
        let mut output = Cursor::new(Vec::new());
        TiffEncoder::new(&mut output)
            .write_image(rgba.as_raw(), rgba.width(), rgba.height(), ExtendedColorType::Rgba8)
            .map_err(encode_error)?;
        Ok(output.into_inner())
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Maps target mime types to encoders.
pub struct EncoderRegistry {
    encoders: HashMap<&'static str, Box<dyn FormatEncoder>>,
}

impl EncoderRegistry {
    /// A registry with no encoders.
    pub fn empty() -> Self {
        Self {
            encoders: HashMap::new(),
        }
    }

    /// JPEG, PNG, GIF, WebP and TIFF.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(JpegFormat);
        registry.register(PngFormat);
        registry.register(GifFormat);
        registry.register(WebpFormat);
        registry.register(TiffFormat);
        registry
    }

    /// Register an encoder, replacing any previous one for the same mime.
    pub fn register(&mut self, encoder: impl FormatEncoder + 'static) {
        self.encoders.insert(encoder.mime(), Box::new(encoder));
    }

    pub fn get(&self, mime: &str) -> Option<&dyn FormatEncoder> {
        self.encoders.get(mime).map(|e| e.as_ref())
    }

    pub fn supports(&self, mime: &str) -> bool {
        self.encoders.contains_key(mime)
    }
}

impl Default for EncoderRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for EncoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut mimes: Vec<_> = self.encoders.keys().collect();
        mimes.sort();
        f.debug_struct("EncoderRegistry").field("mimes", &mimes).finish()
    }
}

// =============================================================================
// Transcoder
// =============================================================================

/// Decode, resize and encode per [`RenderSpec`].
///
/// Synchronous and CPU bound; async callers run it on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct Transcoder {
    registry: Arc<EncoderRegistry>,
}

impl Transcoder {
    pub fn new(registry: EncoderRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &EncoderRegistry {
        &self.registry
    }

    /// Transcode `source` into the format, width and quality of `spec`.
    pub fn transcode(&self, source: &[u8], spec: &RenderSpec) -> Result<Bytes, TranscodeError> {
        let encoder = self
            .registry
            .get(&spec.target_mime)
            .ok_or_else(|| TranscodeError::UnsupportedFormat(spec.target_mime.clone()))?;

        let image =
            image::load_from_memory(source).map_err(|e| TranscodeError::Decode(e.to_string()))?;
        let image = resize_to_width(image, spec.width);

        encoder.encode(&image, spec.quality).map(Bytes::from)
    }
}

/// Height for `width` that keeps the aspect ratio of `(orig_w, orig_h)`.
pub fn scaled_height(orig_w: u32, orig_h: u32, width: u32) -> u32 {
    if orig_w == 0 {
        return orig_h.max(1);
    }
    let height = (orig_h as f64 * width as f64 / orig_w as f64).round();
    height.clamp(1.0, u32::MAX as f64) as u32
}

/// Downscale to `width`. Images are never enlarged, so a width at or above
/// the original keeps the original size.
fn resize_to_width(image: DynamicImage, width: u32) -> DynamicImage {
    if width == 0 || width >= image.width() {
        return image;
    }
    let height = scaled_height(image.width(), image.height(), width);
    image.resize_exact(width, height, FilterType::CatmullRom)
}

// =============================================================================
// Tests
// =============================================================================
