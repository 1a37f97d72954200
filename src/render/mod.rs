//! Rendering: client-hint negotiation, transcoding and the image pipeline.

mod encoder;
pub mod mime;
mod negotiate;
mod service;

pub use encoder::{
    scaled_height, EncoderRegistry, FormatEncoder, GifFormat, JpegFormat, PngFormat, TiffFormat,
    Transcoder, WebpFormat,
};
pub use negotiate::{
    compute_quality, negotiate, ClientHints, RenderSpec, DEFAULT_DPR, MAX_QUALITY, MIN_QUALITY,
};
pub use service::{CacheStatus, ImageService, Rendered};
