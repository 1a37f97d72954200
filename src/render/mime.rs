//! Extension to mime type table.
//!
//! Used to pick the original format of an image, the `Content-Type` of CDN
//! and proxied assets, and the file extension of rendered artifacts.

use std::path::Path;

/// Fallback for bodies of unknown type.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Target mime when an image path has no recognised extension.
pub const DEFAULT_IMAGE: &str = "image/png";

pub const JPEG: &str = "image/jpeg";
pub const PNG: &str = "image/png";
pub const GIF: &str = "image/gif";
pub const WEBP: &str = "image/webp";
pub const TIFF: &str = "image/tiff";

/// Mime type registered for a (case-insensitive) extension without the dot.
pub fn for_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" | "jpe" | "jfif" => JPEG,
        "png" => PNG,
        "gif" => GIF,
        "webp" => WEBP,
        "tif" | "tiff" => TIFF,
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        "js" | "mjs" => "application/javascript",
        "css" => "text/css",
        "json" | "map" => "application/json",
        "html" | "htm" => "text/html",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "eot" => "application/vnd.ms-fontobject",
        "swf" => "application/x-shockwave-flash",
        _ => return None,
    };
    Some(mime)
}

/// Mime type for the extension of `path`'s last segment.
pub fn for_path(path: &str) -> Option<&'static str> {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(for_extension)
}

/// Normalise aliases so that equal formats compare (and key) equal.
pub fn canonicalize(mime: &str) -> String {
    let mime = mime.trim().to_ascii_lowercase();
    match mime.as_str() {
        "image/jpg" | "image/pjpeg" => JPEG.to_string(),
        "image/x-tiff" => TIFF.to_string(),
        "image/x-png" => PNG.to_string(),
        _ => mime,
    }
}

/// File extension used for rendered artifacts of `mime`.
///
/// Unknown types map to the mime string with `/` replaced, which keeps the
/// mapping injective.
pub fn extension_for(mime: &str) -> String {
    match mime {
        JPEG => "jpg".to_string(),
        PNG => "png".to_string(),
        GIF => "gif".to_string(),
        WEBP => "webp".to_string(),
        TIFF => "tiff".to_string(),
        other => other.replace('/', "_"),
    }
}
