use thiserror::Error;

/// Errors from a single origin or mirror fetch.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The URL could not be built or parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Network or connection error talking to the origin
    #[error("Network error: {0}")]
    Network(String),

    /// The origin answered with a status the caller does not accept
    #[error("Upstream returned HTTP {0}")]
    Status(u16),

    /// The response body could not be read (or was empty where a body is required)
    #[error("Failed to read body: {0}")]
    BodyRead(String),
}

/// Errors from decoding, resizing and re-encoding an image.
#[derive(Debug, Clone, Error)]
pub enum TranscodeError {
    /// Bytes are not a supported or valid image
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// No encoder is registered for the negotiated mime type
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    /// The encoder failed
    #[error("Failed to encode image: {0}")]
    Encode(String),
}

/// Errors from the on-disk artifact store.
///
/// These never fail a request: lookups degrade to a miss and writes are logged.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store runs in cache-disabled mode
    #[error("Cache is disabled")]
    Disabled,

    /// Underlying filesystem error
    #[error("Cache I/O error on {path}: {message}")]
    Io { path: String, message: String },
}

/// Errors surfaced to HTTP clients by the request pipelines.
#[derive(Debug, Clone, Error)]
pub enum ServeError {
    /// The request path cannot be mapped to an asset
    #[error("Invalid asset path: {0}")]
    InvalidPath(String),

    /// Connection-level failure talking to the origin
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The origin answered with a non-success status, propagated verbatim
    #[error("Upstream returned HTTP {0}")]
    UpstreamStatus(u16),

    /// The original bytes are not a decodable image
    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    /// The negotiated mime type has no encoder
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Encoding the rendered image failed
    #[error("Encode failure: {0}")]
    EncodeFailure(String),

    /// The request deadline elapsed
    #[error("Deadline of {0:?} exceeded")]
    Timeout(std::time::Duration),

    /// Task or runtime failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<FetchError> for ServeError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Status(code) => ServeError::UpstreamStatus(code),
            FetchError::InvalidUrl(msg) => ServeError::InvalidPath(msg),
            FetchError::Network(msg) | FetchError::BodyRead(msg) => {
                ServeError::UpstreamUnavailable(msg)
            }
        }
    }
}

impl From<TranscodeError> for ServeError {
    fn from(err: TranscodeError) -> Self {
        match err {
            TranscodeError::Decode(msg) => ServeError::DecodeFailure(msg),
            TranscodeError::UnsupportedFormat(mime) => ServeError::UnsupportedFormat(mime),
            TranscodeError::Encode(msg) => ServeError::EncodeFailure(msg),
        }
    }
}
