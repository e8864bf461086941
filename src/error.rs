use thiserror::Error;

/// Per-cycle failures of the rotation loop. None of these stop the process.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Catalog connection or query failed; treated as zero results.
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(#[from] StoreError),

    /// Image download failed after all retries; skip to the next candidate.
    #[error("failed to fetch {key}: {source}")]
    FetchFailed {
        key: String,
        #[source]
        source: FetchError,
    },

    /// Decode, font or text rendering failure; skip this cycle.
    #[error("failed to compose frame: {0}")]
    ComposeFailed(String),

    /// The display sink rejected the frame; the prior frame stays up.
    #[error("display sink failed: {0}")]
    SinkFailed(#[from] SinkError),
}

/// Catalog or display-log persistence error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed row: {0}")]
    Malformed(String),
}

/// Blob download error, classified for the retry policy.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network hiccup, server error, throttling or transient auth failure.
    #[error("transient fetch error: {0}")]
    Retryable(String),

    /// Missing object or unusable key; retrying will not help.
    #[error("fetch error: {0}")]
    Fatal(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Display sink write error.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),

    #[error("display command failed: {0}")]
    Command(String),
}
