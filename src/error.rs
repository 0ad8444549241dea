//! Error types for data cube operations

use thiserror::Error;

/// Main error type for data cube operations
#[derive(Error, Debug)]
pub enum CubeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} is not a valid voxel width (expected 1, 2 or 4 bytes)")]
    InvalidWidth(usize),

    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Invalid axis: {0}")]
    InvalidAxis(String),

    #[error("Fetch failed for {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("Load cycle cancelled")]
    Cancelled,

    #[error("A load cycle is already in progress")]
    AlreadyLoading,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CubeError {
    /// Wrap any error raised while servicing `url` as a chunk fetch failure.
    pub fn fetch_failed(url: impl Into<String>, reason: impl ToString) -> Self {
        CubeError::FetchFailed {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// True for user-initiated cancellation, which is never retried.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CubeError::Cancelled)
    }
}

/// Specialized Result type for data cube operations
pub type Result<T> = std::result::Result<T, CubeError>;

impl From<serde_json::Error> for CubeError {
    fn from(err: serde_json::Error) -> Self {
        CubeError::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for CubeError {
    fn from(err: image::ImageError) -> Self {
        CubeError::Decode(err.to_string())
    }
}

impl From<base64::DecodeError> for CubeError {
    fn from(err: base64::DecodeError) -> Self {
        CubeError::Decode(format!("invalid base64 payload: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_failed_message() {
        let err = CubeError::fetch_failed("http://host/tile", "503 Service Unavailable");
        assert_eq!(
            err.to_string(),
            "Fetch failed for http://host/tile: 503 Service Unavailable"
        );
        assert!(!err.is_cancelled());
        assert!(CubeError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_invalid_width_message() {
        assert_eq!(
            CubeError::InvalidWidth(3).to_string(),
            "3 is not a valid voxel width (expected 1, 2 or 4 bytes)"
        );
    }
}
