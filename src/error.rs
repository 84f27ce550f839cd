//! Error types for the thumbnailer.
//!
//! Errors are scoped the way the two phases isolate failures: a [`FetchError`] belongs to a
//! single URL, a [`ResizeError`] to a single staged image, and [`Error`] is fatal to the phase
//! that raised it.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Phase-fatal errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }
}

/// Failure of one download. Never affects sibling downloads.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid image url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server responded with status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of one staged image during the resize phase.
#[derive(Debug, Error)]
pub enum ResizeError {
    #[error("cannot decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("cannot write {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("resize task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filesystem_error_mentions_path() {
        let err = Error::filesystem(
            "/tmp/incoming",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/incoming"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_status_error_display() {
        let err = FetchError::Status {
            url: "https://example.com/a.png".to_string(),
            status: 404,
        };
        assert_eq!(
            err.to_string(),
            "server responded with status 404 for https://example.com/a.png"
        );
    }
}
