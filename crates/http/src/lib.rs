//! HTTP transport for the upload engine.
//!
//! Sends each file as a `multipart/form-data` POST with `reqwest`, streaming
//! the body from disk and reporting progress as chunks are handed to the
//! connection.

mod transport;

pub use transport::{HttpTransport, PROGRESS_INTERVAL};

use upqueue_protocol::UploadErrorCode;

/// Errors produced while running one HTTP upload.
#[derive(Debug, thiserror::Error)]
pub enum HttpTransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl HttpTransportError {
    /// Upload error code reported to the engine for this failure.
    pub fn upload_error_code(&self) -> UploadErrorCode {
        match self {
            Self::Io(_) => UploadErrorCode::IoError,
            Self::Http(_) => UploadErrorCode::UploadFailed,
        }
    }
}
