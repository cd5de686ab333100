//! Queue bookkeeping for the upload engine.
//!
//! Everything here is synchronous and free of I/O apart from
//! [`describe_file`] and [`collect_files`], which read file metadata.

mod progress;
mod queue;
mod scanner;
mod validation;

pub use progress::{
    DEFAULT_MAX_SAMPLES, MIN_SAMPLE_INTERVAL, MIN_SAMPLES_FOR_OUTLIER_REJECTION,
    OUTLIER_DEVIATION_RANGE,
    SpeedCalculator, moving_average,
};
pub use queue::UploadQueue;
pub use scanner::{collect_files, describe_file, detect_content_type};
pub use validation::{
    Admission, AdmissionController, AdmissionPlan, FileTypeFilter, parse_size_limit,
};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}
