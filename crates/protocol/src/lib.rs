//! Value types shared by the upload queue crates.
//!
//! Nothing here performs I/O: these are the file descriptors, per-file
//! records, aggregate counters and lifecycle events that flow between the
//! admission logic, the engine, transports and callers.

pub mod constants;
pub mod events;
pub mod types;

// Re-export primary types for convenience.
pub use events::{QueueErrorCode, UploadErrorCode, UploadEvent};
pub use types::{FileId, FileInfo, FileRecord, FileStatus, Stats};
