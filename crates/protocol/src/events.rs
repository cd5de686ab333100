use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::FileRecord;

/// Reason a candidate file was refused entry to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueErrorCode {
    QueueLimitExceeded,
    FileExceedsSizeLimit,
    ZeroByteFile,
    InvalidFileType,
}

impl QueueErrorCode {
    /// Legacy numeric error code.
    pub fn code(&self) -> i32 {
        match self {
            Self::QueueLimitExceeded => -100,
            Self::FileExceedsSizeLimit => -110,
            Self::ZeroByteFile => -120,
            Self::InvalidFileType => -130,
        }
    }
}

impl fmt::Display for QueueErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::QueueLimitExceeded => "queue limit exceeded",
            Self::FileExceedsSizeLimit => "file exceeds size limit",
            Self::ZeroByteFile => "zero byte file",
            Self::InvalidFileType => "invalid file type",
        };
        f.write_str(s)
    }
}

/// Reason a transfer (or an attempt to queue one) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadErrorCode {
    HttpError,
    MissingUploadUrl,
    IoError,
    SecurityError,
    UploadLimitExceeded,
    UploadFailed,
    SpecifiedFileIdNotFound,
    FileValidationFailed,
    FileCancelled,
    UploadStopped,
}

impl UploadErrorCode {
    /// Legacy numeric error code.
    pub fn code(&self) -> i32 {
        match self {
            Self::HttpError => -200,
            Self::MissingUploadUrl => -210,
            Self::IoError => -220,
            Self::SecurityError => -230,
            Self::UploadLimitExceeded => -240,
            Self::UploadFailed => -250,
            Self::SpecifiedFileIdNotFound => -260,
            Self::FileValidationFailed => -270,
            Self::FileCancelled => -280,
            Self::UploadStopped => -290,
        }
    }
}

impl fmt::Display for UploadErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::HttpError => "HTTP error",
            Self::MissingUploadUrl => "missing upload URL",
            Self::IoError => "I/O error",
            Self::SecurityError => "security error",
            Self::UploadLimitExceeded => "upload limit exceeded",
            Self::UploadFailed => "upload failed",
            Self::SpecifiedFileIdNotFound => "specified file id not found",
            Self::FileValidationFailed => "file validation failed",
            Self::FileCancelled => "file cancelled",
            Self::UploadStopped => "upload stopped",
        };
        f.write_str(s)
    }
}

/// Lifecycle events emitted by the upload engine, in emission order.
///
/// Every event carries a snapshot of the record as it was when the event
/// was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum UploadEvent {
    /// A file passed admission and was appended to the queue.
    FileQueued { file: FileRecord },
    /// A file was refused entry to the queue.
    FileQueueError {
        file: FileRecord,
        code: QueueErrorCode,
        message: String,
    },
    /// One admission batch finished.
    FileDialogComplete {
        files_selected: usize,
        files_queued: usize,
        total_in_queue: usize,
    },
    /// The head of the queue began transferring.
    UploadStart { file: FileRecord },
    /// Bytes were sent for the active transfer.
    UploadProgress {
        file: FileRecord,
        bytes_complete: u64,
        bytes_total: u64,
    },
    /// The server accepted the file with one of the configured status codes.
    UploadSuccess {
        file: FileRecord,
        server_data: String,
        response_code: String,
    },
    /// A transfer failed, was cancelled, or could not be attempted.
    UploadError {
        file: FileRecord,
        code: UploadErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_data: Option<String>,
    },
    /// Bookkeeping for a finished transfer is done; the caller may start the next one.
    UploadComplete { file: FileRecord },
}

impl UploadEvent {
    /// Returns the file record carried by the event, if any.
    pub fn file(&self) -> Option<&FileRecord> {
        match self {
            Self::FileQueued { file }
            | Self::FileQueueError { file, .. }
            | Self::UploadStart { file }
            | Self::UploadProgress { file, .. }
            | Self::UploadSuccess { file, .. }
            | Self::UploadError { file, .. }
            | Self::UploadComplete { file } => Some(file),
            Self::FileDialogComplete { .. } => None,
        }
    }

    /// Short event name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileQueued { .. } => "file_queued",
            Self::FileQueueError { .. } => "file_queue_error",
            Self::FileDialogComplete { .. } => "file_dialog_complete",
            Self::UploadStart { .. } => "upload_start",
            Self::UploadProgress { .. } => "upload_progress",
            Self::UploadSuccess { .. } => "upload_success",
            Self::UploadError { .. } => "upload_error",
            Self::UploadComplete { .. } => "upload_complete",
        }
    }
}
