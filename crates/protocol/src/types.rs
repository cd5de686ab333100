use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier assigned to a file when it is admitted to the queue.
///
/// Ids are minted from a per-engine counter starting at 1 and stay stable
/// for the whole lifetime of the file in that engine's queue, including
/// requeues. Snapshots of rejected candidates carry [`FileId::UNASSIGNED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(u64);

impl FileId {
    /// Id carried by candidates that never entered a queue.
    pub const UNASSIGNED: FileId = FileId(0);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn is_assigned(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file_{}", self.0)
    }
}

/// Descriptive attributes of a candidate file. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    /// Size in bytes. Signed so that an unknown size (reported as 0 or
    /// negative by some sources) can be rejected at admission.
    pub size: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    /// Local path the transport reads the bytes from.
    pub path: PathBuf,
    /// Destination override for this file only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
}

impl FileInfo {
    /// Creates a descriptor with no MIME type, timestamp or URL override.
    pub fn new(name: impl Into<String>, size: i64, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: String::new(),
            modified: None,
            path: path.into(),
            upload_url: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn with_upload_url(mut self, url: impl Into<String>) -> Self {
        self.upload_url = Some(url.into());
        self
    }
}

/// Per-file transfer status.
///
/// `Queued -> InProgress -> {Complete, Error, Cancelled}`, plus
/// `Queued -> Cancelled` for files cancelled before they started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Queued,
    InProgress,
    Error,
    Complete,
    Cancelled,
}

impl FileStatus {
    /// Legacy numeric status code.
    pub fn code(&self) -> i32 {
        match self {
            Self::Queued => -1,
            Self::InProgress => -2,
            Self::Error => -3,
            Self::Complete => -4,
            Self::Cancelled => -5,
        }
    }

    /// Returns `true` for the absorbing states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error | Self::Complete | Self::Cancelled)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::InProgress => "in progress",
            Self::Error => "error",
            Self::Complete => "complete",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A queued or transferring file together with its live statistics.
///
/// Speeds are in bits per second, times in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: FileId,
    #[serde(flatten)]
    pub info: FileInfo,
    pub status: FileStatus,
    pub bytes_uploaded: u64,
    pub current_speed: f64,
    pub average_speed: f64,
    pub moving_average_speed: f64,
    pub percent_uploaded: f64,
    pub time_elapsed: f64,
    pub time_remaining: f64,
    #[serde(skip)]
    pub started_at: Option<Instant>,
    #[serde(skip)]
    pub last_event_at: Option<Instant>,
    /// Recent per-interval speed samples, oldest first.
    #[serde(skip)]
    pub speed_history: Vec<f64>,
}

impl FileRecord {
    /// Creates a fresh record in the `Queued` state.
    pub fn new(id: FileId, info: FileInfo) -> Self {
        Self {
            id,
            info,
            status: FileStatus::Queued,
            bytes_uploaded: 0,
            current_speed: 0.0,
            average_speed: 0.0,
            moving_average_speed: 0.0,
            percent_uploaded: 0.0,
            time_elapsed: 0.0,
            time_remaining: 0.0,
            started_at: None,
            last_event_at: None,
            speed_history: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn size(&self) -> i64 {
        self.info.size
    }

    /// Bytes sent so far, as reported by the last progress signal.
    pub fn size_uploaded(&self) -> u64 {
        self.bytes_uploaded
    }
}

/// Aggregate counters for one engine instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// 0 or 1: transfers are serialized.
    pub uploads_in_progress: u32,
    /// Always equal to the current length of the pending queue.
    pub files_queued: u64,
    pub successful_uploads: u64,
    pub upload_errors: u64,
    pub uploads_cancelled: u64,
    pub queue_errors: u64,
}
