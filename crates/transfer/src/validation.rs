use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use upqueue_protocol::constants::{BYTES_PER_GIGABYTE, BYTES_PER_KILOBYTE, BYTES_PER_MEGABYTE};
use upqueue_protocol::{FileInfo, QueueErrorCode};

/// Parses a human size limit such as `"50 MB"`, `"2097152"` or `"2gb"`.
///
/// The string must start with a digit (after surrounding whitespace).
/// Units are `B`, `KB`, `MB` or `GB` in any case, with or without a space
/// before them. A missing unit means kilobytes; an unrecognized unit means
/// unlimited (`Some(0)`).
///
/// Returns `None` when the string does not start with a number; callers
/// keep their previous limit in that case.
pub fn parse_size_limit(input: &str) -> Option<u64> {
    let input = input.trim();
    let digits_end = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    if digits_end == 0 {
        return None;
    }

    let size: u64 = input[..digits_end].parse().ok()?;
    let units = input[digits_end..].trim().to_ascii_uppercase();

    let limit = match units.as_str() {
        "" | "KB" => size.saturating_mul(BYTES_PER_KILOBYTE),
        "B" => size,
        "MB" => size.saturating_mul(BYTES_PER_MEGABYTE),
        "GB" => size.saturating_mul(BYTES_PER_GIGABYTE),
        _ => 0,
    };
    Some(limit)
}

/// Filename filter built from a `;`-separated pattern list like `"*.jpg;*.png"`.
///
/// Patterns are globs matched case-insensitively against the file name.
/// An empty list, `*` or `*.*` accepts everything. Patterns that fail to
/// compile are ignored.
#[derive(Debug, Clone, Default)]
pub struct FileTypeFilter {
    set: Option<GlobSet>,
}

impl FileTypeFilter {
    pub fn parse(spec: &str) -> Self {
        let patterns: Vec<&str> = spec
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        if patterns.is_empty() || patterns.iter().any(|p| *p == "*" || *p == "*.*") {
            return Self::default();
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            if let Ok(glob) = GlobBuilder::new(pattern).case_insensitive(true).build() {
                builder.add(glob);
            }
        }
        let set = builder.build().unwrap_or_else(|_| GlobSet::empty());
        Self { set: Some(set) }
    }

    /// Returns `true` if the filter accepts every file.
    pub fn accepts_all(&self) -> bool {
        self.set.is_none()
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.set.as_ref().is_none_or(|set| set.is_match(file_name))
    }
}

/// Outcome of evaluating one candidate file.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Append to the queue.
    Admit,
    /// Refused with a queue error. `QueueLimitExceeded` halts the batch.
    Rejected {
        code: QueueErrorCode,
        message: String,
    },
    /// The session upload limit was already reached. Reported as an
    /// upload error and halts the batch.
    UploadLimitExceeded { message: String },
}

impl Admission {
    /// Returns `true` if no further candidates in the batch may be evaluated.
    pub fn halts_batch(&self) -> bool {
        matches!(
            self,
            Self::Rejected {
                code: QueueErrorCode::QueueLimitExceeded,
                ..
            } | Self::UploadLimitExceeded { .. }
        )
    }
}

/// Decisions for one batch of candidates, in evaluation order.
///
/// Candidates after a batch-halting decision are not evaluated and do not
/// appear in `decisions`.
#[derive(Debug, Clone)]
pub struct AdmissionPlan {
    pub files_selected: usize,
    pub decisions: Vec<(FileInfo, Admission)>,
}

impl AdmissionPlan {
    pub fn admitted(&self) -> usize {
        self.decisions
            .iter()
            .filter(|(_, d)| matches!(d, Admission::Admit))
            .count()
    }
}

/// Per-file and per-session limits applied before a file enters the queue.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    /// Maximum number of files waiting or transferring at once.
    pub queue_limit: u64,
    /// Maximum number of successful uploads per session (0 = unlimited).
    pub upload_limit: u64,
    /// Maximum file size in bytes (0 = unlimited).
    pub size_limit: u64,
    pub file_types: FileTypeFilter,
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self {
            queue_limit: u64::MAX,
            upload_limit: 0,
            size_limit: 0,
            file_types: FileTypeFilter::default(),
        }
    }
}

impl AdmissionController {
    /// Evaluates a single candidate against the current queue length and
    /// the number of successful uploads so far.
    pub fn check(&self, candidate: &FileInfo, queue_len: u64, successful_uploads: u64) -> Admission {
        if queue_len >= self.queue_limit {
            return Admission::Rejected {
                code: QueueErrorCode::QueueLimitExceeded,
                message: format!("Exceeded file queue size limit of {}", self.queue_limit),
            };
        }

        if self.upload_limit > 0 && successful_uploads >= self.upload_limit {
            return Admission::UploadLimitExceeded {
                message: format!("Exceeded upload limit of {}", self.upload_limit),
            };
        }

        if candidate.size <= 0 {
            return Admission::Rejected {
                code: QueueErrorCode::ZeroByteFile,
                message: "File is zero bytes and cannot be uploaded.".into(),
            };
        }

        if self.size_limit > 0 && candidate.size as u64 > self.size_limit {
            return Admission::Rejected {
                code: QueueErrorCode::FileExceedsSizeLimit,
                message: "File size exceeds allowed limit.".into(),
            };
        }

        if !self.file_types.matches(&candidate.name) {
            return Admission::Rejected {
                code: QueueErrorCode::InvalidFileType,
                message: "File is not an allowed file type.".into(),
            };
        }

        Admission::Admit
    }

    /// Evaluates a whole batch in order, stopping at the first
    /// batch-halting decision.
    pub fn admit(
        &self,
        candidates: Vec<FileInfo>,
        queue_len: u64,
        successful_uploads: u64,
    ) -> AdmissionPlan {
        let files_selected = candidates.len();
        let mut queue_len = queue_len;
        let mut decisions = Vec::with_capacity(files_selected);

        for candidate in candidates {
            let decision = self.check(&candidate, queue_len, successful_uploads);
            let halt = decision.halts_batch();
            if decision == Admission::Admit {
                queue_len += 1;
            }
            decisions.push((candidate, decision));
            if halt {
                break;
            }
        }

        AdmissionPlan {
            files_selected,
            decisions,
        }
    }
}
