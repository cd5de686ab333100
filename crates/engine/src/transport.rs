//! Transport capability trait and the signals transports report back.
//!
//! The engine never performs I/O itself. It hands a [`TransferRequest`] to a
//! [`Transport`] together with a [`SignalSender`]; the transport reports
//! progress and exactly one terminal signal (success, error or aborted) per
//! opened transfer through that sender. Using a trait keeps the engine
//! testable with a scripted mock and lets alternate transports be chosen at
//! construction time.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::trace;
use upqueue_protocol::{FileId, UploadErrorCode};

/// Identifies one opened transfer. A file that is retried gets a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(u64);

impl TransferId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transfer_{}", self.0)
    }
}

/// Everything a transport needs to send one file.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub transfer: TransferId,
    pub file: FileId,
    /// Local path to read the bytes from.
    pub path: PathBuf,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub url: String,
    /// Multipart field name for the file part.
    pub field_name: String,
    pub post_params: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    /// Report success if no response arrives this long after the body
    /// has been sent.
    pub assume_success_after: Option<Duration>,
}

/// What happened to a transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalKind {
    Progress {
        bytes_complete: u64,
        bytes_total: u64,
    },
    /// The server answered. The engine decides whether `status` counts as
    /// success.
    Success { status: u16, body: String },
    Error {
        code: UploadErrorCode,
        message: String,
        server_data: Option<String>,
    },
    /// The transfer was aborted before the server answered.
    Aborted,
}

impl SignalKind {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportSignal {
    pub transfer: TransferId,
    pub kind: SignalKind,
}

/// Handle a transport uses to report on one transfer.
///
/// Sending never fails from the transport's point of view; signals sent
/// after the engine is dropped are discarded.
#[derive(Debug, Clone)]
pub struct SignalSender {
    transfer: TransferId,
    tx: mpsc::UnboundedSender<TransportSignal>,
}

impl SignalSender {
    pub fn new(transfer: TransferId, tx: mpsc::UnboundedSender<TransportSignal>) -> Self {
        Self { transfer, tx }
    }

    pub fn progress(&self, bytes_complete: u64, bytes_total: u64) {
        self.send(SignalKind::Progress {
            bytes_complete,
            bytes_total,
        });
    }

    pub fn success(&self, status: u16, body: impl Into<String>) {
        self.send(SignalKind::Success {
            status,
            body: body.into(),
        });
    }

    pub fn error(
        &self,
        code: UploadErrorCode,
        message: impl Into<String>,
        server_data: Option<String>,
    ) {
        self.send(SignalKind::Error {
            code,
            message: message.into(),
            server_data,
        });
    }

    pub fn aborted(&self) {
        self.send(SignalKind::Aborted);
    }

    fn send(&self, kind: SignalKind) {
        let signal = TransportSignal {
            transfer: self.transfer,
            kind,
        };
        if self.tx.send(signal).is_err() {
            trace!(transfer = %self.transfer, "engine gone, signal dropped");
        }
    }
}

/// Errors a transport can report synchronously.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("unknown transfer: {0}")]
    UnknownTransfer(TransferId),

    #[error("no async runtime available to run the transfer")]
    NoRuntime,

    #[error("{0}")]
    Other(String),
}

/// Performs the byte transfer for the engine.
///
/// Implementations must deliver exactly one terminal signal for every
/// transfer whose `open` returned `Ok`, including transfers that are
/// aborted. Neither method may block.
pub trait Transport: Send + Sync {
    /// Starts sending `request`. Returns once the transfer is under way.
    fn open(&self, request: TransferRequest, signals: SignalSender) -> Result<(), TransportError>;

    /// Requests that an open transfer stop. The terminal signal for it
    /// (usually [`SignalKind::Aborted`]) still arrives through its sender.
    fn abort(&self, transfer: TransferId) -> Result<(), TransportError>;
}
