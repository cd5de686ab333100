//! Upload queue and transfer engine.
//!
//! [`UploadEngine`] owns the pending queue, admits files against the
//! configured limits, runs one transfer at a time through a [`Transport`]
//! and turns transport signals into [`UploadEvent`]s with live speed
//! statistics. The crate performs no I/O of its own; `upqueue-http`
//! provides the HTTP transport.
//!
//! # Driving the engine
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use upqueue_engine::{UploadEngine, UploaderConfig, Transport, UploadEvent};
//! # async fn run(transport: Arc<dyn Transport>, files: Vec<upqueue_engine::FileInfo>) {
//! let config = UploaderConfig::default().with_upload_url("https://example.com/upload");
//! let mut engine = UploadEngine::new(config, transport);
//! engine.add_files_to_queue(files);
//! engine.start_upload().ok();
//! while let Some(event) = engine.next_event().await {
//!     if let UploadEvent::UploadComplete { .. } = event {
//!         engine.start_upload().ok();
//!     }
//! }
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod transport;

pub use config::UploaderConfig;
pub use engine::{EventObserver, UploadEngine};
pub use error::EngineError;
pub use transport::{
    SignalKind, SignalSender, TransferId, TransferRequest, Transport, TransportError,
    TransportSignal,
};
pub use upqueue_protocol::{
    FileId, FileInfo, FileRecord, FileStatus, QueueErrorCode, Stats, UploadErrorCode, UploadEvent,
};
