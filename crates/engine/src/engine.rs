//! Upload engine: owns the queue, drives one transfer at a time and
//! produces lifecycle events.
//!
//! Operations run synchronously and queue the events they produce.
//! [`UploadEngine::next_event`] hands those events out in order and, once
//! they are drained, waits for the transport to report on the active
//! transfer. Draining policy stays with the caller: the engine never starts
//! the next file on its own.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use upqueue_protocol::{
    FileId, FileInfo, FileRecord, FileStatus, Stats, UploadErrorCode, UploadEvent,
};
use upqueue_transfer::{
    Admission, AdmissionController, FileTypeFilter, SpeedCalculator, UploadQueue, parse_size_limit,
};

use crate::config::UploaderConfig;
use crate::error::EngineError;
use crate::transport::{
    SignalKind, SignalSender, TransferId, TransferRequest, Transport, TransportSignal,
};

/// Side-effect-free callback invoked synchronously for every event.
pub type EventObserver = Box<dyn Fn(&UploadEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct ActiveTransfer {
    transfer: TransferId,
    file: FileId,
}

/// Queue-based upload orchestrator.
pub struct UploadEngine {
    config: UploaderConfig,
    admission: AdmissionController,
    speed: SpeedCalculator,
    transport: Arc<dyn Transport>,
    queue: UploadQueue,
    stats: Stats,
    active: Option<ActiveTransfer>,
    next_file_id: u64,
    next_transfer_id: u64,
    outbox: VecDeque<UploadEvent>,
    observers: Vec<EventObserver>,
    signals_tx: mpsc::UnboundedSender<TransportSignal>,
    signals_rx: mpsc::UnboundedReceiver<TransportSignal>,
}

impl UploadEngine {
    /// Creates an engine with an empty queue and zeroed stats.
    pub fn new(config: UploaderConfig, transport: Arc<dyn Transport>) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let mut engine = Self {
            config: UploaderConfig::default(),
            admission: AdmissionController::default(),
            speed: SpeedCalculator::default(),
            transport,
            queue: UploadQueue::new(),
            stats: Stats::default(),
            active: None,
            next_file_id: 1,
            next_transfer_id: 1,
            outbox: VecDeque::new(),
            observers: Vec::new(),
            signals_tx,
            signals_rx,
        };
        engine.set_config(config);
        engine
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    /// Replaces the configuration. Takes effect for the next admission
    /// batch and the next transfer started.
    ///
    /// A size limit that is empty or does not start with a number keeps the
    /// previously parsed limit; `"0"` removes it.
    pub fn set_config(&mut self, config: UploaderConfig) {
        match parse_size_limit(&config.file_size_limit) {
            Some(limit) => self.admission.size_limit = limit,
            None if config.file_size_limit.trim().is_empty() => {}
            None => {
                warn!(
                    limit = %config.file_size_limit,
                    "unparsable file size limit, keeping previous"
                );
            }
        }
        self.admission.queue_limit = config.file_queue_limit;
        self.admission.upload_limit = config.file_upload_limit;
        self.admission.file_types = FileTypeFilter::parse(&config.file_types);
        self.config = config;
    }

    /// Sets the destination URL used by transfers started from now on.
    pub fn set_upload_url(&mut self, url: impl Into<String>) {
        self.config.upload_url = Some(url.into());
    }

    /// Sets the size limit from a human string such as `"50 MB"`.
    pub fn set_file_size_limit(&mut self, limit: impl Into<String>) {
        let mut config = self.config.clone();
        config.file_size_limit = limit.into();
        self.set_config(config);
    }

    /// Effective size limit in bytes (0 = unlimited).
    pub fn file_size_limit_bytes(&self) -> u64 {
        self.admission.size_limit
    }

    /// Registers an observer called for every event as it is produced.
    pub fn on_event(&mut self, observer: EventObserver) {
        self.observers.push(observer);
    }

    pub fn stats(&self) -> Stats {
        self.stats.clone()
    }

    /// Records waiting or transferring, in queue order.
    pub fn queued_files(&self) -> Vec<&FileRecord> {
        self.queue.iter().collect()
    }

    pub fn file(&self, id: &FileId) -> Option<&FileRecord> {
        self.queue.get(id)
    }

    /// Returns `true` while a transfer is open.
    pub fn is_uploading(&self) -> bool {
        self.active.is_some()
    }

    /// Id of the file currently transferring.
    pub fn active_file(&self) -> Option<FileId> {
        self.active.map(|a| a.file)
    }

    /// Runs one admission batch.
    ///
    /// Emits `FileQueued`, `FileQueueError` or `UploadError` per evaluated
    /// candidate, then one `FileDialogComplete`. Returns how many files were
    /// queued.
    pub fn add_files_to_queue(&mut self, files: Vec<FileInfo>) -> usize {
        let plan = self.admission.admit(
            files,
            self.queue.len() as u64,
            self.stats.successful_uploads,
        );
        let files_selected = plan.files_selected;
        let mut files_queued = 0;

        for (info, decision) in plan.decisions {
            let id = match decision {
                Admission::Admit => self.mint_file_id(),
                _ => FileId::UNASSIGNED,
            };
            let mut record = FileRecord::new(id, info);

            match decision {
                Admission::Admit => {
                    debug!(file = %id, name = %record.name(), size = record.size(), "file queued");
                    self.queue.push_back(record.clone());
                    self.stats.files_queued = self.queue.len() as u64;
                    files_queued += 1;
                    self.emit(UploadEvent::FileQueued { file: record });
                }
                Admission::Rejected { code, message } => {
                    warn!(name = %record.name(), reason = %code, "file rejected");
                    record.status = FileStatus::Error;
                    self.stats.queue_errors += 1;
                    self.emit(UploadEvent::FileQueueError {
                        file: record,
                        code,
                        message,
                    });
                }
                Admission::UploadLimitExceeded { message } => {
                    warn!(name = %record.name(), "upload limit reached");
                    record.status = FileStatus::Error;
                    self.stats.upload_errors += 1;
                    self.emit(UploadEvent::UploadError {
                        file: record,
                        code: UploadErrorCode::UploadLimitExceeded,
                        message,
                        server_data: None,
                    });
                }
            }
        }

        self.emit(UploadEvent::FileDialogComplete {
            files_selected,
            files_queued,
            total_in_queue: self.queue.len(),
        });
        files_queued
    }

    /// Starts transferring the head of the queue.
    ///
    /// Fails only when no destination URL is configured. Does nothing when
    /// the queue is empty or a transfer is already open.
    pub fn start_upload(&mut self) -> Result<(), EngineError> {
        let Some(session_url) = self.config.session_url().map(str::to_owned) else {
            return Err(EngineError::MissingUploadUrl);
        };

        if let Some(active) = self.active {
            debug!(file = %active.file, "upload already in progress");
            return Ok(());
        }
        let Some(file) = self.queue.head_id() else {
            debug!("queue empty, nothing to upload");
            return Ok(());
        };

        let transfer = self.mint_transfer_id();
        let now = Instant::now();
        let Some(record) = self.queue.get_mut(&file) else {
            return Ok(());
        };

        record.status = FileStatus::InProgress;
        self.speed.begin(record, now);

        let size = u64::try_from(record.size()).unwrap_or(0);
        let request = TransferRequest {
            transfer,
            file,
            path: record.info.path.clone(),
            file_name: record.info.name.clone(),
            mime_type: record.info.mime_type.clone(),
            size,
            url: record.info.upload_url.clone().unwrap_or(session_url),
            field_name: self.config.field_name().to_string(),
            post_params: self.config.post_params.clone(),
            headers: self.config.http_headers.clone(),
            assume_success_after: self.config.assume_success_after(),
        };
        let snapshot = record.clone();

        self.active = Some(ActiveTransfer { transfer, file });
        self.stats.uploads_in_progress = 1;
        info!(file = %file, name = %snapshot.name(), url = %request.url, "upload started");

        self.emit(UploadEvent::UploadStart { file: snapshot });
        self.apply_progress(file, 0, size, now);

        let signals = SignalSender::new(transfer, self.signals_tx.clone());
        if let Err(e) = self.transport.open(request, signals) {
            warn!(file = %file, error = %e, "transport failed to open transfer");
            self.handle_signal(TransportSignal {
                transfer,
                kind: SignalKind::Error {
                    code: UploadErrorCode::IoError,
                    message: e.to_string(),
                    server_data: None,
                },
            });
        }
        Ok(())
    }

    /// Cancels a file, or the head of the queue when `id` is `None`.
    ///
    /// Unknown ids and already-finished files are ignored. Cancelling the
    /// active file aborts its transfer; its completion follows when the
    /// transport reports the abort. Cancelling a waiting file removes it
    /// from the queue immediately.
    pub fn cancel_upload(&mut self, id: Option<FileId>, trigger_error_event: bool) {
        let Some(target) = id.or_else(|| self.queue.head_id()) else {
            return;
        };
        let active = self.active.filter(|a| a.file == target);

        let Some(record) = self.queue.get_mut(&target) else {
            debug!(file = %target, "cancel for unknown file ignored");
            return;
        };
        if record.status.is_terminal() {
            return;
        }

        if let Some(active) = active
            && record.status == FileStatus::InProgress
            && let Err(e) = self.transport.abort(active.transfer)
        {
            warn!(file = %target, error = %e, "transport abort failed");
        }

        record.status = FileStatus::Cancelled;
        let snapshot = record.clone();
        self.stats.uploads_cancelled += 1;
        info!(file = %target, name = %snapshot.name(), "upload cancelled");

        if trigger_error_event {
            self.stats.upload_errors += 1;
            self.emit(UploadEvent::UploadError {
                file: snapshot,
                code: UploadErrorCode::FileCancelled,
                message: "File Cancelled".into(),
                server_data: None,
            });
        }

        if active.is_none() {
            self.queue.remove(&target);
            self.stats.files_queued = self.queue.len() as u64;
            self.stats.uploads_in_progress = u32::from(self.active.is_some());
        }
    }

    /// Returns the next event, waiting for the transport if necessary.
    ///
    /// Returns `None` once every produced event has been handed out and no
    /// transfer is open.
    pub async fn next_event(&mut self) -> Option<UploadEvent> {
        loop {
            if let Some(event) = self.outbox.pop_front() {
                return Some(event);
            }
            if self.active.is_none() {
                return None;
            }
            let signal = self.signals_rx.recv().await?;
            self.handle_signal(signal);
        }
    }

    /// Like [`next_event`](Self::next_event) but never waits: returns `None`
    /// when nothing is ready right now.
    pub fn try_next_event(&mut self) -> Option<UploadEvent> {
        loop {
            if let Some(event) = self.outbox.pop_front() {
                return Some(event);
            }
            let signal = self.signals_rx.try_recv().ok()?;
            self.handle_signal(signal);
        }
    }

    fn handle_signal(&mut self, signal: TransportSignal) {
        let Some(active) = self.active.filter(|a| a.transfer == signal.transfer) else {
            trace!(transfer = %signal.transfer, "signal for inactive transfer ignored");
            return;
        };

        match signal.kind {
            SignalKind::Progress {
                bytes_complete,
                bytes_total,
            } => self.apply_progress(active.file, bytes_complete, bytes_total, Instant::now()),
            SignalKind::Success { status, body } => self.on_success(active.file, status, body),
            SignalKind::Error {
                code,
                message,
                server_data,
            } => self.on_error(active.file, code, message, server_data),
            SignalKind::Aborted => self.on_aborted(active.file),
        }
    }

    fn apply_progress(
        &mut self,
        file: FileId,
        bytes_complete: u64,
        bytes_total: u64,
        now: Instant,
    ) {
        let Some(record) = self.queue.get_mut(&file) else {
            return;
        };
        if record.status != FileStatus::InProgress {
            return;
        }

        self.speed.record_progress(record, bytes_complete, bytes_total, now);
        trace!(file = %file, bytes_complete, bytes_total, "upload progress");
        let snapshot = record.clone();
        self.emit(UploadEvent::UploadProgress {
            file: snapshot,
            bytes_complete,
            bytes_total,
        });
    }

    fn on_success(&mut self, file: FileId, status: u16, body: String) {
        if !self.config.http_success.contains(&status) {
            self.on_error(
                file,
                UploadErrorCode::HttpError,
                format!("Unsuccessful server response code of: {status}"),
                Some(body),
            );
            return;
        }

        if let Some(record) = self.queue.get_mut(&file)
            && record.status != FileStatus::Cancelled
        {
            record.status = FileStatus::Complete;
            let size = u64::try_from(record.size()).unwrap_or(0);
            if record.bytes_uploaded < size {
                self.speed.record_progress(record, size, size, Instant::now());
            }
            let snapshot = record.clone();

            self.stats.successful_uploads += 1;
            info!(file = %file, name = %snapshot.name(), status, "upload succeeded");

            self.emit(UploadEvent::UploadProgress {
                file: snapshot.clone(),
                bytes_complete: size,
                bytes_total: size,
            });
            self.emit(UploadEvent::UploadSuccess {
                file: snapshot,
                server_data: body,
                response_code: status.to_string(),
            });
        }

        self.complete_transfer();
    }

    fn on_error(
        &mut self,
        file: FileId,
        code: UploadErrorCode,
        message: String,
        server_data: Option<String>,
    ) {
        let Some(record) = self.queue.get_mut(&file) else {
            self.complete_transfer();
            return;
        };
        if record.status == FileStatus::Cancelled {
            self.complete_transfer();
            return;
        }

        record.status = FileStatus::Error;
        let snapshot = record.clone();
        self.stats.upload_errors += 1;
        warn!(file = %file, name = %snapshot.name(), code = %code, message = %message, "upload failed");

        self.emit(UploadEvent::UploadError {
            file: snapshot.clone(),
            code,
            message,
            server_data,
        });
        self.complete_transfer();

        if self.config.requeue_on_error && code != UploadErrorCode::FileCancelled {
            self.requeue(snapshot);
        }
    }

    fn on_aborted(&mut self, file: FileId) {
        let Some(record) = self.queue.get_mut(&file) else {
            self.complete_transfer();
            return;
        };
        if record.status == FileStatus::Cancelled {
            self.complete_transfer();
            return;
        }

        // Aborted without a cancel from us.
        record.status = FileStatus::Cancelled;
        let snapshot = record.clone();
        self.stats.uploads_cancelled += 1;
        self.stats.upload_errors += 1;
        warn!(file = %file, name = %snapshot.name(), "upload aborted by transport");

        self.emit(UploadEvent::UploadError {
            file: snapshot,
            code: UploadErrorCode::FileCancelled,
            message: "Upload Aborted".into(),
            server_data: None,
        });
        self.complete_transfer();
    }

    /// Finishes bookkeeping for the active transfer. Runs at most once per
    /// transfer because it clears `active`.
    fn complete_transfer(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let record = self.queue.remove(&active.file);
        self.stats.files_queued = self.queue.len() as u64;
        self.stats.uploads_in_progress = 0;

        if let Some(record) = record {
            debug!(file = %active.file, status = %record.status, "upload complete");
            self.emit(UploadEvent::UploadComplete { file: record });
        }
    }

    fn requeue(&mut self, failed: FileRecord) {
        let record = FileRecord::new(failed.id, failed.info);
        debug!(file = %record.id, name = %record.name(), "requeued after error");
        self.queue.push_back(record.clone());
        self.stats.files_queued = self.queue.len() as u64;
        self.emit(UploadEvent::FileQueued { file: record });
    }

    fn emit(&mut self, event: UploadEvent) {
        for observer in &self.observers {
            observer(&event);
        }
        self.outbox.push_back(event);
    }

    fn mint_file_id(&mut self) -> FileId {
        let id = FileId::new(self.next_file_id);
        self.next_file_id += 1;
        id
    }

    fn mint_transfer_id(&mut self) -> TransferId {
        let id = TransferId::new(self.next_transfer_id);
        self.next_transfer_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use std::sync::Mutex;
    use upqueue_protocol::QueueErrorCode;

    /// Mock transport that records requests and lets tests script signals.
    #[derive(Default)]
    struct MockTransport {
        opened: Mutex<Vec<(TransferRequest, SignalSender)>>,
        aborted: Mutex<Vec<TransferId>>,
        fail_open: bool,
        fail_abort: bool,
        /// Leave abort signalling to the test.
        silent_abort: bool,
    }

    impl MockTransport {
        fn sender(&self) -> SignalSender {
            self.opened.lock().unwrap().last().unwrap().1.clone()
        }

        fn request(&self) -> TransferRequest {
            self.opened.lock().unwrap().last().unwrap().0.clone()
        }

        fn open_count(&self) -> usize {
            self.opened.lock().unwrap().len()
        }

        fn abort_count(&self) -> usize {
            self.aborted.lock().unwrap().len()
        }
    }

    impl Transport for MockTransport {
        fn open(
            &self,
            request: TransferRequest,
            signals: SignalSender,
        ) -> Result<(), TransportError> {
            if self.fail_open {
                return Err(TransportError::Other("connection refused".into()));
            }
            self.opened.lock().unwrap().push((request, signals));
            Ok(())
        }

        fn abort(&self, transfer: TransferId) -> Result<(), TransportError> {
            self.aborted.lock().unwrap().push(transfer);
            if self.fail_abort {
                return Err(TransportError::UnknownTransfer(transfer));
            }
            if !self.silent_abort {
                let opened = self.opened.lock().unwrap();
                if let Some((_, signals)) = opened.iter().find(|(r, _)| r.transfer == transfer) {
                    signals.aborted();
                }
            }
            Ok(())
        }
    }

    fn config() -> UploaderConfig {
        UploaderConfig::default().with_upload_url("http://localhost/upload")
    }

    fn engine_with(
        config: UploaderConfig,
        transport: MockTransport,
    ) -> (UploadEngine, Arc<MockTransport>) {
        let transport = Arc::new(transport);
        let engine = UploadEngine::new(config, transport.clone());
        (engine, transport)
    }

    fn file(name: &str, size: i64) -> FileInfo {
        FileInfo::new(name, size, format!("/tmp/{name}")).with_mime_type("text/plain")
    }

    fn drain(engine: &mut UploadEngine) -> Vec<UploadEvent> {
        std::iter::from_fn(|| engine.try_next_event()).collect()
    }

    fn kinds(events: &[UploadEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.kind()).collect()
    }

    fn count(events: &[UploadEvent], kind: &str) -> usize {
        events.iter().filter(|e| e.kind() == kind).count()
    }

    fn assert_queue_consistent(engine: &UploadEngine) {
        assert_eq!(
            engine.stats().files_queued,
            engine.queued_files().len() as u64
        );
    }

    #[test]
    fn admission_scenario_with_size_limit() {
        let (mut engine, _) = engine_with(
            config()
                .with_file_size_limit("10 MB")
                .with_file_queue_limit(10),
            MockTransport::default(),
        );

        let queued = engine.add_files_to_queue(vec![
            file("one.txt", 10),
            file("two.txt", 0),
            file("three.txt", 20_000_000),
        ]);
        assert_eq!(queued, 1);

        let events = drain(&mut engine);
        assert_eq!(
            kinds(&events),
            vec![
                "file_queued",
                "file_queue_error",
                "file_queue_error",
                "file_dialog_complete"
            ]
        );
        match &events[1] {
            UploadEvent::FileQueueError { file, code, message } => {
                assert_eq!(file.name(), "two.txt");
                assert_eq!(*code, QueueErrorCode::ZeroByteFile);
                assert_eq!(message, "File is zero bytes and cannot be uploaded.");
            }
            other => panic!("unexpected {other:?}"),
        }
        match &events[2] {
            UploadEvent::FileQueueError { file, code, .. } => {
                assert_eq!(file.name(), "three.txt");
                assert_eq!(*code, QueueErrorCode::FileExceedsSizeLimit);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &events[3] {
            UploadEvent::FileDialogComplete {
                files_selected,
                files_queued,
                total_in_queue,
            } => {
                assert_eq!(*files_selected, 3);
                assert_eq!(*files_queued, 1);
                assert_eq!(*total_in_queue, 1);
            }
            other => panic!("unexpected {other:?}"),
        }

        let queued = engine.queued_files();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].name(), "one.txt");
        assert_eq!(queued[0].status, FileStatus::Queued);

        let stats = engine.stats();
        assert_eq!(stats.files_queued, 1);
        assert_eq!(stats.queue_errors, 2);
        assert_eq!(stats.upload_errors, 0);
    }

    #[test]
    fn file_ids_are_minted_only_on_admission() {
        let (mut engine, _) = engine_with(config(), MockTransport::default());
        engine.add_files_to_queue(vec![file("a", 1), file("b", 0), file("c", 0), file("d", 1)]);
        let events = drain(&mut engine);

        let queued: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                UploadEvent::FileQueued { file } => Some(file.id.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(queued, vec!["file_1", "file_2"]);

        let rejected: Vec<FileId> = events
            .iter()
            .filter_map(|e| match e {
                UploadEvent::FileQueueError { file, .. } => Some(file.id),
                _ => None,
            })
            .collect();
        assert_eq!(rejected, vec![FileId::UNASSIGNED, FileId::UNASSIGNED]);

        engine.add_files_to_queue(vec![file("e", 1)]);
        assert!(engine.file(&FileId::new(3)).is_some());
    }

    #[test]
    fn queue_limit_halts_batch() {
        let (mut engine, _) =
            engine_with(config().with_file_queue_limit(2), MockTransport::default());

        engine.add_files_to_queue(vec![file("a", 1), file("b", 1), file("c", 1), file("d", 1)]);
        let events = drain(&mut engine);
        assert_eq!(
            kinds(&events),
            vec![
                "file_queued",
                "file_queued",
                "file_queue_error",
                "file_dialog_complete"
            ]
        );
        match &events[2] {
            UploadEvent::FileQueueError { code, message, .. } => {
                assert_eq!(*code, QueueErrorCode::QueueLimitExceeded);
                assert_eq!(message, "Exceeded file queue size limit of 2");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(engine.stats().queue_errors, 1);
        assert_queue_consistent(&engine);
    }

    #[test]
    fn queue_limit_counts_files_already_queued() {
        let (mut engine, _) =
            engine_with(config().with_file_queue_limit(2), MockTransport::default());
        engine.add_files_to_queue(vec![file("a", 1), file("b", 1)]);
        drain(&mut engine);

        assert_eq!(engine.add_files_to_queue(vec![file("c", 1)]), 0);
        let events = drain(&mut engine);
        assert_eq!(kinds(&events), vec!["file_queue_error", "file_dialog_complete"]);
    }

    #[test]
    fn upload_limit_is_reported_as_upload_error() {
        let (mut engine, transport) =
            engine_with(config().with_file_upload_limit(1), MockTransport::default());
        engine.add_files_to_queue(vec![file("a", 5)]);
        engine.start_upload().unwrap();
        transport.sender().success(200, "");
        drain(&mut engine);
        assert_eq!(engine.stats().successful_uploads, 1);

        engine.add_files_to_queue(vec![file("b", 5), file("c", 5)]);
        let events = drain(&mut engine);
        assert_eq!(kinds(&events), vec!["upload_error", "file_dialog_complete"]);
        match &events[0] {
            UploadEvent::UploadError { file, code, message, .. } => {
                assert_eq!(file.name(), "b");
                assert_eq!(*code, UploadErrorCode::UploadLimitExceeded);
                assert_eq!(message, "Exceeded upload limit of 1");
            }
            other => panic!("unexpected {other:?}"),
        }
        let stats = engine.stats();
        assert_eq!(stats.upload_errors, 1);
        assert_eq!(stats.queue_errors, 0);
        assert_eq!(stats.files_queued, 0);
    }

    #[test]
    fn file_type_filter_rejects_without_halting() {
        let (mut engine, _) =
            engine_with(config().with_file_types("*.jpg"), MockTransport::default());
        engine.add_files_to_queue(vec![file("a.txt", 1), file("b.jpg", 1)]);
        let events = drain(&mut engine);
        assert_eq!(
            kinds(&events),
            vec!["file_queue_error", "file_queued", "file_dialog_complete"]
        );
        match &events[0] {
            UploadEvent::FileQueueError { code, .. } => {
                assert_eq!(*code, QueueErrorCode::InvalidFileType)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unparsable_size_limit_keeps_previous() {
        let (mut engine, _) = engine_with(
            config().with_file_size_limit("1 KB"),
            MockTransport::default(),
        );
        assert_eq!(engine.file_size_limit_bytes(), 1024);

        engine.set_file_size_limit("lots");
        assert_eq!(engine.file_size_limit_bytes(), 1024);

        engine.set_file_size_limit("3 b");
        assert_eq!(engine.file_size_limit_bytes(), 3);

        engine.set_file_size_limit("");
        assert_eq!(engine.file_size_limit_bytes(), 3);

        engine.set_file_size_limit("0");
        assert_eq!(engine.file_size_limit_bytes(), 0);
    }

    #[test]
    fn start_without_url_fails() {
        let (mut engine, transport) =
            engine_with(UploaderConfig::default(), MockTransport::default());
        engine.add_files_to_queue(vec![file("a", 1)]);
        drain(&mut engine);

        assert!(matches!(
            engine.start_upload(),
            Err(EngineError::MissingUploadUrl)
        ));
        assert!(drain(&mut engine).is_empty());
        assert_eq!(transport.open_count(), 0);
        assert_eq!(engine.queued_files()[0].status, FileStatus::Queued);
    }

    #[test]
    fn start_on_empty_queue_is_noop() {
        let (mut engine, transport) = engine_with(config(), MockTransport::default());
        engine.start_upload().unwrap();
        assert!(drain(&mut engine).is_empty());
        assert_eq!(transport.open_count(), 0);
        assert_eq!(engine.stats().uploads_in_progress, 0);
    }

    #[test]
    fn start_emits_start_and_zero_progress() {
        let (mut engine, transport) = engine_with(
            config()
                .with_post_param("album", "trip")
                .with_http_header("X-Token", "abc")
                .with_assume_success_timeout(3),
            MockTransport::default(),
        );
        engine.add_files_to_queue(vec![file("a.txt", 10)]);
        drain(&mut engine);

        engine.start_upload().unwrap();
        let events = drain(&mut engine);
        assert_eq!(kinds(&events), vec!["upload_start", "upload_progress"]);
        match &events[1] {
            UploadEvent::UploadProgress {
                file,
                bytes_complete,
                bytes_total,
            } => {
                assert_eq!(*bytes_complete, 0);
                assert_eq!(*bytes_total, 10);
                assert_eq!(file.status, FileStatus::InProgress);
                assert!(file.started_at.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }

        let request = transport.request();
        assert_eq!(request.url, "http://localhost/upload");
        assert_eq!(request.field_name, "Filedata");
        assert_eq!(request.file_name, "a.txt");
        assert_eq!(request.mime_type, "text/plain");
        assert_eq!(request.size, 10);
        assert_eq!(request.post_params.get("album").map(String::as_str), Some("trip"));
        assert_eq!(request.headers.get("X-Token").map(String::as_str), Some("abc"));
        assert_eq!(
            request.assume_success_after,
            Some(std::time::Duration::from_secs(3))
        );

        assert!(engine.is_uploading());
        assert_eq!(engine.stats().uploads_in_progress, 1);
        assert_eq!(engine.stats().files_queued, 1);
    }

    #[test]
    fn per_file_url_overrides_session_url() {
        let (mut engine, transport) = engine_with(
            config().with_alternate_upload_url("http://alt/upload"),
            MockTransport::default(),
        );
        engine.add_files_to_queue(vec![
            file("a", 1),
            file("b", 1).with_upload_url("http://special/upload"),
        ]);

        engine.start_upload().unwrap();
        assert_eq!(transport.request().url, "http://alt/upload");
        transport.sender().success(200, "");
        drain(&mut engine);

        engine.start_upload().unwrap();
        assert_eq!(transport.request().url, "http://special/upload");
    }

    #[test]
    fn start_while_active_is_noop() {
        let (mut engine, transport) = engine_with(config(), MockTransport::default());
        engine.add_files_to_queue(vec![file("a", 1), file("b", 1)]);
        engine.start_upload().unwrap();
        drain(&mut engine);

        engine.start_upload().unwrap();
        assert!(drain(&mut engine).is_empty());
        assert_eq!(transport.open_count(), 1);
        assert_eq!(engine.active_file(), Some(FileId::new(1)));
    }

    #[test]
    fn successful_upload_flow() {
        let (mut engine, transport) = engine_with(config(), MockTransport::default());
        engine.add_files_to_queue(vec![file("a", 10)]);
        engine.start_upload().unwrap();
        drain(&mut engine);

        let signals = transport.sender();
        signals.progress(5, 10);
        let events = drain(&mut engine);
        assert_eq!(kinds(&events), vec!["upload_progress"]);
        assert_eq!(engine.file(&FileId::new(1)).unwrap().bytes_uploaded, 5);

        signals.success(200, "stored");
        let events = drain(&mut engine);
        assert_eq!(
            kinds(&events),
            vec!["upload_progress", "upload_success", "upload_complete"]
        );
        match &events[0] {
            UploadEvent::UploadProgress {
                bytes_complete,
                bytes_total,
                file,
            } => {
                assert_eq!((*bytes_complete, *bytes_total), (10, 10));
                assert_eq!(file.percent_uploaded, 100.0);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &events[1] {
            UploadEvent::UploadSuccess {
                file,
                server_data,
                response_code,
            } => {
                assert_eq!(file.status, FileStatus::Complete);
                assert_eq!(server_data, "stored");
                assert_eq!(response_code, "200");
            }
            other => panic!("unexpected {other:?}"),
        }

        let stats = engine.stats();
        assert_eq!(stats.successful_uploads, 1);
        assert_eq!(stats.files_queued, 0);
        assert_eq!(stats.uploads_in_progress, 0);
        assert!(!engine.is_uploading());
        assert!(engine.file(&FileId::new(1)).is_none());
    }

    #[test]
    fn unaccepted_status_code_is_http_error() {
        let (mut engine, transport) = engine_with(config(), MockTransport::default());
        engine.add_files_to_queue(vec![file("a", 10)]);
        engine.start_upload().unwrap();
        drain(&mut engine);

        transport.sender().success(404, "not found");
        let events = drain(&mut engine);
        assert_eq!(kinds(&events), vec!["upload_error", "upload_complete"]);
        match &events[0] {
            UploadEvent::UploadError {
                file,
                code,
                message,
                server_data,
            } => {
                assert_eq!(*code, UploadErrorCode::HttpError);
                assert_eq!(message, "Unsuccessful server response code of: 404");
                assert_eq!(server_data.as_deref(), Some("not found"));
                assert_eq!(file.status, FileStatus::Error);
            }
            other => panic!("unexpected {other:?}"),
        }
        let stats = engine.stats();
        assert_eq!(stats.upload_errors, 1);
        assert_eq!(stats.successful_uploads, 0);
        assert_eq!(stats.uploads_in_progress, 0);
    }

    #[test]
    fn configured_success_codes_are_honoured() {
        let (mut engine, transport) =
            engine_with(config().with_http_success(vec![201]), MockTransport::default());
        engine.add_files_to_queue(vec![file("a", 10), file("b", 10)]);

        engine.start_upload().unwrap();
        transport.sender().success(201, "");
        let events = drain(&mut engine);
        assert_eq!(count(&events, "upload_success"), 1);

        engine.start_upload().unwrap();
        transport.sender().success(200, "");
        let events = drain(&mut engine);
        assert_eq!(count(&events, "upload_success"), 0);
        assert_eq!(count(&events, "upload_error"), 1);
    }

    #[test]
    fn transport_error_runs_completion() {
        let (mut engine, transport) = engine_with(config(), MockTransport::default());
        engine.add_files_to_queue(vec![file("a", 10), file("b", 10)]);
        engine.start_upload().unwrap();
        drain(&mut engine);

        transport
            .sender()
            .error(UploadErrorCode::UploadFailed, "connection reset", None);
        let events = drain(&mut engine);
        assert_eq!(kinds(&events), vec!["upload_error", "upload_complete"]);
        assert_eq!(engine.stats().upload_errors, 1);
        assert_eq!(engine.stats().files_queued, 1);
        assert_eq!(engine.queued_files()[0].name(), "b");
        assert_queue_consistent(&engine);
    }

    #[test]
    fn open_failure_is_io_error() {
        let transport = MockTransport {
            fail_open: true,
            ..MockTransport::default()
        };
        let (mut engine, _) = engine_with(config(), transport);
        engine.add_files_to_queue(vec![file("a", 10)]);
        drain(&mut engine);

        engine.start_upload().unwrap();
        let events = drain(&mut engine);
        assert_eq!(
            kinds(&events),
            vec!["upload_start", "upload_progress", "upload_error", "upload_complete"]
        );
        match &events[2] {
            UploadEvent::UploadError { code, .. } => assert_eq!(*code, UploadErrorCode::IoError),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(engine.stats().uploads_in_progress, 0);
        assert_eq!(engine.stats().files_queued, 0);
    }

    #[test]
    fn cancelling_active_upload_reports_once() {
        let (mut engine, transport) = engine_with(config(), MockTransport::default());
        engine.add_files_to_queue(vec![file("a", 10)]);
        engine.start_upload().unwrap();
        drain(&mut engine);
        let signals = transport.sender();

        engine.cancel_upload(None, true);
        engine.cancel_upload(None, true);
        let events = drain(&mut engine);
        assert_eq!(kinds(&events), vec!["upload_error", "upload_complete"]);
        match &events[0] {
            UploadEvent::UploadError { code, message, file, .. } => {
                assert_eq!(*code, UploadErrorCode::FileCancelled);
                assert_eq!(message, "File Cancelled");
                assert_eq!(file.status, FileStatus::Cancelled);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(transport.abort_count(), 1);

        // Late signals from the aborted transfer change nothing.
        signals.success(200, "");
        signals.aborted();
        assert!(drain(&mut engine).is_empty());

        let stats = engine.stats();
        assert_eq!(stats.uploads_cancelled, 1);
        assert_eq!(stats.upload_errors, 1);
        assert_eq!(stats.successful_uploads, 0);
        assert_eq!(stats.files_queued, 0);
        assert_eq!(stats.uploads_in_progress, 0);
    }

    #[test]
    fn cancelling_without_error_event() {
        let (mut engine, _) = engine_with(config(), MockTransport::default());
        engine.add_files_to_queue(vec![file("a", 10)]);
        engine.start_upload().unwrap();
        drain(&mut engine);

        engine.cancel_upload(None, false);
        let events = drain(&mut engine);
        assert_eq!(kinds(&events), vec!["upload_complete"]);
        assert_eq!(engine.stats().uploads_cancelled, 1);
        assert_eq!(engine.stats().upload_errors, 0);
    }

    #[test]
    fn success_racing_a_cancel_only_completes() {
        let transport = MockTransport {
            silent_abort: true,
            ..MockTransport::default()
        };
        let (mut engine, transport) = engine_with(config(), transport);
        engine.add_files_to_queue(vec![file("a", 10)]);
        engine.start_upload().unwrap();
        drain(&mut engine);

        engine.cancel_upload(None, true);
        let events = drain(&mut engine);
        assert_eq!(kinds(&events), vec!["upload_error"]);
        assert!(engine.is_uploading());

        // The server answered before the abort took effect.
        let signals = transport.sender();
        signals.progress(10, 10);
        signals.success(200, "ok");
        let events = drain(&mut engine);
        assert_eq!(kinds(&events), vec!["upload_complete"]);
        match &events[0] {
            UploadEvent::UploadComplete { file } => assert_eq!(file.status, FileStatus::Cancelled),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(engine.stats().successful_uploads, 0);
        assert_eq!(engine.stats().uploads_in_progress, 0);
    }

    #[test]
    fn abort_failure_is_swallowed() {
        let transport = MockTransport {
            fail_abort: true,
            ..MockTransport::default()
        };
        let (mut engine, transport) = engine_with(config(), transport);
        engine.add_files_to_queue(vec![file("a", 10)]);
        engine.start_upload().unwrap();
        drain(&mut engine);

        engine.cancel_upload(None, true);
        assert_eq!(kinds(&drain(&mut engine)), vec!["upload_error"]);
        assert_eq!(
            engine.file(&FileId::new(1)).map(|f| f.status),
            Some(FileStatus::Cancelled)
        );

        transport
            .sender()
            .error(UploadErrorCode::UploadFailed, "broken pipe", None);
        assert_eq!(kinds(&drain(&mut engine)), vec!["upload_complete"]);
        assert_eq!(engine.stats().upload_errors, 1);
    }

    #[test]
    fn cancelling_waiting_file_removes_it() {
        let (mut engine, transport) = engine_with(config(), MockTransport::default());
        engine.add_files_to_queue(vec![file("a", 10), file("b", 10), file("c", 10)]);
        engine.start_upload().unwrap();
        drain(&mut engine);

        engine.cancel_upload(Some(FileId::new(2)), true);
        let events = drain(&mut engine);
        assert_eq!(kinds(&events), vec!["upload_error"]);
        assert_eq!(events[0].file().map(|f| f.id), Some(FileId::new(2)));
        assert_eq!(transport.abort_count(), 0);

        let names: Vec<&str> = engine.queued_files().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["a", "c"]);
        let stats = engine.stats();
        assert_eq!(stats.files_queued, 2);
        assert_eq!(stats.uploads_in_progress, 1);
        assert_eq!(stats.uploads_cancelled, 1);
        assert!(engine.is_uploading());
    }

    #[test]
    fn cancel_on_empty_queue_is_noop() {
        let (mut engine, _) = engine_with(config(), MockTransport::default());
        engine.cancel_upload(None, true);
        engine.cancel_upload(None, true);
        assert!(drain(&mut engine).is_empty());
        assert_eq!(engine.stats(), Stats::default());
    }

    #[test]
    fn cancel_unknown_id_is_noop() {
        let (mut engine, _) = engine_with(config(), MockTransport::default());
        engine.add_files_to_queue(vec![file("a", 10)]);
        drain(&mut engine);
        engine.cancel_upload(Some(FileId::new(42)), true);
        assert!(drain(&mut engine).is_empty());
        assert_eq!(engine.stats().files_queued, 1);
    }

    #[test]
    fn unexpected_abort_is_reported_and_not_requeued() {
        let (mut engine, transport) =
            engine_with(config().with_requeue_on_error(true), MockTransport::default());
        engine.add_files_to_queue(vec![file("a", 10)]);
        engine.start_upload().unwrap();
        drain(&mut engine);

        transport.sender().aborted();
        let events = drain(&mut engine);
        assert_eq!(kinds(&events), vec!["upload_error", "upload_complete"]);
        match &events[0] {
            UploadEvent::UploadError { code, message, .. } => {
                assert_eq!(*code, UploadErrorCode::FileCancelled);
                assert_eq!(message, "Upload Aborted");
            }
            other => panic!("unexpected {other:?}"),
        }
        let stats = engine.stats();
        assert_eq!(stats.uploads_cancelled, 1);
        assert_eq!(stats.upload_errors, 1);
        assert_eq!(stats.files_queued, 0);
    }

    #[test]
    fn requeue_on_error_appends_fresh_record() {
        let (mut engine, transport) =
            engine_with(config().with_requeue_on_error(true), MockTransport::default());
        engine.add_files_to_queue(vec![file("a", 10), file("b", 10)]);
        engine.start_upload().unwrap();
        drain(&mut engine);
        let first = transport.sender();

        first.progress(4, 10);
        first.error(UploadErrorCode::UploadFailed, "reset", None);
        let events = drain(&mut engine);
        assert_eq!(
            kinds(&events),
            vec!["upload_progress", "upload_error", "upload_complete", "file_queued"]
        );
        assert_eq!(events[3].file().map(|f| f.id), Some(FileId::new(1)));

        let queued = engine.queued_files();
        let names: Vec<&str> = queued.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(queued[1].status, FileStatus::Queued);
        assert_eq!(queued[1].bytes_uploaded, 0);
        assert_queue_consistent(&engine);

        // Stale signals from the failed transfer do not touch the next one.
        engine.start_upload().unwrap();
        drain(&mut engine);
        first.success(200, "");
        assert!(drain(&mut engine).is_empty());
        assert_eq!(engine.active_file(), Some(FileId::new(2)));
    }

    #[test]
    fn requeue_includes_http_errors() {
        let (mut engine, transport) =
            engine_with(config().with_requeue_on_error(true), MockTransport::default());
        engine.add_files_to_queue(vec![file("a", 10)]);
        engine.start_upload().unwrap();
        drain(&mut engine);

        transport.sender().success(500, "boom");
        let events = drain(&mut engine);
        assert_eq!(
            kinds(&events),
            vec!["upload_error", "upload_complete", "file_queued"]
        );
        assert_eq!(engine.stats().files_queued, 1);
    }

    #[test]
    fn cancelled_upload_is_not_requeued() {
        let (mut engine, _) =
            engine_with(config().with_requeue_on_error(true), MockTransport::default());
        engine.add_files_to_queue(vec![file("a", 10)]);
        engine.start_upload().unwrap();
        drain(&mut engine);

        engine.cancel_upload(None, true);
        let events = drain(&mut engine);
        assert_eq!(kinds(&events), vec!["upload_error", "upload_complete"]);
        assert_eq!(engine.stats().files_queued, 0);
    }

    #[test]
    fn progress_after_cancel_is_ignored() {
        let transport = MockTransport {
            silent_abort: true,
            ..MockTransport::default()
        };
        let (mut engine, transport) = engine_with(config(), transport);
        engine.add_files_to_queue(vec![file("a", 10)]);
        engine.start_upload().unwrap();
        drain(&mut engine);

        engine.cancel_upload(None, false);
        transport.sender().progress(8, 10);
        assert!(drain(&mut engine).is_empty());
        assert_eq!(engine.file(&FileId::new(1)).unwrap().bytes_uploaded, 0);
    }

    #[test]
    fn observers_see_every_event() {
        let (mut engine, transport) = engine_with(config(), MockTransport::default());
        let seen = Arc::new(Mutex::new(Vec::<&'static str>::new()));
        let s = Arc::clone(&seen);
        engine.on_event(Box::new(move |event| {
            s.lock().unwrap().push(event.kind());
        }));

        engine.add_files_to_queue(vec![file("a", 10)]);
        engine.start_upload().unwrap();
        transport.sender().success(200, "");
        let events = drain(&mut engine);

        assert_eq!(*seen.lock().unwrap(), kinds(&events));
    }

    #[test]
    fn files_queued_tracks_queue_through_drain() {
        let (mut engine, transport) = engine_with(config(), MockTransport::default());
        engine.add_files_to_queue(vec![file("a", 1), file("b", 2), file("c", 3)]);
        assert_queue_consistent(&engine);

        let mut completed = 0;
        engine.start_upload().unwrap();
        loop {
            assert_queue_consistent(&engine);
            if let Some(event) = engine.try_next_event() {
                if let UploadEvent::UploadComplete { .. } = event {
                    completed += 1;
                    engine.start_upload().unwrap();
                }
                continue;
            }
            if !engine.is_uploading() {
                break;
            }
            transport.sender().success(200, "");
        }

        assert_eq!(completed, 3);
        assert_eq!(engine.stats().successful_uploads, 3);
        assert_eq!(engine.stats().files_queued, 0);
    }

    #[test]
    fn speed_history_holds_only_timed_samples() {
        let (mut engine, transport) = engine_with(config(), MockTransport::default());
        engine.add_files_to_queue(vec![file("a", 1000)]);
        engine.start_upload().unwrap();
        drain(&mut engine);

        let record = engine.file(&FileId::new(1)).unwrap();
        assert!(record.speed_history.is_empty());

        std::thread::sleep(std::time::Duration::from_millis(200));
        transport.sender().progress(500, 1000);
        drain(&mut engine);

        let record = engine.file(&FileId::new(1)).unwrap();
        assert_eq!(record.speed_history.len(), 1);
        assert!(record.current_speed > 0.0);
        assert_eq!(record.moving_average_speed, record.current_speed);

        std::thread::sleep(std::time::Duration::from_millis(50));
        transport.sender().progress(1000, 1000);
        transport.sender().success(200, "");
        let events = drain(&mut engine);

        let completed = events
            .iter()
            .find_map(|e| match e {
                UploadEvent::UploadSuccess { file, .. } => Some(file.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(completed.speed_history.len(), 2);
        assert_eq!(completed.percent_uploaded, 100.0);
        assert_eq!(count(&events, "upload_progress"), 2);
    }

    #[tokio::test]
    async fn next_event_waits_for_transport() {
        let (mut engine, transport) = engine_with(config(), MockTransport::default());
        engine.add_files_to_queue(vec![file("a", 10)]);
        engine.start_upload().unwrap();

        let signals = transport.sender();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            signals.progress(5, 10);
            signals.success(200, "done");
        });

        let mut events = Vec::new();
        while let Some(event) = engine.next_event().await {
            events.push(event);
        }
        assert_eq!(
            kinds(&events),
            vec![
                "file_queued",
                "file_dialog_complete",
                "upload_start",
                "upload_progress",
                "upload_progress",
                "upload_progress",
                "upload_success",
                "upload_complete"
            ]
        );
    }

    #[tokio::test]
    async fn next_event_is_none_when_idle() {
        let (mut engine, _) = engine_with(config(), MockTransport::default());
        assert!(engine.next_event().await.is_none());
    }
}
