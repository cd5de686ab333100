use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tokio::sync::Notify;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use upqueue_engine::{SignalSender, TransferId, TransferRequest, Transport, TransportError};
use upqueue_protocol::constants::DEFAULT_MIME_TYPE;

use crate::HttpTransportError;

/// Minimum spacing between progress signals for one transfer.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

type InFlight = Arc<Mutex<HashMap<TransferId, CancellationToken>>>;

enum Outcome {
    Response { status: u16, body: String },
    AssumedSuccess,
}

/// [`Transport`] that uploads files with `reqwest`.
///
/// Each transfer runs as a task on the Tokio runtime that is current when
/// [`open`](Transport::open) is called.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    inflight: InFlight,
}

impl HttpTransport {
    /// Creates a transport with a default client.
    ///
    /// No overall request timeout is set since large uploads can take a
    /// long time; stalled connections are caught by the read timeout.
    pub fn new() -> Result<Self, HttpTransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .read_timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self::with_client(client))
    }

    /// Creates a transport around an existing client.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of transfers currently running.
    pub fn in_flight(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Transport for HttpTransport {
    fn open(&self, request: TransferRequest, signals: SignalSender) -> Result<(), TransportError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let transfer = request.transfer;
        let token = CancellationToken::new();
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(transfer, token.clone());

        let client = self.client.clone();
        let inflight = Arc::clone(&self.inflight);

        debug!(transfer = %transfer, url = %request.url, file = %request.file_name, "opening upload");
        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(transfer = %transfer, "upload aborted");
                    signals.aborted();
                }
                outcome = run_upload(&client, &request, &signals) => match outcome {
                    Ok(Outcome::Response { status, body }) => {
                        debug!(transfer = %transfer, status, "server responded");
                        signals.success(status, body);
                    }
                    Ok(Outcome::AssumedSuccess) => {
                        debug!(transfer = %transfer, "no response in time, assuming success");
                        signals.success(200, String::new());
                    }
                    Err(e) => {
                        warn!(transfer = %transfer, error = %e, "upload failed");
                        signals.error(e.upload_error_code(), e.to_string(), None);
                    }
                },
            }

            inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&transfer);
        });

        Ok(())
    }

    fn abort(&self, transfer: TransferId) -> Result<(), TransportError> {
        let token = self
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&transfer)
            .cloned()
            .ok_or(TransportError::UnknownTransfer(transfer))?;
        token.cancel();
        Ok(())
    }
}

async fn run_upload(
    client: &Client,
    request: &TransferRequest,
    signals: &SignalSender,
) -> Result<Outcome, HttpTransportError> {
    let file = tokio::fs::File::open(&request.path).await?;
    let total = file.metadata().await?.len();

    let body_sent = Arc::new(Notify::new());
    let stream = ReaderStream::new(file).inspect({
        let signals = signals.clone();
        let body_sent = Arc::clone(&body_sent);
        let mut sent: u64 = 0;
        let mut last_report: Option<Instant> = None;

        move |chunk| {
            let Ok(chunk) = chunk else {
                return;
            };
            sent += chunk.len() as u64;
            let finished = sent >= total;
            let due = last_report.is_none_or(|at| at.elapsed() >= PROGRESS_INTERVAL);
            if finished || due {
                last_report = Some(Instant::now());
                signals.progress(sent, total);
            }
            if finished {
                body_sent.notify_one();
            }
        }
    });

    let mime = if request.mime_type.is_empty() {
        DEFAULT_MIME_TYPE
    } else {
        request.mime_type.as_str()
    };
    let part = Part::stream_with_length(Body::wrap_stream(stream), total)
        .file_name(request.file_name.clone())
        .mime_str(mime)?;

    let mut form = Form::new();
    for (name, value) in &request.post_params {
        form = form.text(name.clone(), value.clone());
    }
    form = form.part(request.field_name.clone(), part);

    let mut builder = client.post(&request.url).multipart(form);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let send = builder.send();
    let response = match request.assume_success_after {
        None => send.await?,
        Some(wait) => {
            tokio::pin!(send);
            let silence = async {
                body_sent.notified().await;
                tokio::time::sleep(wait).await;
            };
            tokio::select! {
                response = &mut send => response?,
                _ = silence => return Ok(Outcome::AssumedSuccess),
            }
        }
    };

    let status = response.status().as_u16();
    let body = response.text().await?;
    trace!(transfer = %request.transfer, status, bytes = body.len(), "response read");
    Ok(Outcome::Response { status, body })
}
