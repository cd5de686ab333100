mod config;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use upqueue_engine::{FileId, UploadEngine, UploadEvent};
use upqueue_http::HttpTransport;

use config::CliConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "upqueue")]
#[command(about = "Upload files to an HTTP endpoint one at a time", version)]
struct Args {
    /// Config file (default: ~/.config/upqueue/upqueue.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Destination URL.
    #[arg(long)]
    url: Option<String>,

    /// Multipart field name for the file.
    #[arg(long)]
    field: Option<String>,

    /// Per-file size limit, e.g. "50 MB".
    #[arg(long)]
    size_limit: Option<String>,

    #[arg(long)]
    queue_limit: Option<u64>,

    /// Maximum successful uploads (0 = unlimited).
    #[arg(long)]
    upload_limit: Option<u64>,

    /// Extra request header, repeatable.
    #[arg(long = "header", value_name = "K=V", value_parser = parse_key_value)]
    headers: Vec<(String, String)>,

    /// Extra form field, repeatable.
    #[arg(long = "param", value_name = "K=V", value_parser = parse_key_value)]
    params: Vec<(String, String)>,

    #[arg(long)]
    requeue_on_error: bool,

    /// Attempts per file with --requeue-on-error.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Print events as JSON lines.
    #[arg(long)]
    json: bool,

    /// Files or directories to upload.
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected K=V, got `{s}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Merges command-line flags over file settings.
fn apply_args(mut config: CliConfig, args: &Args) -> CliConfig {
    let mut uploader = config.uploader;
    if let Some(url) = &args.url {
        uploader.upload_url = Some(url.clone());
    }
    if let Some(field) = &args.field {
        uploader.file_post_name = field.clone();
    }
    if let Some(limit) = &args.size_limit {
        uploader.file_size_limit = limit.clone();
    }
    if let Some(limit) = args.queue_limit {
        uploader.file_queue_limit = limit;
    }
    if let Some(limit) = args.upload_limit {
        uploader.file_upload_limit = limit;
    }
    for (k, v) in &args.headers {
        uploader.http_headers.insert(k.clone(), v.clone());
    }
    for (k, v) in &args.params {
        uploader.post_params.insert(k.clone(), v.clone());
    }
    if args.requeue_on_error {
        uploader.requeue_on_error = true;
    }
    config.uploader = uploader;

    if let Some(n) = args.max_attempts {
        config.max_attempts = n;
    }
    config.max_attempts = config.max_attempts.max(1);
    config
}

fn describe(event: &UploadEvent) -> String {
    match event {
        UploadEvent::FileQueued { file } => format!("{} ({} bytes)", file.name(), file.size()),
        UploadEvent::FileQueueError {
            file,
            code,
            message,
        } => format!("{}: {code}: {message}", file.name()),
        UploadEvent::FileDialogComplete {
            files_selected,
            files_queued,
            total_in_queue,
        } => format!("{files_queued}/{files_selected} queued, {total_in_queue} in queue"),
        UploadEvent::UploadStart { file } => file.name().to_string(),
        UploadEvent::UploadProgress {
            file,
            bytes_complete,
            bytes_total,
        } => format!(
            "{} {bytes_complete}/{bytes_total} ({:.0}%, {:.1} KB/s, {:.0}s left)",
            file.name(),
            file.percent_uploaded,
            file.moving_average_speed / 8.0 / 1024.0,
            file.time_remaining
        ),
        UploadEvent::UploadSuccess {
            file,
            response_code,
            ..
        } => format!("{} ({response_code})", file.name()),
        UploadEvent::UploadError {
            file,
            code,
            message,
            ..
        } => format!("{}: {code}: {message}", file.name()),
        UploadEvent::UploadComplete { file } => format!("{} [{}]", file.name(), file.status),
    }
}

fn print_event(event: &UploadEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        println!("{:<22} {}", event.kind(), describe(event));
    }
    Ok(())
}

/// Cancels queued files that have used up their attempts.
fn drop_exhausted(engine: &mut UploadEngine, attempts: &HashMap<FileId, u32>, max_attempts: u32) {
    let exhausted: Vec<FileId> = engine
        .queued_files()
        .iter()
        .filter(|f| attempts.get(&f.id).is_some_and(|n| *n >= max_attempts))
        .map(|f| f.id)
        .collect();
    for id in exhausted {
        tracing::info!(file = %id, max_attempts, "giving up after repeated failures");
        engine.cancel_upload(Some(id), false);
    }
}

/// Tracks which files never made it.
///
/// A file that fails and later succeeds on a retry is not a failure.
#[derive(Debug, Default)]
struct Outcome {
    failed: HashSet<FileId>,
    rejected: usize,
}

impl Outcome {
    fn observe(&mut self, event: &UploadEvent) {
        match event {
            UploadEvent::FileQueueError { .. } => self.rejected += 1,
            UploadEvent::UploadError { file, .. } if file.id.is_assigned() => {
                self.failed.insert(file.id);
            }
            UploadEvent::UploadSuccess { file, .. } => {
                self.failed.remove(&file.id);
            }
            _ => {}
        }
    }

    fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.rejected == 0
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = apply_args(CliConfig::load(args.config.as_deref())?, &args);

    let files = upqueue_transfer::collect_files(&args.paths).context("reading input files")?;
    tracing::info!(count = files.len(), "files found");

    let transport = Arc::new(HttpTransport::new().context("creating HTTP client")?);
    let max_attempts = config.max_attempts;
    let mut engine = UploadEngine::new(config.uploader, transport);

    engine.add_files_to_queue(files);
    engine.start_upload()?;

    let mut attempts: HashMap<FileId, u32> = HashMap::new();
    let mut outcome = Outcome::default();
    while let Some(event) = engine.next_event().await {
        print_event(&event, args.json)?;
        outcome.observe(&event);
        match &event {
            UploadEvent::UploadStart { file } => {
                *attempts.entry(file.id).or_default() += 1;
            }
            UploadEvent::UploadComplete { .. } => {
                drop_exhausted(&mut engine, &attempts, max_attempts);
                engine.start_upload()?;
            }
            _ => {}
        }
    }

    let stats = engine.stats();
    if args.json {
        println!("{}", serde_json::to_string(&stats)?);
    } else {
        println!(
            "done: {} uploaded, {} failed, {} cancelled, {} rejected",
            stats.successful_uploads,
            stats.upload_errors,
            stats.uploads_cancelled,
            stats.queue_errors
        );
    }

    if !outcome.is_clean() {
        anyhow::bail!(
            "{} file(s) not uploaded, {} rejected",
            outcome.failed.len(),
            outcome.rejected
        );
    }
    Ok(())
}
