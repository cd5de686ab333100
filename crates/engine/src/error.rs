//! Engine error types.

/// Errors returned directly by engine operations.
///
/// Runtime failures (rejected files, HTTP errors, cancellations) are
/// reported as events instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no upload URL configured; set one before starting an upload")]
    MissingUploadUrl,
}
