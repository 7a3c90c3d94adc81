use thiserror::Error;

/// Upload-time validation failures.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Extension outside the supported set. Callers skip the file, they do
    /// not fail the request.
    #[error("unsupported file extension: {0}")]
    UnsupportedExtension(String),

    /// The file claimed a supported extension but could not be decoded.
    #[error("invalid or corrupted audio file: {0}")]
    CorruptAudio(String),
}

/// Tenant store failures. These propagate to the caller.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("tenant table does not exist: {0}")]
    MissingTenantTable(String),

    #[error("invalid tenant key: {0}")]
    InvalidTenantKey(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Language pipeline failures. A failed pass aborts the remaining passes
/// for that job; there are no retries and no partial results.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("correction pass failed: {0}")]
    Correction(String),

    #[error("translation pass failed: {0}")]
    Translation(String),

    #[error("analysis pass failed: {0}")]
    Analysis(String),
}
