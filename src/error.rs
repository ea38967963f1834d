use thiserror::Error;

/// Failures surfaced by the recording pipeline.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("a recording session is already active")]
    AlreadyRecording,

    #[error("no active recording session")]
    NotRecording,

    #[error("invalid frequency label '{0}'")]
    InvalidFrequency(String),

    /// Durable storage is out of space. Requires user action (free space or
    /// sync now), unlike a transient storage failure.
    #[error("durable storage is full")]
    StorageFull,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Map a storage-layer error, promoting SQLITE_FULL to its own variant.
pub(crate) fn storage_error(err: anyhow::Error) -> RecorderError {
    if is_storage_full(&err) {
        RecorderError::StorageFull
    } else {
        RecorderError::Storage(err)
    }
}

pub(crate) fn is_storage_full(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(inner, _))
                if inner.code == rusqlite::ErrorCode::DiskFull
        )
    })
}
