use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("event log has no time anchor; call set_time() first")]
    NotAnchored,

    #[error("event log has no output attached")]
    NoOutput,

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("columnar store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("malformed flat log at row {row}: {reason}")]
    Malformed { row: usize, reason: String },
}
