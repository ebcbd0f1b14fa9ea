use std::io;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),
    #[error("version not found: {id}")]
    VersionNotFound { id: String },
    #[error("invalid cell address: {0}")]
    InvalidCellAddress(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T, E = HistoryError> = std::result::Result<T, E>;
