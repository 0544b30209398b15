//! Store errors.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("encoding stored column: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Failure on the write path.
    pub fn into_sink(self) -> bd_common::Error {
        bd_common::Error::SinkWrite(self.to_string())
    }

    /// Failure on the read path.
    pub fn into_read(self) -> bd_common::Error {
        match self {
            StoreError::Io(e) => bd_common::Error::Io(e),
            other => bd_common::Error::StoreRead(other.to_string()),
        }
    }
}
