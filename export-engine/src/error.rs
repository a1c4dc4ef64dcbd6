use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExportError>;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error(transparent)]
    Segment(#[from] segment_store::SegmentError),
    #[error("artifact {artifact} failed verification: {detail}")]
    Verification { artifact: String, detail: String },
    #[error("export log {path:?} corrupt: {detail}")]
    LogCorrupt { path: PathBuf, detail: String },
}

impl ExportError {
    pub fn is_transient(&self) -> bool {
        match self {
            ExportError::Io(_) => true,
            ExportError::Segment(err) => err.is_transient(),
            _ => false,
        }
    }
}
