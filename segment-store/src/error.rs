use thiserror::Error;

use crate::store::SegmentRole;

pub type Result<T> = std::result::Result<T, SegmentError>;

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("segment already exists for stream {stream} in role {role}")]
    AlreadyExists { stream: String, role: SegmentRole },
    #[error("segment not found: {segment}")]
    SegmentNotFound { segment: String },
    #[error("segment {segment} holds the active role and cannot be dropped")]
    NotFrozen { segment: String },
    #[error("segment {segment} corrupt: {detail}")]
    Corrupt { segment: String, detail: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SegmentError {
    /// Transient errors are worth a bounded retry; everything else is a
    /// state signal the caller must react to.
    pub fn is_transient(&self) -> bool {
        matches!(self, SegmentError::Io(_))
    }
}
