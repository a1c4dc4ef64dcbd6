use segment_store::SegmentError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WriterError>;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("buffer overflow at capacity {capacity}; writer halted")]
    BufferOverflow { capacity: usize },
    #[error("writer halted; no further submissions accepted")]
    Halted,
    #[error(transparent)]
    Segment(#[from] SegmentError),
}
