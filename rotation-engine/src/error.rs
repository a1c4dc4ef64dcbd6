use thiserror::Error;

pub type Result<T> = std::result::Result<T, RotationError>;

#[derive(Debug, Error)]
pub enum RotationError {
    #[error("stream {stream}: writer did not acknowledge buffering in time")]
    AckTimeout { stream: String },
    #[error("stream {stream}: buffer drain did not complete in time")]
    DrainTimeout { stream: String },
    #[error("stream {stream}: export attempt timed out")]
    ExportTimeout { stream: String },
    #[error("stream {stream}: rotation cycle exceeded its deadline")]
    Stalled { stream: String },
    #[error("export task failed: {0}")]
    ExportTask(String),
    #[error("drain task failed: {0}")]
    DrainTask(String),
    #[error(transparent)]
    Export(#[from] export_engine::ExportError),
    #[error(transparent)]
    Segment(#[from] segment_store::SegmentError),
    #[error(transparent)]
    Writer(#[from] stream_writer::WriterError),
}

impl RotationError {
    /// Whether another export attempt within the same cycle is worth it.
    /// Verification mismatches get the full attempt budget before the
    /// cycle escalates; the frozen segment is preserved either way.
    pub(crate) fn export_retryable(&self) -> bool {
        match self {
            RotationError::ExportTimeout { .. } => true,
            RotationError::Export(err) => {
                err.is_transient() || matches!(err, export_engine::ExportError::Verification { .. })
            }
            _ => false,
        }
    }
}
