// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Columnar export of frozen segments.
//!
//! Each frozen segment becomes one snappy-compressed parquet artifact
//! per stream and hour. Artifacts are verified by reading them back
//! before they are made visible, and every completed export is recorded
//! in a durable export log keyed by `(stream, period start)`, which is
//! what makes re-running an export a no-op.

mod error;
mod export_log;
mod exporter;

pub use error::{ExportError, Result};
pub use export_log::{ExportArtifact, ExportLog};
pub use exporter::Exporter;
