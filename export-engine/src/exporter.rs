// Copyright (c) James Kassemi, SC, US. All rights reserved.
use std::{
    fs::{self, File},
    io::Read,
    path::{Path, PathBuf},
    sync::Arc,
};

use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::Utc;
use core_types::{HourPeriod, Record, RecordKind};
use crc32fast::Hasher as Crc32;
use log::{info, warn};
use parking_lot::Mutex;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use segment_store::SegmentHandle;

use crate::{
    error::{ExportError, Result},
    export_log::{ExportArtifact, ExportLog},
};

/// Turns frozen segments into verified parquet artifacts.
pub struct Exporter {
    export_dir: PathBuf,
    full_verify: bool,
    schema: Arc<Schema>,
    log: Mutex<ExportLog>,
}

impl Exporter {
    pub fn new(export_dir: impl Into<PathBuf>, full_verify: bool) -> Result<Self> {
        let export_dir = export_dir.into();
        fs::create_dir_all(&export_dir)?;
        let log = ExportLog::load(export_dir.join("export_log.parquet"))?;
        let schema = Arc::new(Schema::new(vec![
            Field::new("ts_ns", DataType::Int64, false),
            Field::new("kind", DataType::Utf8, false),
            Field::new("payload", DataType::Utf8, false),
        ]));
        Ok(Self {
            export_dir,
            full_verify,
            schema,
            log: Mutex::new(log),
        })
    }

    /// The logged artifact for `(stream, period)`, if that export has
    /// already completed.
    pub fn completed(&self, stream: &str, period: &HourPeriod) -> Option<ExportArtifact> {
        self.log.lock().lookup(stream, period.start_ns).cloned()
    }

    /// Export one frozen segment as a parquet artifact for `period`.
    ///
    /// Idempotent: if the export log already holds an entry for this
    /// stream and period, the logged artifact is compared row-for-row
    /// against the segment. Matching contents return the logged
    /// artifact as a no-op; diverging contents are a verification
    /// error, so a later segment landing on an already-exported period
    /// is never silently discarded on the strength of the old
    /// artifact. Otherwise the artifact is written to a temp path,
    /// read back and verified against the segment, checksummed, and
    /// only then renamed into place and recorded in the log.
    pub fn export(&self, handle: &SegmentHandle, period: &HourPeriod) -> Result<ExportArtifact> {
        let stream = handle.stream().to_string();
        let file_name = format!("{}_{}.parquet", stream, period.file_stamp());
        if let Some(existing) = self.completed(&stream, period) {
            if existing.file_path.exists() {
                let records = handle.scan()?;
                return match self.verify_artifact(&existing.file_path, &records, &file_name, true)
                {
                    Ok(()) => {
                        info!(
                            "export {}/{}: already logged, contents match",
                            stream,
                            period.file_stamp()
                        );
                        Ok(existing)
                    }
                    Err(ExportError::Verification { artifact, .. }) => {
                        Err(ExportError::Verification {
                            artifact,
                            detail: "period already exported with different contents".to_string(),
                        })
                    }
                    Err(err) => Err(err),
                };
            }
            warn!(
                "export {}/{}: logged artifact file missing, re-exporting",
                stream,
                period.file_stamp()
            );
        }

        let records = handle.scan()?;
        let final_path = self.export_dir.join(&file_name);
        let tmp_path = self.export_dir.join(format!("{file_name}.tmp"));

        self.write_artifact(&tmp_path, &records)?;
        if let Err(err) = self.verify_artifact(&tmp_path, &records, &file_name, self.full_verify) {
            if let Err(rm_err) = fs::remove_file(&tmp_path) {
                warn!("failed to remove rejected artifact {tmp_path:?}: {rm_err}");
            }
            return Err(err);
        }
        let checksum = compute_checksum(&tmp_path)?;
        fs::rename(&tmp_path, &final_path)?;

        let artifact = ExportArtifact {
            stream: stream.clone(),
            period_start_ns: period.start_ns,
            period_end_ns: period.end_ns(),
            file_path: final_path,
            row_count: records.len() as u64,
            checksum,
            exported_ns: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        };
        self.log.lock().record(artifact.clone())?;
        info!(
            "export {}/{}: {} rows, crc32 {:08x}",
            stream,
            period.file_stamp(),
            artifact.row_count,
            artifact.checksum
        );
        Ok(artifact)
    }

    fn write_artifact(&self, path: &Path, records: &[Record]) -> Result<()> {
        let ts = Int64Array::from(records.iter().map(|r| r.ts_ns).collect::<Vec<_>>());
        let kinds =
            StringArray::from(records.iter().map(|r| r.kind.label()).collect::<Vec<_>>());
        let payloads =
            StringArray::from(records.iter().map(|r| r.payload.as_str()).collect::<Vec<_>>());
        let batch = RecordBatch::try_new(
            self.schema.clone(),
            vec![Arc::new(ts), Arc::new(kinds), Arc::new(payloads)],
        )?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let file = File::create(path)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(())
    }

    /// Read the artifact back and check it against the source records.
    /// Row count always; per-row contents when `full` is set.
    fn verify_artifact(
        &self,
        path: &Path,
        records: &[Record],
        artifact: &str,
        full: bool,
    ) -> Result<()> {
        let fail = |detail: String| ExportError::Verification {
            artifact: artifact.to_string(),
            detail,
        };
        let file = File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
        let mut row = 0usize;
        for batch in reader {
            let batch = batch?;
            let ts = batch
                .column(0)
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| fail("ts_ns column type".to_string()))?;
            let kinds = batch
                .column(1)
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| fail("kind column type".to_string()))?;
            let payloads = batch
                .column(2)
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| fail("payload column type".to_string()))?;
            for i in 0..batch.num_rows() {
                let expected = records
                    .get(row)
                    .ok_or_else(|| fail(format!("unexpected extra row {row}")))?;
                if full {
                    let kind = RecordKind::from_label(kinds.value(i))
                        .ok_or_else(|| fail(format!("row {row}: undefined kind label")))?;
                    if ts.value(i) != expected.ts_ns
                        || kind != expected.kind
                        || payloads.value(i) != expected.payload
                    {
                        return Err(fail(format!("row {row}: content mismatch")));
                    }
                }
                row += 1;
            }
        }
        if row != records.len() {
            return Err(fail(format!(
                "row count mismatch: artifact {}, segment {}",
                row,
                records.len()
            )));
        }
        Ok(())
    }
}

fn compute_checksum(path: &Path) -> Result<u32> {
    let mut file = File::open(path)?;
    let mut hasher = Crc32::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}
