// Copyright (c) James Kassemi, SC, US. All rights reserved.
use std::{
    collections::HashMap,
    fs::{self, File},
    path::{Path, PathBuf},
    sync::Arc,
};

use arrow::array::{Int64Array, StringArray, UInt32Array, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use crate::error::{ExportError, Result};

/// One completed export, as recorded in the log.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub stream: String,
    pub period_start_ns: i64,
    pub period_end_ns: i64,
    pub file_path: PathBuf,
    pub row_count: u64,
    pub checksum: u32,
    pub exported_ns: i64,
}

/// Durable record of completed exports, keyed by `(stream, period
/// start)`. Backed by a single parquet file that is rewritten whole on
/// each update and swapped in atomically.
pub struct ExportLog {
    path: PathBuf,
    schema: Arc<Schema>,
    entries: HashMap<(String, i64), ExportArtifact>,
}

impl ExportLog {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let schema = Arc::new(Schema::new(vec![
            Field::new("stream", DataType::Utf8, false),
            Field::new("period_start_ns", DataType::Int64, false),
            Field::new("period_end_ns", DataType::Int64, false),
            Field::new("file_path", DataType::Utf8, false),
            Field::new("row_count", DataType::UInt64, false),
            Field::new("checksum", DataType::UInt32, false),
            Field::new("exported_ns", DataType::Int64, false),
        ]));
        let entries = if path.exists() {
            read_entries(&path)?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            schema,
            entries,
        })
    }

    pub fn lookup(&self, stream: &str, period_start_ns: i64) -> Option<&ExportArtifact> {
        self.entries.get(&(stream.to_string(), period_start_ns))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a completed export and persist the log before returning.
    /// The export is not considered done until this succeeds.
    pub fn record(&mut self, artifact: ExportArtifact) -> Result<()> {
        self.entries.insert(
            (artifact.stream.clone(), artifact.period_start_ns),
            artifact,
        );
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut rows: Vec<&ExportArtifact> = self.entries.values().collect();
        rows.sort_by(|a, b| {
            (&a.stream, a.period_start_ns).cmp(&(&b.stream, b.period_start_ns))
        });

        let streams = StringArray::from(rows.iter().map(|r| r.stream.as_str()).collect::<Vec<_>>());
        let starts = Int64Array::from(rows.iter().map(|r| r.period_start_ns).collect::<Vec<_>>());
        let ends = Int64Array::from(rows.iter().map(|r| r.period_end_ns).collect::<Vec<_>>());
        let paths = StringArray::from(
            rows.iter()
                .map(|r| r.file_path.to_string_lossy().into_owned())
                .collect::<Vec<_>>(),
        );
        let counts = UInt64Array::from(rows.iter().map(|r| r.row_count).collect::<Vec<_>>());
        let checksums = UInt32Array::from(rows.iter().map(|r| r.checksum).collect::<Vec<_>>());
        let exported = Int64Array::from(rows.iter().map(|r| r.exported_ns).collect::<Vec<_>>());

        let batch = RecordBatch::try_new(
            self.schema.clone(),
            vec![
                Arc::new(streams),
                Arc::new(starts),
                Arc::new(ends),
                Arc::new(paths),
                Arc::new(counts),
                Arc::new(checksums),
                Arc::new(exported),
            ],
        )?;

        let tmp = self.path.with_extension("parquet.tmp");
        let file = File::create(&tmp)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
        writer.write(&batch)?;
        writer.close()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<HashMap<(String, i64), ExportArtifact>> {
    let corrupt = |detail: &str| ExportError::LogCorrupt {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    };
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let mut entries = HashMap::new();
    for batch in reader {
        let batch = batch?;
        let streams = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| corrupt("stream column type"))?;
        let starts = batch
            .column(1)
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| corrupt("period_start_ns column type"))?;
        let ends = batch
            .column(2)
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| corrupt("period_end_ns column type"))?;
        let paths = batch
            .column(3)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| corrupt("file_path column type"))?;
        let counts = batch
            .column(4)
            .as_any()
            .downcast_ref::<UInt64Array>()
            .ok_or_else(|| corrupt("row_count column type"))?;
        let checksums = batch
            .column(5)
            .as_any()
            .downcast_ref::<UInt32Array>()
            .ok_or_else(|| corrupt("checksum column type"))?;
        let exported = batch
            .column(6)
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| corrupt("exported_ns column type"))?;
        for i in 0..batch.num_rows() {
            let artifact = ExportArtifact {
                stream: streams.value(i).to_string(),
                period_start_ns: starts.value(i),
                period_end_ns: ends.value(i),
                file_path: PathBuf::from(paths.value(i)),
                row_count: counts.value(i),
                checksum: checksums.value(i),
                exported_ns: exported.value(i),
            };
            entries.insert((artifact.stream.clone(), artifact.period_start_ns), artifact);
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(stream: &str, start: i64) -> ExportArtifact {
        ExportArtifact {
            stream: stream.to_string(),
            period_start_ns: start,
            period_end_ns: start + 3_600_000_000_000,
            file_path: PathBuf::from(format!("{stream}_{start}.parquet")),
            row_count: 42,
            checksum: 0xDEAD_BEEF,
            exported_ns: 1,
        }
    }

    #[test]
    fn record_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = ExportLog::load(dir.path().join("export_log.parquet")).unwrap();
        assert!(log.is_empty());
        log.record(artifact("btc", 100)).unwrap();
        log.record(artifact("eth", 100)).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.lookup("btc", 100).unwrap().row_count, 42);
        assert!(log.lookup("btc", 200).is_none());
    }

    #[test]
    fn entries_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export_log.parquet");
        {
            let mut log = ExportLog::load(&path).unwrap();
            log.record(artifact("btc", 100)).unwrap();
            log.record(artifact("btc", 3_700)).unwrap();
        }
        let log = ExportLog::load(&path).unwrap();
        assert_eq!(log.len(), 2);
        let entry = log.lookup("btc", 100).unwrap();
        assert_eq!(entry.checksum, 0xDEAD_BEEF);
        assert_eq!(entry.file_path, PathBuf::from("btc_100.parquet"));
    }

    #[test]
    fn rerecording_a_period_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = ExportLog::load(dir.path().join("export_log.parquet")).unwrap();
        log.record(artifact("btc", 100)).unwrap();
        let mut updated = artifact("btc", 100);
        updated.row_count = 99;
        log.record(updated).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.lookup("btc", 100).unwrap().row_count, 99);
    }
}
