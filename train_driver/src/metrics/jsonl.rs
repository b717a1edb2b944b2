//! Append-only line-delimited JSON metric stream.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::record::MetricRecord;
use super::sink::{group_by_step, Sink, SinkError};

/// Writes one line per (publish batch, step):
/// `{"step": 100, "episode/score": 1.5, "train/loss": 0.3}`.
///
/// Image payloads are skipped; a step whose records are all images
/// produces no line.
pub struct JsonlSink {
    name: String,
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlSink {
    /// Open (or create) `path` for appending. Parent directories are created.
    pub fn open(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            name: name.into(),
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn line_for(step: u64, records: &[&MetricRecord]) -> Result<Option<Map<String, Value>>, SinkError> {
        let mut line = Map::new();
        line.insert("step".to_string(), Value::from(step));
        let mut fields = 0usize;
        for record in records {
            if !record.value.is_textual() {
                log::debug!("jsonl: skipping image payload '{}'", record.full_key());
                continue;
            }
            line.insert(record.full_key(), serde_json::to_value(&record.value)?);
            fields += 1;
        }
        Ok((fields > 0).then_some(line))
    }
}

impl Sink for JsonlSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, batch: &[MetricRecord]) -> Result<(), SinkError> {
        for (step, records) in group_by_step(batch) {
            if let Some(line) = Self::line_for(step, &records)? {
                serde_json::to_writer(&mut self.writer, &line)?;
                self.writer.write_all(b"\n")?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}
