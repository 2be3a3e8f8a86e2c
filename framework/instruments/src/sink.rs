use std::fs::File;
use std::path::Path;

use anyhow::Context;

/// Appends timestamped rows to a CSV time series file.
pub struct CsvSink {
    writer: csv::Writer<File>,
    last_timestamp_ms: i64,
}

impl CsvSink {
    /// Create the file and write the header, with `timestamp_ms` as the first column.
    pub fn create(path: &Path, columns: &[String]) -> anyhow::Result<Self> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        let mut header = Vec::with_capacity(columns.len() + 1);
        header.push("timestamp_ms");
        header.extend(columns.iter().map(String::as_str));
        writer.write_record(&header)?;
        writer.flush()?;

        Ok(Self {
            writer,
            last_timestamp_ms: i64::MIN,
        })
    }

    /// Write one row. Timestamps never go backwards, even if the wall clock does.
    pub fn write_row(&mut self, timestamp_ms: i64, values: &[String]) -> anyhow::Result<()> {
        let timestamp_ms = timestamp_ms.max(self.last_timestamp_ms);
        self.last_timestamp_ms = timestamp_ms;

        let mut record = Vec::with_capacity(values.len() + 1);
        record.push(timestamp_ms.to_string());
        record.extend(values.iter().cloned());
        self.writer.write_record(&record)?;
        // Rows must be visible to the summariser even if the process is killed mid run.
        self.writer.flush()?;
        Ok(())
    }
}
