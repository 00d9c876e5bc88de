//! Optional flat append-only export of poll cycles.
//!
//! One record per successful cycle, columns fixed by the channel catalog so
//! the file stays rectangular regardless of which registers the device
//! happens to report.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use tracing::warn;

use crate::catalog::CHANNELS;
use crate::value::{CanonicalValueMap, Value};

pub struct CsvExporter {
    path: PathBuf,
    columns: Vec<String>,
}

impl CsvExporter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            columns: CHANNELS.iter().map(|c| c.slug()).collect(),
        }
    }

    /// Append one record. A header row is written when the file is created.
    /// Export failures are logged and swallowed; they never affect the cycle.
    pub fn append(&self, timestamp: NaiveDateTime, values: &CanonicalValueMap) {
        if let Err(err) = self.try_append(timestamp, values) {
            warn!(path = %self.path.display(), error = %err, "CSV export failed");
        }
    }

    fn try_append(
        &self,
        timestamp: NaiveDateTime,
        values: &CanonicalValueMap,
    ) -> std::io::Result<()> {
        let new_file = !self.path.exists();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if new_file {
            writeln!(file, "timestamp;{}", self.columns.join(";"))?;
        }

        let mut record = timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
        for column in &self.columns {
            record.push(';');
            match values.get(column) {
                Some(Value::Number(n)) => record.push_str(&n.to_string()),
                Some(Value::Text(s)) => record.push_str(s),
                Some(Value::Null) | None => {}
            }
        }
        writeln!(file, "{}", record)?;

        Ok(())
    }
}
