//! JSONL telemetry recorder with file rotation

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::TelemetryConfig;
use crate::error::Result;
use crate::ftms::protocol::TelemetryRecord;

const FILE_PREFIX: &str = "telemetry_";
const FILE_EXTENSION: &str = "jsonl";

/// One line of the log: timestamp plus the fields present in the record
#[derive(Serialize)]
struct LogLine<'a> {
    timestamp: String,
    #[serde(flatten)]
    record: &'a TelemetryRecord,
}

/// Writes telemetry records as JSON Lines
///
/// A new file is started after `max_records_per_file` records, and only
/// the newest `max_files_to_keep` files are kept in `log_dir`.
pub struct TelemetryLogger {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    log_interval: chrono::Duration,
    writer: Option<BufWriter<File>>,
    current_path: Option<PathBuf>,
    records_in_file: usize,
    files_opened: u64,
    last_written: Option<DateTime<Utc>>,
}

impl TelemetryLogger {
    /// Create a logger, creating `log_dir` if needed
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created.
    pub fn new(config: &TelemetryConfig) -> Result<Self> {
        let dir = PathBuf::from(&config.log_dir);
        fs::create_dir_all(&dir)?;
        info!("Telemetry log directory: {}", dir.display());

        Ok(Self {
            dir,
            max_records_per_file: config.max_records_per_file,
            max_files_to_keep: config.max_files_to_keep,
            log_interval: chrono::Duration::milliseconds(config.log_interval_ms as i64),
            writer: None,
            current_path: None,
            records_in_file: 0,
            files_opened: 0,
            last_written: None,
        })
    }

    /// Record `record` with the current time
    ///
    /// Returns `false` when the record was skipped by the log interval.
    pub fn log(&mut self, record: &TelemetryRecord) -> Result<bool> {
        self.log_at(record, Utc::now())
    }

    /// Record `record` as captured at `at`
    pub fn log_at(&mut self, record: &TelemetryRecord, at: DateTime<Utc>) -> Result<bool> {
        if let Some(last) = self.last_written {
            if at - last < self.log_interval {
                return Ok(false);
            }
        }

        if self.writer.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate(at)?;
        }

        let line = serde_json::to_string(&LogLine {
            timestamp: at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            record,
        })?;

        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{}", line)?;
        }
        self.records_in_file += 1;
        self.last_written = Some(at);
        Ok(true)
    }

    /// Flush buffered lines to disk
    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Path of the file currently being written
    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    fn rotate(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.flush()?;
        self.writer = None;

        let path = self.dir.join(format!(
            "{}{}_{:04}.{}",
            FILE_PREFIX,
            at.format("%Y%m%d_%H%M%S"),
            self.files_opened,
            FILE_EXTENSION
        ));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Opened telemetry file {}", path.display());

        self.writer = Some(BufWriter::new(file));
        self.current_path = Some(path);
        self.records_in_file = 0;
        self.files_opened += 1;

        self.prune()
    }

    /// Delete the oldest log files beyond `max_files_to_keep`
    fn prune(&self) -> Result<()> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_telemetry_file(path))
            .collect();

        if files.len() <= self.max_files_to_keep {
            return Ok(());
        }

        // Names start with a timestamp, so lexical order is age order
        files.sort();
        let excess = files.len() - self.max_files_to_keep;
        for path in files.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed old telemetry file {}", path.display()),
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        Ok(())
    }
}

impl Drop for TelemetryLogger {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("Failed to flush telemetry log: {}", e);
        }
    }
}

fn is_telemetry_file(path: &Path) -> bool {
    let name_matches = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with(FILE_PREFIX))
        .unwrap_or(false);
    let extension_matches = path.extension().and_then(|e| e.to_str()) == Some(FILE_EXTENSION);
    name_matches && extension_matches
}
