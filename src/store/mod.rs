//! Offline buffer for telemetry records.
//!
//! Records that cannot be delivered immediately are appended to a
//! line-delimited JSON file and drained later by the flush coordinator.
//! The store is deliberately forgiving: appends never fail the caller,
//! unreadable lines are skipped during reads, and clearing an absent
//! file is a no-op.
//!
//! The store assumes a single-writer discipline: the process never
//! overlaps an append/flush cycle with itself. The flush coordinator
//! enforces this with its in-flight guard.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Identifies the reporting client in heartbeat payloads.
pub const PLUGIN_ID: &str = concat!("pulse-cli/", env!("CARGO_PKG_VERSION"));

/// One unit of tracked activity.
///
/// The payload is an opaque JSON object; the store never inspects its
/// fields, so any shape the backend accepts can be buffered. Once
/// appended, a record is immutable until removed by a confirmed flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelemetryRecord(pub Value);

impl TelemetryRecord {
    /// Wraps an arbitrary JSON value as a record.
    pub fn new(value: Value) -> Self {
        Self(value)
    }
}

impl From<Heartbeat> for TelemetryRecord {
    fn from(beat: Heartbeat) -> Self {
        let value = serde_json::to_value(&beat).unwrap_or_else(|_| Value::Null);
        Self(value)
    }
}

/// An ordered batch of records read from the store, oldest first.
pub type RecordBatch = Vec<TelemetryRecord>;

/// The standard activity payload produced by `pulse beat`.
///
/// Field names follow the backend's camelCase convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    /// Unique record id.
    pub id: String,

    /// File or task the activity applies to.
    pub entity: String,

    /// Activity category (e.g., "coding", "building").
    pub category: String,

    /// Whether the activity wrote to the entity.
    pub is_write: bool,

    /// Project name, when a repository was detected.
    pub project: Option<String>,

    /// Git branch, when available.
    pub branch: Option<String>,

    /// URL of the repository's origin remote, when configured.
    pub repo_url: Option<String>,

    /// Machine hostname.
    pub hostname: Option<String>,

    /// Stable machine identifier from config.
    pub machine_id: Option<String>,

    /// Identifies the reporting client and version.
    pub plugin: String,

    /// When the activity was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl Heartbeat {
    /// Creates a heartbeat for the given entity with defaults filled in.
    ///
    /// Repository and machine fields start empty; callers enrich them
    /// when the information is available.
    pub fn new(entity: &str, category: &str, is_write: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entity: entity.to_string(),
            category: category.to_string(),
            is_write,
            project: None,
            branch: None,
            repo_url: None,
            hostname: hostname::get().ok().and_then(|h| h.into_string().ok()),
            machine_id: None,
            plugin: PLUGIN_ID.to_string(),
            recorded_at: Utc::now(),
        }
    }
}

/// Append-only offline buffer backed by a single JSONL file.
pub struct LocalRecordStore {
    /// Path of the backing file.
    path: PathBuf,
}

impl LocalRecordStore {
    /// Creates a store over the given file path.
    ///
    /// The file itself is created lazily on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record as a line of JSON.
    ///
    /// Creates the file and its parent directories if absent. I/O
    /// errors are logged and swallowed; buffering is best-effort and
    /// must never take down the caller.
    pub fn append(&self, record: &TelemetryRecord) {
        if let Err(e) = self.try_append(record) {
            tracing::warn!("Failed to buffer record to {:?}: {}", self.path, e);
        }
    }

    fn try_append(&self, record: &TelemetryRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create store directory")?;
        }

        let mut line =
            serde_json::to_string(&record.0).context("Failed to serialize record")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open store file")?;
        file.write_all(line.as_bytes())
            .context("Failed to append record")?;

        Ok(())
    }

    /// Reads the full store contents, oldest first.
    ///
    /// Blank and unparseable lines are skipped so a single corrupt
    /// entry never blocks the records around it. A missing or
    /// unreadable file yields an empty batch.
    pub fn read_all(&self) -> RecordBatch {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!("Failed to open store {:?}: {}", self.path, e);
                return Vec::new();
            }
        };

        let reader = BufReader::new(file);
        let mut batch = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!("Failed to read store line {}: {}", line_num + 1, e);
                    break;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<Value>(&line) {
                Ok(value) => batch.push(TelemetryRecord(value)),
                Err(e) => {
                    tracing::debug!("Skipping unparseable line {}: {}", line_num + 1, e);
                    continue;
                }
            }
        }

        batch
    }

    /// Number of parseable records currently buffered.
    pub fn len(&self) -> usize {
        self.read_all().len()
    }

    /// True when no parseable records are buffered.
    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deletes the backing file.
    ///
    /// Succeeds when the file is already absent.
    pub fn clear(&self) -> std::io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
