//! The single compliant output channel
//!
//! Everything the logger emits goes through one [`LogSink`]. In production this
//! is [`TracingSink`], whose subscriber writes to stderr only; stdout belongs to
//! the host protocol's data stream.

use crate::{LoggingError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream a record was written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stderr,
}

/// Audit tags carried by every record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordTags {
    pub component: String,
    /// Set on records written under the protocol output discipline
    pub mcp_compliant: bool,
    pub output_stream: OutputStream,
}

/// One emitted log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: String,
    pub message: String,
    pub data: Option<Value>,
    pub correlation_id: Option<String>,
    pub session_id: Option<String>,
    pub tags: RecordTags,
}

impl LogRecord {
    /// `[LEVEL][category][correlation]` prefix, message and JSON data
    pub fn formatted(&self) -> String {
        let mut line = format!("[{}][{}]", self.level, self.category);
        if let Some(correlation_id) = &self.correlation_id {
            line.push('[');
            line.push_str(correlation_id);
            line.push(']');
        }
        line.push(' ');
        line.push_str(&self.message);
        if let Some(data) = &self.data {
            line.push(' ');
            line.push_str(&data.to_string());
        }
        line
    }
}

/// Destination of emitted records
pub trait LogSink: Send + Sync {
    fn write(&self, record: &LogRecord) -> Result<()>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Sink forwarding records to the `tracing` subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, record: &LogRecord) -> Result<()> {
        let line = record.formatted();
        let correlation_id = record.correlation_id.as_deref().unwrap_or_default();
        let session_id = record.session_id.as_deref().unwrap_or_default();

        macro_rules! emit {
            ($level:ident) => {
                tracing::$level!(
                    target: "flow",
                    category = %record.category,
                    correlation_id = %correlation_id,
                    session_id = %session_id,
                    component = %record.tags.component,
                    mcp_compliant = record.tags.mcp_compliant,
                    output_stream = "stderr",
                    "{}",
                    line
                )
            };
        }

        match record.level {
            LogLevel::Debug => emit!(debug),
            LogLevel::Info => emit!(info),
            LogLevel::Warn => emit!(warn),
            LogLevel::Error => emit!(error),
        }
        Ok(())
    }
}

/// In-memory sink capturing records for inspection
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    pub fn records_at(&self, level: LogLevel) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.level == level)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl LogSink for MemorySink {
    fn write(&self, record: &LogRecord) -> Result<()> {
        if self.failing.load(Ordering::Acquire) {
            return Err(LoggingError::Sink("sink unavailable".to_string()));
        }
        self.records.lock().push(record.clone());
        Ok(())
    }
}
