use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

const MAX_LOG_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One request-log record, persisted as JSONL and served from `/logs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.into(),
            message: message.into(),
            provider: None,
            model: None,
            context: None,
        }
    }

    pub fn with_route(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.model = Some(model.into());
        self
    }

    pub fn with_context(mut self, ctx: serde_json::Value) -> Self {
        self.context = Some(ctx);
        self
    }
}

/// Ring-buffer request logger that persists to JSONL.
pub struct Logger {
    buffer: VecDeque<LogEntry>,
    writer: Option<BufWriter<File>>,
}

fn replay_file(path: &Path) -> std::io::Result<VecDeque<LogEntry>> {
    let mut buffer = VecDeque::with_capacity(MAX_LOG_ENTRIES);
    if !path.exists() {
        return Ok(buffer);
    }
    let reader = BufReader::new(File::open(path)?);
    for line in reader.lines() {
        let Ok(entry) = serde_json::from_str::<LogEntry>(&line?) else {
            // Corrupt or foreign lines in the log file are skipped.
            continue;
        };
        if buffer.len() == MAX_LOG_ENTRIES {
            buffer.pop_front();
        }
        buffer.push_back(entry);
    }
    Ok(buffer)
}

impl Logger {
    /// In-memory only. Used when no log file is configured.
    pub fn in_memory() -> Self {
        Self {
            buffer: VecDeque::with_capacity(MAX_LOG_ENTRIES),
            writer: None,
        }
    }

    pub fn with_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let buffer = replay_file(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            buffer,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn log(&mut self, entry: LogEntry) {
        if let (Some(writer), Ok(json)) = (self.writer.as_mut(), serde_json::to_string(&entry)) {
            // A full disk must not take the gateway down with it.
            let _ = writeln!(writer, "{json}");
            let _ = writer.flush();
        }
        if self.buffer.len() == MAX_LOG_ENTRIES {
            self.buffer.pop_front();
        }
        self.buffer.push_back(entry);
    }

    /// Most recent entries first.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.buffer.iter().rev().take(limit).cloned().collect()
    }
}

#[derive(Clone)]
pub struct SharedLogger(Arc<Mutex<Logger>>);

impl SharedLogger {
    pub fn new(file_path: Option<&Path>) -> std::io::Result<Self> {
        let logger = match file_path {
            Some(path) => Logger::with_file(path)?,
            None => Logger::in_memory(),
        };
        Ok(Self(Arc::new(Mutex::new(logger))))
    }

    pub fn log(&self, entry: LogEntry) {
        if let Ok(mut logger) = self.0.lock() {
            logger.log(entry);
        }
    }

    pub fn info(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Info, component, message));
    }

    pub fn warn(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Warn, component, message));
    }

    pub fn error(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Error, component, message));
    }

    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.0.lock().map(|l| l.recent(limit)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ring_buffer_and_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("requests.jsonl");

        let logger = SharedLogger::new(Some(&path)).unwrap();
        logger.log(
            LogEntry::new(LogLevel::Info, "gateway", "forwarded")
                .with_route("openrouter", "claude-sonnet-4"),
        );
        logger.warn("gateway", "upstream slow");

        let recent = logger.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].provider.as_deref(), Some("openrouter"));

        // Re-open and confirm the entries came back from disk.
        let reopened = SharedLogger::new(Some(&path)).unwrap();
        assert_eq!(reopened.recent(10).len(), 2);
    }

    #[test]
    fn test_in_memory_logger() {
        let logger = SharedLogger::new(None).unwrap();
        logger.info("test", "entry");
        assert_eq!(logger.recent(10).len(), 1);
    }
}
