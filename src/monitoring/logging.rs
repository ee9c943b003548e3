//! Structured, redacting logging for interop events.
//!
//! Entries are masked, kept in a bounded buffer for inspection and forwarded
//! to `tracing`.

use crate::context::Context;
use crate::core::{lock_state, now, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Keys whose values never reach the log sink.
pub const REDACTED_KEYS: [&str; 3] = ["payload", "data", "details"];

/// Replacement for redacted values.
pub const REDACTED: &str = "[redacted]";

/// Log level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level (most verbose)
    Trace = 0,
    /// Debug level
    Debug = 1,
    /// Info level
    Info = 2,
    /// Warning level
    Warn = 3,
    /// Error level
    Error = 4,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// A structured log entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    /// Timestamp
    pub timestamp: Timestamp,
    /// Log level
    pub level: LogLevel,
    /// Message
    pub message: String,
    /// Structured fields (already masked)
    pub fields: Map<String, Value>,
}

impl LogEntry {
    /// Create a new log entry.
    pub fn new(level: LogLevel, message: &str) -> Self {
        Self {
            timestamp: now(),
            level,
            message: message.to_string(),
            fields: Map::new(),
        }
    }

    /// Add a field. Sensitive keys are masked on the way in.
    pub fn with_field(mut self, key: &str, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            let masked = if is_redacted_key(key) {
                Value::String(REDACTED.to_string())
            } else {
                mask_sensitive(v)
            };
            self.fields.insert(key.to_string(), masked);
        }
        self
    }

    /// Format as JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Format as text.
    pub fn to_text(&self) -> String {
        if self.fields.is_empty() {
            format!("{} {} {}", self.timestamp, self.level, self.message)
        } else {
            format!(
                "{} {} {} {}",
                self.timestamp,
                self.level,
                self.message,
                Value::Object(self.fields.clone())
            )
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text
    Text,
    /// JSON
    Json,
}

/// Logger configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Minimum log level
    pub level: LogLevel,
    /// Output format
    pub format: LogFormat,
    /// Entries kept for inspection
    pub max_buffer: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
            max_buffer: 1000,
        }
    }
}

/// Redacting log sink shared by the agent and the bridges.
pub struct InteropLogger {
    config: LoggerConfig,
    buffer: Mutex<VecDeque<LogEntry>>,
}

impl InteropLogger {
    /// Create a new logger.
    pub fn new(config: LoggerConfig) -> Self {
        Self {
            config,
            buffer: Mutex::new(VecDeque::new()),
        }
    }

    /// Log an entry.
    pub fn log(&self, entry: LogEntry) {
        if entry.level < self.config.level {
            return;
        }

        let rendered = match self.config.format {
            LogFormat::Text => entry.to_text(),
            LogFormat::Json => entry.to_json(),
        };
        match entry.level {
            LogLevel::Trace => tracing::trace!("{}", rendered),
            LogLevel::Debug => tracing::debug!("{}", rendered),
            LogLevel::Info => tracing::info!("{}", rendered),
            LogLevel::Warn => tracing::warn!("{}", rendered),
            LogLevel::Error => tracing::error!("{}", rendered),
        }

        let mut buffer = lock_state(&self.buffer);
        if buffer.len() >= self.config.max_buffer {
            buffer.pop_front();
        }
        buffer.push_back(entry);
    }

    pub fn debug(&self, entry: LogEntry) {
        self.log(LogEntry { level: LogLevel::Debug, ..entry });
    }

    pub fn info(&self, entry: LogEntry) {
        self.log(LogEntry { level: LogLevel::Info, ..entry });
    }

    pub fn warn(&self, entry: LogEntry) {
        self.log(LogEntry { level: LogLevel::Warn, ..entry });
    }

    pub fn error(&self, entry: LogEntry) {
        self.log(LogEntry { level: LogLevel::Error, ..entry });
    }

    /// Get buffered logs.
    pub fn get_logs(&self) -> Vec<LogEntry> {
        lock_state(&self.buffer).iter().cloned().collect()
    }

    /// Get logs at or above a level.
    pub fn get_logs_at_level(&self, min_level: LogLevel) -> Vec<LogEntry> {
        lock_state(&self.buffer)
            .iter()
            .filter(|e| e.level >= min_level)
            .cloned()
            .collect()
    }

    /// Clear the buffer.
    pub fn clear(&self) {
        lock_state(&self.buffer).clear();
    }
}

impl Default for InteropLogger {
    fn default() -> Self {
        Self::new(LoggerConfig::default())
    }
}

/// Reduce a context to its type and masked id for logging.
pub fn summarize_context(context: Option<&Context>) -> Value {
    let Some(context) = context else {
        return Value::Null;
    };
    let mut summary = Map::new();
    summary.insert("type".to_string(), Value::String(context.context_type.clone()));
    if let Some(id) = &context.id {
        summary.insert("id".to_string(), mask_sensitive(Value::Object(id.clone())));
    }
    Value::Object(summary)
}

/// Recursively mask sensitive keys.
pub fn mask_sensitive(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(mask_sensitive).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, val)| {
                    let val = if is_redacted_key(&key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        mask_sensitive(val)
                    };
                    (key, val)
                })
                .collect(),
        ),
        other => other,
    }
}

fn is_redacted_key(key: &str) -> bool {
    REDACTED_KEYS.contains(&key)
}
