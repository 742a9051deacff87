//! Structured logging boundary contract.

use metricsd_shared::ErrorEnvelope;
use std::collections::BTreeMap;

/// Log level, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Debug.
    Debug,
    /// Info.
    Info,
    /// Warn.
    Warn,
    /// Error.
    Error,
}

impl LogLevel {
    /// Parse a level name (case-insensitive).
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Lowercase level name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Additional event fields.
pub type LogFields = BTreeMap<Box<str>, serde_json::Value>;

/// Structured log event.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    /// Stable event name (`server.flush.failed`).
    pub event: Box<str>,
    /// Severity.
    pub level: LogLevel,
    /// Human-readable message (safe, redacted).
    pub message: Box<str>,
    /// Optional structured fields.
    pub fields: Option<LogFields>,
    /// Optional error payload.
    pub error: Option<serde_json::Value>,
}

impl LogEvent {
    fn new(level: LogLevel, event: &str, message: &str, fields: Option<LogFields>) -> Self {
        Self {
            event: Box::from(event),
            level,
            message: Box::from(message),
            fields,
            error: None,
        }
    }
}

/// Build a [`LogFields`] map from `(key, value)` pairs.
pub fn log_fields<const N: usize>(pairs: [(&str, serde_json::Value); N]) -> LogFields {
    pairs
        .into_iter()
        .map(|(key, value)| (Box::from(key), value))
        .collect()
}

/// Boundary contract for structured logging.
pub trait LoggerPort: Send + Sync {
    /// Emit a structured event.
    fn log(&self, event: LogEvent);

    /// Create a child logger with base fields applied to every event.
    fn child(&self, fields: LogFields) -> Box<dyn LoggerPort>;

    /// Convenience: debug event.
    fn debug(&self, event: &str, message: &str, fields: Option<LogFields>) {
        self.log(LogEvent::new(LogLevel::Debug, event, message, fields));
    }

    /// Convenience: info event.
    fn info(&self, event: &str, message: &str, fields: Option<LogFields>) {
        self.log(LogEvent::new(LogLevel::Info, event, message, fields));
    }

    /// Convenience: warn event.
    fn warn(&self, event: &str, message: &str, fields: Option<LogFields>) {
        self.log(LogEvent::new(LogLevel::Warn, event, message, fields));
    }

    /// Convenience: error event.
    fn error(&self, event: &str, message: &str, fields: Option<LogFields>) {
        self.log(LogEvent::new(LogLevel::Error, event, message, fields));
    }

    /// Emit an event carrying a serialized [`ErrorEnvelope`].
    fn failure(
        &self,
        level: LogLevel,
        event: &str,
        message: &str,
        error: &ErrorEnvelope,
        fields: Option<LogFields>,
    ) {
        let mut entry = LogEvent::new(level, event, message, fields);
        entry.error = serde_json::to_value(error).ok();
        self.log(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture(Mutex<Vec<LogEvent>>);

    impl LoggerPort for Capture {
        fn log(&self, event: LogEvent) {
            if let Ok(mut events) = self.0.lock() {
                events.push(event);
            }
        }

        fn child(&self, _fields: LogFields) -> Box<dyn LoggerPort> {
            Box::new(Self::default())
        }
    }

    #[test]
    fn levels_parse_and_order() {
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("trace"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("loud"), None);
        assert!(LogLevel::Error > LogLevel::Info);
    }

    #[test]
    fn failure_attaches_error_payload() {
        let logger = Capture::default();
        let error = ErrorEnvelope::invalid_input("bad value");
        logger.failure(
            LogLevel::Warn,
            "server.update.rejected",
            "update rejected",
            &error,
            Some(log_fields([("id", serde_json::json!("hits"))])),
        );

        let events = logger.0.lock().map(|events| events.clone()).unwrap_or_default();
        assert_eq!(events.len(), 1);
        let payload = events.first().and_then(|event| event.error.clone());
        assert_eq!(
            payload.and_then(|value| value.get("message").cloned()),
            Some(serde_json::json!("bad value"))
        );
    }
}
