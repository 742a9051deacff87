//! Structured logger adapters: JSON lines on a sink, or `tracing` events.

use crate::log_sink::LogSink;
use metricsd_ports::{LogEvent, LogFields, LogLevel, LoggerPort};
use metricsd_shared::{REDACTED, is_secret_key};
use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// JSON logger emitting one line per event.
#[derive(Clone)]
pub struct JsonLogger {
    sink: Arc<dyn LogSink>,
    base_fields: LogFields,
    min_level: LogLevel,
}

impl JsonLogger {
    /// Create a JSON logger backed by the provided sink.
    #[must_use]
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            base_fields: LogFields::new(),
            min_level: LogLevel::Info,
        }
    }

    /// Set base fields applied to every event.
    #[must_use]
    pub fn with_base_fields(mut self, fields: LogFields) -> Self {
        self.base_fields = fields;
        self
    }

    /// Set the minimum log level.
    #[must_use]
    pub const fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }
}

impl LoggerPort for JsonLogger {
    fn log(&self, event: LogEvent) {
        if event.level < self.min_level {
            return;
        }

        let mut fields = merge_fields(&self.base_fields, event.fields);
        redact_fields(&mut fields);

        let mut payload = serde_json::Map::new();
        payload.insert("timestampMs".to_string(), Value::from(now_epoch_ms()));
        payload.insert("level".to_string(), Value::from(event.level.as_str()));
        payload.insert("event".to_string(), Value::from(event.event.as_ref()));
        payload.insert("message".to_string(), Value::from(event.message.as_ref()));
        if !fields.is_empty() {
            payload.insert("fields".to_string(), fields_to_json(&fields));
        }
        if let Some(mut error) = event.error {
            redact_value(&mut error);
            payload.insert("error".to_string(), error);
        }

        let line = serde_json::to_string(&Value::Object(payload)).map_or_else(
            |_| {
                "{\"timestampMs\":0,\"level\":\"error\",\"event\":\"logger.serialize_failed\",\"message\":\"log serialization failed\"}\n"
                    .to_string()
            },
            |mut encoded| {
                encoded.push('\n');
                encoded
            },
        );
        self.sink.write_line(&line);
    }

    fn child(&self, fields: LogFields) -> Box<dyn LoggerPort> {
        Box::new(Self {
            sink: Arc::clone(&self.sink),
            base_fields: merge_fields(&self.base_fields, Some(fields)),
            min_level: self.min_level,
        })
    }
}

/// Logger forwarding events to the `tracing` macros.
///
/// The event name becomes the `event` field; extra fields are rendered as a
/// JSON object in `fields`.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    base_fields: LogFields,
    min_level: LogLevel,
}

impl TracingLogger {
    /// Tracing logger with the given minimum level.
    #[must_use]
    pub fn new(min_level: LogLevel) -> Self {
        Self {
            base_fields: LogFields::new(),
            min_level,
        }
    }
}

impl LoggerPort for TracingLogger {
    fn log(&self, event: LogEvent) {
        if event.level < self.min_level {
            return;
        }
        let mut fields = merge_fields(&self.base_fields, event.fields);
        redact_fields(&mut fields);
        let rendered = if fields.is_empty() {
            String::new()
        } else {
            fields_to_json(&fields).to_string()
        };
        let error = event
            .error
            .map(|mut error| {
                redact_value(&mut error);
                error.to_string()
            })
            .unwrap_or_default();
        let name = event.event.as_ref();
        let message = event.message.as_ref();

        match event.level {
            LogLevel::Debug => {
                tracing::debug!(event = name, fields = %rendered, error = %error, "{message}");
            },
            LogLevel::Info => {
                tracing::info!(event = name, fields = %rendered, error = %error, "{message}");
            },
            LogLevel::Warn => {
                tracing::warn!(event = name, fields = %rendered, error = %error, "{message}");
            },
            LogLevel::Error => {
                tracing::error!(event = name, fields = %rendered, error = %error, "{message}");
            },
        }
    }

    fn child(&self, fields: LogFields) -> Box<dyn LoggerPort> {
        Box::new(Self {
            base_fields: merge_fields(&self.base_fields, Some(fields)),
            min_level: self.min_level,
        })
    }
}

fn merge_fields(base: &LogFields, extra: Option<LogFields>) -> LogFields {
    let mut merged = base.clone();
    if let Some(extra) = extra {
        merged.extend(extra);
    }
    merged
}

fn fields_to_json(fields: &LogFields) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect(),
    )
}

fn redact_fields(fields: &mut LogFields) {
    for (key, value) in fields.iter_mut() {
        if is_secret_key(key) {
            *value = Value::String(REDACTED.to_string());
        } else {
            redact_value(value);
        }
    }
}

fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map.iter_mut() {
                if is_secret_key(key) {
                    *nested = Value::String(REDACTED.to_string());
                } else {
                    redact_value(nested);
                }
            }
        },
        Value::Array(items) => {
            for item in items {
                redact_value(item);
            }
        },
        _ => {},
    }
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|duration| u64::try_from(duration.as_millis()).ok())
        .unwrap_or_default()
}
