//! Metric kinds, names, and values with validated constructors.

use metricsd_shared::{ErrorCode, ErrorEnvelope};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Validation failures for metric primitives and records.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricError {
    /// Metric name is empty after trimming.
    EmptyName,
    /// Metric kind is neither `gauge` nor `counter`.
    UnknownKind {
        /// Raw kind as received.
        input: String,
    },
    /// Raw value does not parse for the metric kind.
    InvalidValue {
        /// Kind the value was parsed as.
        kind: MetricKind,
        /// Raw value as received.
        input: String,
    },
    /// Value is negative; rejected at the protocol boundary.
    NegativeValue {
        /// Metric name.
        name: String,
    },
    /// Gauge value is `NaN` or infinite.
    NonFiniteGauge {
        /// Metric name.
        name: String,
    },
    /// The field selected by the kind (`delta` or `value`) is absent.
    MissingField {
        /// Metric name.
        name: String,
        /// Name of the missing field.
        field: &'static str,
    },
    /// The field belonging to the other kind is populated.
    UnexpectedField {
        /// Metric name.
        name: String,
        /// Name of the unexpected field.
        field: &'static str,
    },
}

impl MetricError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnknownKind { .. } => ErrorCode::not_implemented(),
            _ => ErrorCode::invalid_input(),
        }
    }
}

impl fmt::Display for MetricError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => formatter.write_str("metric name must be non-empty"),
            Self::UnknownKind { input } => write!(formatter, "unknown metric type: {input}"),
            Self::InvalidValue { kind, input } => {
                write!(formatter, "invalid {kind} value: {input}")
            },
            Self::NegativeValue { name } => {
                write!(formatter, "metric {name} must not be negative")
            },
            Self::NonFiniteGauge { name } => {
                write!(formatter, "gauge {name} must be a finite number")
            },
            Self::MissingField { name, field } => {
                write!(formatter, "metric {name} is missing field {field}")
            },
            Self::UnexpectedField { name, field } => {
                write!(formatter, "metric {name} must not carry field {field}")
            },
        }
    }
}

impl std::error::Error for MetricError {}

impl From<MetricError> for ErrorEnvelope {
    fn from(error: MetricError) -> Self {
        let envelope = Self::expected(error.error_code(), error.to_string());
        match error {
            MetricError::EmptyName => envelope,
            MetricError::UnknownKind { input } => envelope.with_metadata("type", input),
            MetricError::InvalidValue { kind, input } => envelope
                .with_metadata("type", kind.as_str())
                .with_metadata("value", input),
            MetricError::NegativeValue { name } | MetricError::NonFiniteGauge { name } => {
                envelope.with_metadata("id", name)
            },
            MetricError::MissingField { name, field }
            | MetricError::UnexpectedField { name, field } => envelope
                .with_metadata("id", name)
                .with_metadata("field", field),
        }
    }
}

/// The two metric kinds. Each kind is an independent namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Latest-value semantics.
    Gauge,
    /// Accumulation semantics.
    Counter,
}

impl MetricKind {
    /// Parse a kind from its wire name.
    pub fn parse(input: &str) -> Result<Self, MetricError> {
        match input {
            "gauge" => Ok(Self::Gauge),
            "counter" => Ok(Self::Counter),
            other => Err(MetricError::UnknownKind {
                input: other.to_string(),
            }),
        }
    }

    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Metric name, trimmed and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MetricName(Box<str>);

impl MetricName {
    /// Parse a name from caller input.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, MetricError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(MetricError::EmptyName);
        }
        Ok(Self(Box::from(trimmed)))
    }

    /// Borrow the name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl TryFrom<String> for MetricName {
    type Error = MetricError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<MetricName> for String {
    fn from(value: MetricName) -> Self {
        value.0.into_string()
    }
}

/// A metric value tagged with its kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    /// Gauge reading.
    Gauge(f64),
    /// Counter delta (on update) or total (on read).
    Counter(i64),
}

impl MetricValue {
    /// Parse a raw path segment according to `kind`.
    pub fn parse(kind: MetricKind, input: &str) -> Result<Self, MetricError> {
        let invalid = || MetricError::InvalidValue {
            kind,
            input: input.to_string(),
        };
        match kind {
            MetricKind::Counter => input.parse::<i64>().map(Self::Counter).map_err(|_| invalid()),
            MetricKind::Gauge => {
                let value = input.parse::<f64>().map_err(|_| invalid())?;
                if value.is_finite() {
                    Ok(Self::Gauge(value))
                } else {
                    Err(invalid())
                }
            },
        }
    }

    /// Kind of this value.
    #[must_use]
    pub const fn kind(self) -> MetricKind {
        match self {
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Counter(_) => MetricKind::Counter,
        }
    }

    /// Returns true for values below zero.
    #[must_use]
    pub fn is_negative(self) -> bool {
        match self {
            Self::Gauge(value) => value < 0.0,
            Self::Counter(delta) => delta < 0,
        }
    }
}

impl fmt::Display for MetricValue {
    /// Counters print as integers; gauges use the shortest round-trip form.
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gauge(value) => write!(formatter, "{value}"),
            Self::Counter(delta) => write!(formatter, "{delta}"),
        }
    }
}

/// A named metric value.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Metric name.
    pub name: MetricName,
    /// Value and kind.
    pub value: MetricValue,
}

impl Metric {
    /// Build a gauge.
    #[must_use]
    pub const fn gauge(name: MetricName, value: f64) -> Self {
        Self {
            name,
            value: MetricValue::Gauge(value),
        }
    }

    /// Build a counter.
    #[must_use]
    pub const fn counter(name: MetricName, delta: i64) -> Self {
        Self {
            name,
            value: MetricValue::Counter(delta),
        }
    }

    /// Kind of this metric.
    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    /// Protocol-level update policy: values must be non-negative and finite.
    pub fn ensure_acceptable(&self) -> Result<(), MetricError> {
        if let MetricValue::Gauge(value) = self.value
            && !value.is_finite()
        {
            return Err(MetricError::NonFiniteGauge {
                name: self.name.to_string(),
            });
        }
        if self.value.is_negative() {
            return Err(MetricError::NegativeValue {
                name: self.name.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_from_wire_names() {
        assert_eq!(MetricKind::parse("gauge"), Ok(MetricKind::Gauge));
        assert_eq!(MetricKind::parse("counter"), Ok(MetricKind::Counter));
        assert!(matches!(
            MetricKind::parse("histogram"),
            Err(MetricError::UnknownKind { .. })
        ));
    }

    #[test]
    fn unknown_kind_maps_to_not_implemented() {
        let envelope: ErrorEnvelope = MetricKind::parse("summary")
            .err()
            .map(ErrorEnvelope::from)
            .unwrap_or_else(|| ErrorEnvelope::invalid_input("parsed"));
        assert_eq!(envelope.code, ErrorCode::not_implemented());
        assert_eq!(envelope.metadata.get("type").map(String::as_str), Some("summary"));
    }

    #[test]
    fn values_parse_per_kind() {
        assert_eq!(
            MetricValue::parse(MetricKind::Counter, "5"),
            Ok(MetricValue::Counter(5))
        );
        assert_eq!(
            MetricValue::parse(MetricKind::Gauge, "3.5"),
            Ok(MetricValue::Gauge(3.5))
        );
        assert!(MetricValue::parse(MetricKind::Counter, "1.5").is_err());
        assert!(MetricValue::parse(MetricKind::Gauge, "abc").is_err());
        assert!(MetricValue::parse(MetricKind::Gauge, "NaN").is_err());
        assert!(MetricValue::parse(MetricKind::Gauge, "inf").is_err());
    }

    #[test]
    fn values_format_compactly() {
        assert_eq!(MetricValue::Counter(8).to_string(), "8");
        assert_eq!(MetricValue::Gauge(8.0).to_string(), "8");
        assert_eq!(MetricValue::Gauge(3.5).to_string(), "3.5");
        assert_eq!(MetricValue::Gauge(0.1).to_string(), "0.1");
    }

    #[test]
    fn names_are_trimmed_and_required() {
        assert_eq!(
            MetricName::parse("  hits ").map(|name| name.to_string()),
            Ok("hits".to_string())
        );
        assert_eq!(MetricName::parse("   "), Err(MetricError::EmptyName));
    }

    #[test]
    fn negative_values_are_rejected() -> Result<(), MetricError> {
        let name = MetricName::parse("temp")?;
        assert!(Metric::gauge(name.clone(), -1.0).ensure_acceptable().is_err());
        assert!(Metric::counter(name.clone(), -3).ensure_acceptable().is_err());
        assert!(Metric::counter(name.clone(), 0).ensure_acceptable().is_ok());
        assert!(Metric::gauge(name, 0.0).ensure_acceptable().is_ok());
        Ok(())
    }
}
