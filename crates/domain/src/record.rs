//! Serialized metric record: the interchange format between the store, the
//! durability backends, and the wire protocol.

use crate::metric::{Metric, MetricError, MetricKind, MetricName, MetricValue};
use serde::{Deserialize, Serialize};

/// `{id, type, delta?, value?}` with exactly one of `delta`/`value` populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Metric name.
    pub id: String,
    /// Metric kind.
    #[serde(rename = "type")]
    pub kind: MetricKind,
    /// Counter delta or total.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    /// Gauge value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl MetricRecord {
    /// Record for a gauge reading.
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    /// Record for a counter delta or total.
    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    /// Record carrying only a name and kind, as used by value lookups.
    pub fn query(id: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            id: id.into(),
            kind,
            delta: None,
            value: None,
        }
    }

    /// Validate the record shape and convert it to a [`Metric`].
    ///
    /// Only structure is checked here; sign and finiteness are protocol policy
    /// (see [`Metric::ensure_acceptable`]).
    pub fn to_metric(&self) -> Result<Metric, MetricError> {
        let name = MetricName::parse(&self.id)?;
        let value = match self.kind {
            MetricKind::Counter => {
                if self.value.is_some() {
                    return Err(MetricError::UnexpectedField {
                        name: name.to_string(),
                        field: "value",
                    });
                }
                let delta = self.delta.ok_or_else(|| MetricError::MissingField {
                    name: name.to_string(),
                    field: "delta",
                })?;
                MetricValue::Counter(delta)
            },
            MetricKind::Gauge => {
                if self.delta.is_some() {
                    return Err(MetricError::UnexpectedField {
                        name: name.to_string(),
                        field: "delta",
                    });
                }
                let value = self.value.ok_or_else(|| MetricError::MissingField {
                    name: name.to_string(),
                    field: "value",
                })?;
                MetricValue::Gauge(value)
            },
        };
        Ok(Metric { name, value })
    }

    /// Validate shape and protocol policy in one step.
    pub fn to_update(&self) -> Result<Metric, MetricError> {
        let metric = self.to_metric()?;
        metric.ensure_acceptable()?;
        Ok(metric)
    }
}

impl From<&Metric> for MetricRecord {
    fn from(metric: &Metric) -> Self {
        match metric.value {
            MetricValue::Gauge(value) => Self::gauge(metric.name.as_str(), value),
            MetricValue::Counter(delta) => Self::counter(metric.name.as_str(), delta),
        }
    }
}
