//! Property coverage for metric records.

use metricsd_domain::{MetricKind, MetricRecord, MetricValue};
use proptest::prelude::*;

proptest! {
    #[test]
    fn gauge_values_survive_json_exactly(value in any::<f64>().prop_filter("finite", |v| v.is_finite())) {
        let record = MetricRecord::gauge("g", value);
        let json = serde_json::to_string(&record).map_err(|error| TestCaseError::fail(error.to_string()))?;
        let decoded: MetricRecord = serde_json::from_str(&json).map_err(|error| TestCaseError::fail(error.to_string()))?;
        prop_assert_eq!(decoded.value.map(f64::to_bits), Some(value.to_bits()));
    }

    #[test]
    fn counter_path_values_parse_back(delta in any::<i64>()) {
        let raw = delta.to_string();
        let parsed = MetricValue::parse(MetricKind::Counter, &raw);
        prop_assert_eq!(parsed, Ok(MetricValue::Counter(delta)));
    }

    #[test]
    fn formatted_gauges_parse_to_same_value(value in 0.0f64..1.0e12) {
        let formatted = MetricValue::Gauge(value).to_string();
        let parsed = MetricValue::parse(MetricKind::Gauge, &formatted);
        prop_assert_eq!(parsed, Ok(MetricValue::Gauge(value)));
    }
}

#[test]
fn lookup_records_decode_without_values() -> Result<(), serde_json::Error> {
    let record: MetricRecord = serde_json::from_str(r#"{"id":"hits","type":"counter"}"#)?;
    assert_eq!(record, MetricRecord::query("hits", MetricKind::Counter));
    Ok(())
}

#[test]
fn lookup_records_require_type() {
    let decoded: Result<MetricRecord, _> = serde_json::from_str(r#"{"id":"hits"}"#);
    assert!(decoded.is_err());
}
