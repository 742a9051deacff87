//! Update and query use cases for the server-side metric store.

use crate::durability::DurabilityService;
use metricsd_domain::{Metric, MetricKind, MetricName, MetricValue};
use metricsd_ports::{
    LogLevel, LoggerPort, MetricRecord, MetricSnapshotPort, MetricStorePort, log_fields,
};
use metricsd_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Dependencies shared by every update and query.
#[derive(Clone)]
pub struct MetricsDeps {
    /// Live store.
    pub store: Arc<dyn MetricStorePort>,
    /// Snapshot view of the same store.
    pub snapshot: Arc<dyn MetricSnapshotPort>,
    /// Durability backend; `None` runs memory-only.
    pub durability: Option<Arc<DurabilityService>>,
    /// Flush after every successful update (store interval 0).
    pub sync_flush: bool,
    /// Optional logger.
    pub logger: Option<Arc<dyn LoggerPort>>,
}

/// Raw path segments of `POST /update/{kind}/{name}/{value}`.
#[derive(Debug, Clone, Copy)]
pub struct PathUpdate<'a> {
    /// Raw kind.
    pub kind: &'a str,
    /// Raw name.
    pub name: &'a str,
    /// Raw value.
    pub value: &'a str,
}

/// Sorted copy of the store, as rendered by the index page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricListing {
    /// Counter totals by name.
    pub counters: BTreeMap<String, i64>,
    /// Gauge values by name.
    pub gauges: BTreeMap<String, f64>,
}

/// Apply a path-encoded update. Unknown kinds are `not_implemented`.
pub async fn update_from_path(
    ctx: &RequestContext,
    deps: &MetricsDeps,
    input: PathUpdate<'_>,
) -> Result<MetricRecord> {
    ctx.ensure_not_cancelled("metrics.update_from_path")?;
    let kind = MetricKind::parse(input.kind).map_err(ErrorEnvelope::from)?;
    let name = MetricName::parse(input.name).map_err(ErrorEnvelope::from)?;
    let value = MetricValue::parse(kind, input.value).map_err(ErrorEnvelope::from)?;
    let metric = Metric { name, value };
    metric.ensure_acceptable().map_err(ErrorEnvelope::from)?;

    let updated = apply(deps.store.as_ref(), &metric);
    after_update(ctx, deps, 1).await;
    Ok(updated)
}

/// Apply one JSON record and return it with the post-update value.
pub async fn update_metric(
    ctx: &RequestContext,
    deps: &MetricsDeps,
    record: MetricRecord,
) -> Result<MetricRecord> {
    ctx.ensure_not_cancelled("metrics.update_metric")?;
    let metric = record.to_update().map_err(ErrorEnvelope::from)?;
    let updated = apply(deps.store.as_ref(), &metric);
    after_update(ctx, deps, 1).await;
    Ok(updated)
}

/// Apply a batch. Every record is validated before the first write, so a
/// rejected batch leaves the store untouched.
pub async fn update_metrics(
    ctx: &RequestContext,
    deps: &MetricsDeps,
    records: Vec<MetricRecord>,
) -> Result<Vec<MetricRecord>> {
    ctx.ensure_not_cancelled("metrics.update_metrics")?;
    let metrics = records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            record.to_update().map_err(|error| {
                ErrorEnvelope::from(error).with_metadata("index", index.to_string())
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let updated: Vec<MetricRecord> = metrics
        .iter()
        .map(|metric| apply(deps.store.as_ref(), metric))
        .collect();
    after_update(ctx, deps, updated.len()).await;
    Ok(updated)
}

/// Current value of `(kind, name)` given as raw path segments.
pub fn get_value(deps: &MetricsDeps, kind: &str, name: &str) -> Result<MetricValue> {
    let kind = MetricKind::parse(kind).map_err(ErrorEnvelope::from)?;
    let name = MetricName::parse(name).map_err(ErrorEnvelope::from)?;
    lookup(deps.store.as_ref(), kind, &name)
}

/// Current value for a `{id, type}` query, as a full record.
pub fn get_record(deps: &MetricsDeps, query: &MetricRecord) -> Result<MetricRecord> {
    let name = MetricName::parse(&query.id).map_err(ErrorEnvelope::from)?;
    let value = lookup(deps.store.as_ref(), query.kind, &name)?;
    Ok(MetricRecord::from(&Metric { name, value }))
}

/// Every metric in the store.
pub fn list_metrics(deps: &MetricsDeps) -> MetricListing {
    MetricListing {
        counters: deps.snapshot.all_counters(),
        gauges: deps.snapshot.all_gauges(),
    }
}

/// Probe the durability backend. Memory-only servers report unavailable.
pub async fn ping(ctx: &RequestContext, deps: &MetricsDeps) -> Result<()> {
    match deps.durability.as_ref() {
        Some(durability) => durability.ping(ctx).await,
        None => Err(ErrorEnvelope::expected(
            ErrorCode::unavailable(),
            "no durability backend configured",
        )),
    }
}

fn apply(store: &dyn MetricStorePort, metric: &Metric) -> MetricRecord {
    match metric.value {
        MetricValue::Gauge(value) => {
            store.set_gauge(&metric.name, value);
            MetricRecord::gauge(metric.name.as_str(), value)
        },
        MetricValue::Counter(delta) => {
            let total = store.set_counter(&metric.name, delta);
            MetricRecord::counter(metric.name.as_str(), total)
        },
    }
}

fn lookup(store: &dyn MetricStorePort, kind: MetricKind, name: &MetricName) -> Result<MetricValue> {
    let value = match kind {
        MetricKind::Gauge => store.get_gauge(name).map(MetricValue::Gauge),
        MetricKind::Counter => store.get_counter(name).map(MetricValue::Counter),
    };
    value.ok_or_else(|| {
        ErrorEnvelope::expected(ErrorCode::not_found(), "metric not found")
            .with_metadata("metric", name.as_str())
            .with_metadata("type", kind.as_str())
    })
}

async fn after_update(ctx: &RequestContext, deps: &MetricsDeps, updated: usize) {
    if let Some(logger) = deps.logger.as_ref() {
        logger.debug(
            "server.update.applied",
            "Metrics updated",
            Some(log_fields([("count", Value::from(updated))])),
        );
    }
    if !deps.sync_flush {
        return;
    }
    let Some(durability) = deps.durability.as_ref() else {
        return;
    };
    if let Err(error) = durability.flush(ctx).await
        && let Some(logger) = deps.logger.as_ref()
    {
        logger.failure(
            LogLevel::Warn,
            "server.flush.sync_failed",
            "Synchronous flush failed",
            &error,
            None,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fake::FakeStore;

    mod fake {
        use super::super::*;
        use std::sync::Mutex;

        #[derive(Default)]
        pub struct FakeStore {
            pub gauges: Mutex<BTreeMap<String, f64>>,
            pub counters: Mutex<BTreeMap<String, i64>>,
        }

        impl MetricStorePort for FakeStore {
            fn set_gauge(&self, name: &MetricName, value: f64) {
                if let Ok(mut gauges) = self.gauges.lock() {
                    gauges.insert(name.to_string(), value);
                }
            }

            fn set_counter(&self, name: &MetricName, delta: i64) -> i64 {
                self.counters.lock().map_or(0, |mut counters| {
                    let total = counters.entry(name.to_string()).or_insert(0);
                    *total += delta;
                    *total
                })
            }

            fn get_gauge(&self, name: &MetricName) -> Option<f64> {
                self.gauges.lock().ok()?.get(name.as_str()).copied()
            }

            fn get_counter(&self, name: &MetricName) -> Option<i64> {
                self.counters.lock().ok()?.get(name.as_str()).copied()
            }
        }

        impl MetricSnapshotPort for FakeStore {
            fn all_gauges(&self) -> BTreeMap<String, f64> {
                self.gauges.lock().map(|map| map.clone()).unwrap_or_default()
            }

            fn all_counters(&self) -> BTreeMap<String, i64> {
                self.counters.lock().map(|map| map.clone()).unwrap_or_default()
            }

            fn serialize_all(&self) -> Vec<MetricRecord> {
                Vec::new()
            }

            fn restore(&self, _records: &[MetricRecord]) -> Result<usize> {
                Ok(0)
            }

            fn is_empty(&self) -> bool {
                self.all_gauges().is_empty() && self.all_counters().is_empty()
            }
        }
    }

    fn deps() -> (Arc<FakeStore>, MetricsDeps) {
        let store = Arc::new(FakeStore::default());
        let deps = MetricsDeps {
            store: store.clone(),
            snapshot: store.clone(),
            durability: None,
            sync_flush: false,
            logger: None,
        };
        (store, deps)
    }

    #[tokio::test]
    async fn path_updates_accumulate_counters() -> Result<()> {
        let ctx = RequestContext::new_request();
        let (_, deps) = deps();
        for value in ["5", "3"] {
            update_from_path(
                &ctx,
                &deps,
                PathUpdate {
                    kind: "counter",
                    name: "hits",
                    value,
                },
            )
            .await?;
        }
        assert_eq!(get_value(&deps, "counter", "hits")?, MetricValue::Counter(8));
        Ok(())
    }

    #[tokio::test]
    async fn path_update_errors_are_classified() {
        let ctx = RequestContext::new_request();
        let (_, deps) = deps();
        let cases = [
            ("histogram", "x", "1", ErrorCode::not_implemented()),
            ("counter", "x", "1.5", ErrorCode::invalid_input()),
            ("gauge", "x", "abc", ErrorCode::invalid_input()),
            ("gauge", "x", "-1", ErrorCode::invalid_input()),
        ];
        for (kind, name, value, code) in cases {
            let result = update_from_path(&ctx, &deps, PathUpdate { kind, name, value }).await;
            let Err(error) = result else {
                panic!("expected {kind}/{name}/{value} to fail");
            };
            assert_eq!(error.code, code, "{kind}/{name}/{value}");
        }
    }

    #[tokio::test]
    async fn json_update_returns_total() -> Result<()> {
        let ctx = RequestContext::new_request();
        let (_, deps) = deps();
        update_metric(&ctx, &deps, MetricRecord::counter("hits", 2)).await?;
        let updated = update_metric(&ctx, &deps, MetricRecord::counter("hits", 3)).await?;
        assert_eq!(updated, MetricRecord::counter("hits", 5));

        let updated = update_metric(&ctx, &deps, MetricRecord::gauge("temp", 3.5)).await?;
        assert_eq!(updated.value, Some(3.5));
        Ok(())
    }

    #[tokio::test]
    async fn rejected_batch_writes_nothing() {
        let ctx = RequestContext::new_request();
        let (store, deps) = deps();
        let batch = vec![
            MetricRecord::counter("ok", 1),
            MetricRecord::gauge("bad", -2.0),
        ];
        let Err(error) = update_metrics(&ctx, &deps, batch).await else {
            panic!("expected batch to be rejected");
        };
        assert_eq!(error.metadata.get("index").map(String::as_str), Some("1"));
        assert!(store.is_empty());
    }

    #[test]
    fn missing_metrics_are_not_found() {
        let (_, deps) = deps();
        let Err(error) = get_record(&deps, &MetricRecord::query("nope", MetricKind::Gauge)) else {
            panic!("expected not found");
        };
        assert_eq!(error.code, ErrorCode::not_found());
    }

    #[tokio::test]
    async fn memory_only_ping_is_unavailable() {
        let ctx = RequestContext::new_request();
        let (_, deps) = deps();
        let Err(error) = ping(&ctx, &deps).await else {
            panic!("expected ping to fail");
        };
        assert_eq!(error.code, ErrorCode::unavailable());
    }
}
