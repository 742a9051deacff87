//! PostgreSQL durability backend (`sqlx`).
//!
//! The table stores totals. Counters accumulate only in the in-memory store,
//! so both write modes overwrite rows and never add.

use metricsd_domain::MetricKind;
use metricsd_ports::{BackendLifecyclePort, BoxFuture, DurabilityPort, MetricRecord};
use metricsd_shared::{
    ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result, retry_with_schedule,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;

/// Delays between connection attempts.
pub const CONNECT_RETRY_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

const MAX_CONNECTIONS: u32 = 8;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS metrics (
    id TEXT NOT NULL,
    mtype TEXT NOT NULL,
    delta BIGINT,
    value DOUBLE PRECISION,
    PRIMARY KEY (id, mtype)
)";
const SELECT_ALL_SQL: &str = "SELECT id, mtype, delta, value FROM metrics ORDER BY mtype, id";
const TRUNCATE_SQL: &str = "TRUNCATE TABLE metrics";
const INSERT_SQL: &str = "INSERT INTO metrics (id, mtype, delta, value) VALUES ($1, $2, $3, $4)";
const UPSERT_SQL: &str = "INSERT INTO metrics (id, mtype, delta, value) VALUES ($1, $2, $3, $4)
    ON CONFLICT (id, mtype) DO UPDATE SET delta = excluded.delta, value = excluded.value";

/// How snapshots are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostgresWriteMode {
    /// `TRUNCATE` then `INSERT` in one transaction.
    Snapshot,
    /// `INSERT ... ON CONFLICT DO UPDATE` in one transaction.
    Upsert,
}

impl PostgresWriteMode {
    const fn statement(self) -> &'static str {
        match self {
            Self::Snapshot => INSERT_SQL,
            Self::Upsert => UPSERT_SQL,
        }
    }
}

/// PostgreSQL backend over a connection pool.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
    mode: PostgresWriteMode,
}

impl PostgresBackend {
    /// Open the pool, retrying connection-class failures on
    /// [`CONNECT_RETRY_SCHEDULE`]. Other errors fail immediately.
    pub async fn connect(
        ctx: &RequestContext,
        dsn: &str,
        mode: PostgresWriteMode,
    ) -> Result<Self> {
        let pool = retry_with_schedule(
            ctx,
            &CONNECT_RETRY_SCHEDULE,
            "postgres_backend.connect",
            || async {
                PgPoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .acquire_timeout(ACQUIRE_TIMEOUT)
                    .connect(dsn)
                    .await
                    .map_err(|error| map_sqlx_error("connect", &error))
            },
            |error| error.class.is_retriable(),
        )
        .await?;
        Ok(Self { pool, mode })
    }

    async fn read_records(&self) -> Result<Vec<MetricRecord>> {
        let rows = sqlx::query(SELECT_ALL_SQL)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| map_sqlx_error("read", &error))?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get(0).map_err(|error| map_sqlx_error("decode", &error))?;
                let mtype: String =
                    row.try_get(1).map_err(|error| map_sqlx_error("decode", &error))?;
                let delta: Option<i64> =
                    row.try_get(2).map_err(|error| map_sqlx_error("decode", &error))?;
                let value: Option<f64> =
                    row.try_get(3).map_err(|error| map_sqlx_error("decode", &error))?;
                let kind = MetricKind::parse(&mtype).map_err(ErrorEnvelope::from)?;
                Ok(MetricRecord {
                    id,
                    kind,
                    delta,
                    value,
                })
            })
            .collect()
    }

    async fn write_records(&self, records: Vec<MetricRecord>) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| map_sqlx_error("begin", &error))?;

        if self.mode == PostgresWriteMode::Snapshot {
            sqlx::query(TRUNCATE_SQL)
                .execute(&mut *tx)
                .await
                .map_err(|error| map_sqlx_error("truncate", &error))?;
        }
        write_rows(&mut tx, self.mode.statement(), &records).await?;

        tx.commit()
            .await
            .map_err(|error| map_sqlx_error("commit", &error))
    }
}

async fn write_rows(
    tx: &mut Transaction<'_, Postgres>,
    statement: &str,
    records: &[MetricRecord],
) -> Result<()> {
    for record in records {
        sqlx::query(statement)
            .bind(&record.id)
            .bind(record.kind.as_str())
            .bind(record.delta)
            .bind(record.value)
            .execute(&mut **tx)
            .await
            .map_err(|error| map_sqlx_error("write", &error))?;
    }
    Ok(())
}

impl DurabilityPort for PostgresBackend {
    fn read(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<Vec<MetricRecord>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("postgres_backend.read")?;
            self.read_records().await
        })
    }

    fn write(
        &self,
        ctx: &RequestContext,
        records: Vec<MetricRecord>,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("postgres_backend.write")?;
            self.write_records(records).await
        })
    }

    fn create(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("postgres_backend.create")?;
            sqlx::query(CREATE_TABLE_SQL)
                .execute(&self.pool)
                .await
                .map_err(|error| map_sqlx_error("create", &error))?;
            Ok(())
        })
    }
}

impl BackendLifecyclePort for PostgresBackend {
    fn ping(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("postgres_backend.ping")?;
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|error| map_sqlx_error("ping", &error))?;
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.pool.close().await })
    }
}

/// True for failures worth reconnecting on: I/O, pool exhaustion, and
/// SQLSTATE class `08` (connection exception).
#[must_use]
pub fn is_connection_error(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| is_connection_sqlstate(&code)),
        _ => false,
    }
}

fn is_connection_sqlstate(code: &str) -> bool {
    code.starts_with("08")
}

fn map_sqlx_error(operation: &'static str, error: &sqlx::Error) -> ErrorEnvelope {
    let envelope = if is_connection_error(error) {
        ErrorEnvelope::unexpected(
            ErrorCode::unavailable(),
            format!("postgres {operation} failed: {error}"),
            ErrorClass::Retriable,
        )
    } else {
        ErrorEnvelope::unexpected(
            ErrorCode::new("durability", "query_failed"),
            format!("postgres {operation} failed: {error}"),
            ErrorClass::NonRetriable,
        )
    };
    let envelope = envelope.with_metadata("operation", operation);
    match error {
        sqlx::Error::Database(db) => match db.code() {
            Some(code) => envelope.with_metadata("sqlstate", code.to_string()),
            None => envelope,
        },
        _ => envelope,
    }
}
