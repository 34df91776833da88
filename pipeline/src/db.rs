use crate::errors::{Error, Result};
use crate::model::{to_decimal, PersistedRecord, Reading, FUEL_FLOW_SCALE, SENSOR_SCALE};
use crate::store::RecordStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

pub async fn make_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// Filters for reading persisted records back.
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

/// Postgres-backed permanent store, table `engine_readings`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Newest records first.
    pub async fn recent(&self, query: &RecordQuery) -> Result<Vec<PersistedRecord>> {
        let records = sqlx::query_as::<_, PersistedRecord>(
            r#"
            SELECT id,
                   temperature::float8 AS temperature,
                   rpm::float8 AS rpm,
                   pressure::float8 AS pressure,
                   fuel_flow::float8 AS fuel_flow,
                   "timestamp",
                   created_at,
                   updated_at
            FROM engine_readings
            WHERE ($1::timestamptz IS NULL OR "timestamp" >= $1)
              AND ($2::timestamptz IS NULL OR "timestamp" <= $2)
            ORDER BY "timestamp" DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(query.start)
        .bind(query.end)
        .bind(query.limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn insert_batch(&self, batch: &[Reading]) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let temperatures = column(batch, "temperature", SENSOR_SCALE, |r| r.temperature)?;
        let rpms = column(batch, "rpm", SENSOR_SCALE, |r| r.rpm)?;
        let pressures = column(batch, "pressure", SENSOR_SCALE, |r| r.pressure)?;
        let fuel_flows = column(batch, "fuelFlow", FUEL_FLOW_SCALE, |r| r.fuel_flow)?;
        let timestamps: Vec<DateTime<Utc>> = batch.iter().map(|r| r.timestamp).collect();
        let now = Utc::now();

        // one statement, so the batch is committed or rejected as a whole
        let query = r#"
            INSERT INTO engine_readings
                (temperature, rpm, pressure, fuel_flow, "timestamp", created_at, updated_at)
            SELECT t, r, p, f, ts, $6, $6
            FROM UNNEST($1::numeric[], $2::numeric[], $3::numeric[], $4::numeric[], $5::timestamptz[])
                AS b(t, r, p, f, ts)
            "#;

        let result = sqlx::query(query)
            .bind(&temperatures)
            .bind(&rpms)
            .bind(&pressures)
            .bind(&fuel_flows)
            .bind(&timestamps)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Commit(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

/// One field of the batch as decimals already rounded to the column scale.
fn column<F>(batch: &[Reading], name: &str, scale: u32, field: F) -> Result<Vec<Decimal>>
where
    F: Fn(&Reading) -> f64,
{
    batch
        .iter()
        .map(|r| {
            to_decimal(field(r), scale).ok_or_else(|| {
                Error::Commit(format!("{} {} has no decimal form", name, field(r)))
            })
        })
        .collect()
}
