use crate::errors::Result;
use crate::metrics::DB_FAILURES_TOTAL;
use crate::model::{DeviceRecord, DeviceUpdate, TelemetryRecord};
use crate::store::{DeviceRegistry, TelemetryStore};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub async fn make_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// Machine registry backed by the `machines` table
#[derive(Debug, Clone)]
pub struct PgRegistry {
    pool: PgPool,
}

impl PgRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceRegistry for PgRegistry {
    async fn find_by_sim(&self, sim_number: &str) -> Result<Option<DeviceRecord>> {
        let device = sqlx::query_as::<_, DeviceRecord>(
            r#"
            SELECT id, machine_name, sim_number, status, sensor_status, location,
                   server_connection, last_status_update, phone_book
            FROM machines
            WHERE sim_number = $1
            LIMIT 1
            "#,
        )
        .bind(sim_number)
        .fetch_optional(&self.pool)
        .await
        .inspect_err(|_| DB_FAILURES_TOTAL.inc())?;

        Ok(device)
    }

    async fn apply_update(&self, device_id: Uuid, update: &DeviceUpdate) -> Result<()> {
        // COALESCE keeps the stored value for every field the report left out
        sqlx::query(
            r#"
            UPDATE machines SET
                last_status_update = $2,
                status = COALESCE($3, status),
                sensor_status = COALESCE($4, sensor_status),
                location = COALESCE($5, location),
                phone_book = COALESCE($6, phone_book)
            WHERE id = $1
            "#,
        )
        .bind(device_id)
        .bind(update.last_status_update)
        .bind(update.status.as_deref())
        .bind(update.sensor_status.as_deref())
        .bind(update.location.as_deref())
        .bind(update.phone_book.as_deref())
        .execute(&self.pool)
        .await
        .inspect_err(|_| DB_FAILURES_TOTAL.inc())?;

        Ok(())
    }
}

/// Job telemetry backed by the `machine_operations` table
#[derive(Debug, Clone)]
pub struct PgTelemetryStore {
    pool: PgPool,
}

impl PgTelemetryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TelemetryStore for PgTelemetryStore {
    async fn append(&self, record: &TelemetryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO machine_operations
                (id, machine_id, ts, fuel_consumption, pressure, process_time, location)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(record.device_id)
        .bind(record.occurred_at)
        .bind(record.fuel_consumption)
        .bind(record.pressure)
        .bind(record.process_time)
        .bind(&record.location)
        .execute(&self.pool)
        .await
        .inspect_err(|_| DB_FAILURES_TOTAL.inc())?;

        Ok(())
    }

    async fn list_for_device(
        &self,
        device_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TelemetryRecord>> {
        let records = sqlx::query_as::<_, TelemetryRecord>(
            r#"
            SELECT id, machine_id AS device_id, ts AS occurred_at,
                   fuel_consumption, pressure, process_time, location
            FROM machine_operations
            WHERE machine_id = $1
            ORDER BY ts DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(device_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .inspect_err(|_| DB_FAILURES_TOTAL.inc())?;

        Ok(records)
    }
}
