use crate::error::AppError;
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};

pub type DbPool = Pool<Postgres>;

/// Tables written by the ingestion pipeline. Statuses and levels are text.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS devices (
        device_id   TEXT PRIMARY KEY,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS locations (
        location_id BIGSERIAL PRIMARY KEY,
        latitude    DOUBLE PRECISION NOT NULL,
        longitude   DOUBLE PRECISION NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS asset_data (
        asset_data_id BIGSERIAL PRIMARY KEY,
        device_id     TEXT NOT NULL REFERENCES devices (device_id),
        voltage       DOUBLE PRECISION NOT NULL,
        status        TEXT NOT NULL,
        location_id   BIGINT REFERENCES locations (location_id),
        current_speed DOUBLE PRECISION NOT NULL,
        gps_date      DATE,
        gps_time      TIME,
        inserted_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notifications (
        notification_id BIGSERIAL PRIMARY KEY,
        device_id       TEXT NOT NULL,
        type            TEXT NOT NULL,
        status          TEXT NOT NULL DEFAULT 'pending',
        message         TEXT NOT NULL,
        voltage         DOUBLE PRECISION,
        battery_level   TEXT,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        asset_data_id   BIGINT REFERENCES asset_data (asset_data_id),
        acknowledged_at TIMESTAMPTZ,
        acknowledged_by BIGINT
    )
    "#,
    // Tables created before the level was stored lack these columns.
    "ALTER TABLE notifications ADD COLUMN IF NOT EXISTS voltage DOUBLE PRECISION",
    "ALTER TABLE notifications ADD COLUMN IF NOT EXISTS battery_level TEXT",
    r#"
    CREATE INDEX IF NOT EXISTS notifications_device_type_created_idx
        ON notifications (device_id, type, created_at DESC)
    "#,
];

pub async fn connect(url: &str, max_connections: u32) -> Result<DbPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;
    Ok(pool)
}

/// Create the ingestion tables when they do not exist yet and add columns
/// missing from older notification tables.
pub async fn ensure_schema(pool: &DbPool) -> Result<(), AppError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
