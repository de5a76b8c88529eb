use crate::db::DbPool;
use crate::error::Result;
use crate::models::{Reading, ReadingId};

#[derive(Debug, Clone)]
pub struct ReadingRepository {
    pool: DbPool,
}

impl ReadingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Register the device, store the position and the reading in one
    /// transaction. Returns the new `asset_data_id`.
    pub async fn insert(&self, reading: &Reading) -> Result<ReadingId> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO devices (device_id)
            VALUES ($1)
            ON CONFLICT (device_id) DO NOTHING
            "#,
        )
        .bind(&reading.device_id)
        .execute(&mut *tx)
        .await?;

        let location_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO locations (latitude, longitude)
            VALUES ($1, $2)
            RETURNING location_id
            "#,
        )
        .bind(reading.latitude)
        .bind(reading.longitude)
        .fetch_one(&mut *tx)
        .await?;

        let id: ReadingId = sqlx::query_scalar(
            r#"
            INSERT INTO asset_data (
                device_id,
                voltage,
                status,
                location_id,
                current_speed,
                gps_date,
                gps_time
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING asset_data_id
            "#,
        )
        .bind(&reading.device_id)
        .bind(reading.voltage_raw)
        .bind(reading.fix_status.as_str())
        .bind(location_id)
        .bind(reading.speed_knots)
        .bind(reading.gps_date)
        .bind(reading.gps_time)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::debug!(device_id = %reading.device_id, asset_data_id = id, location_id, "reading stored");
        Ok(id)
    }

    pub async fn count_for_device(&self, device_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM asset_data WHERE device_id = $1")
            .bind(device_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
