/// Runs against a real Postgres. Set DATABASE_URL and run with
/// `cargo test -- --ignored`.
use mtrack_ingest::db;
use mtrack_ingest::models::{FixStatus, NotificationStatus, NotificationType};
use mtrack_ingest::storage::{PgStorage, Storage};
use mtrack_ingest::{BatteryLevel, Ingestor, Reading, ThresholdEvaluator};
use pretty_assertions::assert_eq;
use std::sync::Arc;

async fn storage() -> PgStorage {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::connect(&url, 2).await.unwrap();
    db::ensure_schema(&pool).await.unwrap();
    PgStorage::new(pool)
}

fn reading(device_id: &str, voltage_raw: f64) -> Reading {
    Reading {
        device_id: device_id.to_string(),
        voltage_raw,
        fix_status: FixStatus::ValidPosition,
        latitude: 10.777351,
        longitude: 106.680345,
        speed_knots: 8.5,
        gps_date: chrono::NaiveDate::from_ymd_opt(2024, 10, 7),
        gps_time: chrono::NaiveTime::from_hms_opt(8, 29, 47),
    }
}

fn unique_device() -> String {
    format!("test-{}", uuid::Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore]
async fn test_reading_insert_creates_device_once() {
    let storage = storage().await;
    let device = unique_device();

    let first = storage.save_reading(&reading(&device, 36.0)).await.unwrap();
    let second = storage.save_reading(&reading(&device, 35.0)).await.unwrap();
    assert!(second > first);

    let count = storage.readings().count_for_device(&device).await.unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
#[ignore]
async fn test_pipeline_against_postgres() {
    let storage = Arc::new(storage().await);
    let ingestor = Ingestor::spawn(storage.clone(), ThresholdEvaluator::default(), 8);
    let device = unique_device();

    let low = ingestor.submit(reading(&device, 34.0)).await.unwrap();
    let repeat = ingestor.submit(reading(&device, 34.5)).await.unwrap();
    let critical = ingestor.submit(reading(&device, 32.0)).await.unwrap();
    assert!(low.notification_id.is_some());
    assert_eq!(repeat.notification_id, None);
    assert!(critical.notification_id.is_some());

    let latest = storage
        .latest_active_notification(&device, NotificationType::LowBattery)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(Some(latest.id), critical.notification_id);
    assert_eq!(latest.battery_level, Some(BatteryLevel::Critical));
    assert_eq!(latest.message, "Critical battery level (3.20V)");
    assert_eq!(latest.asset_data_id, Some(critical.reading_id));
    assert_eq!(latest.status, NotificationStatus::Pending);
}

#[tokio::test]
#[ignore]
async fn test_acknowledge_notification() {
    let storage = storage().await;
    let evaluator = ThresholdEvaluator::default();
    let device = unique_device();

    let outcome = mtrack_ingest::ingest::process(&storage, &evaluator, &reading(&device, 30.0))
        .await
        .unwrap();
    let id = outcome.notification_id.unwrap();

    let updated = storage
        .update_notification_status(id, NotificationStatus::Acknowledged, Some(7))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, NotificationStatus::Acknowledged);
    assert_eq!(updated.acknowledged_by, Some(7));
    assert!(updated.acknowledged_at.is_some());

    let fetched = storage.notifications().get_by_id(id).await.unwrap().unwrap();
    assert_eq!(fetched.status, NotificationStatus::Acknowledged);

    assert!(storage
        .latest_active_notification(&device, NotificationType::LowBattery)
        .await
        .unwrap()
        .is_none());

    assert!(storage
        .update_notification_status(i64::MAX, NotificationStatus::Sent, None)
        .await
        .unwrap()
        .is_none());
}

/// Notifications table as created before voltage and level were columns.
const LEGACY_NOTIFICATIONS: &str = r#"
    CREATE TABLE notifications (
        notification_id BIGSERIAL PRIMARY KEY,
        device_id       TEXT NOT NULL,
        type            TEXT NOT NULL,
        status          TEXT NOT NULL DEFAULT 'pending',
        message         TEXT NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        asset_data_id   BIGINT,
        acknowledged_at TIMESTAMPTZ,
        acknowledged_by BIGINT
    )
"#;

#[tokio::test]
#[ignore]
async fn test_ensure_schema_upgrades_legacy_notifications() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    // One connection, so the search_path below applies to every query.
    let pool = db::connect(&url, 1).await.unwrap();
    let schema = format!("mtrack_legacy_{}", uuid::Uuid::new_v4().simple());
    sqlx::query(&format!("CREATE SCHEMA {schema}"))
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(&format!("SET search_path TO {schema}"))
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(LEGACY_NOTIFICATIONS)
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO notifications (device_id, type, status, message) \
         VALUES ('legacy-1', 'low_battery', 'pending', 'Low battery level (3.40V)')",
    )
    .execute(&pool)
    .await
    .unwrap();

    db::ensure_schema(&pool).await.unwrap();
    // Running it again on an upgraded table is a no-op.
    db::ensure_schema(&pool).await.unwrap();

    let storage = PgStorage::new(pool.clone());
    let evaluator = ThresholdEvaluator::default();

    let legacy = storage
        .latest_active_notification("legacy-1", NotificationType::LowBattery)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(legacy.voltage, None);
    assert_eq!(legacy.battery_level, None);

    // Still low according to the old message text.
    let same = mtrack_ingest::ingest::process(&storage, &evaluator, &reading("legacy-1", 34.2))
        .await
        .unwrap();
    assert_eq!(same.notification_id, None);

    let critical = mtrack_ingest::ingest::process(&storage, &evaluator, &reading("legacy-1", 32.0))
        .await
        .unwrap();
    assert!(critical.notification_id.is_some());

    let latest = storage
        .latest_active_notification("legacy-1", NotificationType::LowBattery)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.battery_level, Some(BatteryLevel::Critical));
    assert_eq!(latest.voltage, Some(3.2));

    sqlx::query(&format!("DROP SCHEMA {schema} CASCADE"))
        .execute(&pool)
        .await
        .unwrap();
}
