use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::error::AppError;
use crate::models::{NotificationId, Reading, ReadingId};
use crate::storage::Storage;
use crate::thresholds::ThresholdEvaluator;

/// Handle to the ingestion pipeline task. Cheap to clone; every connection
/// holds one.
#[derive(Debug, Clone)]
pub struct Ingestor {
    tx: mpsc::Sender<IngestRequest>,
}

#[derive(Debug)]
struct IngestRequest {
    reading: Reading,
    reply: oneshot::Sender<Result<IngestOutcome, AppError>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub reading_id: ReadingId,
    /// Set when a low-battery notification was created for this reading.
    pub notification_id: Option<NotificationId>,
}

impl Ingestor {
    /// Start the pipeline task. Readings from all connections are processed
    /// one at a time, in arrival order, so notification dedup never races.
    pub fn spawn(
        storage: Arc<dyn Storage>,
        evaluator: ThresholdEvaluator,
        queue_size: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<IngestRequest>(queue_size.max(1));
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                let result = process(storage.as_ref(), &evaluator, &req.reading).await;
                if let Err(e) = &result {
                    error!(device_id = %req.reading.device_id, error = %e, "failed to store reading");
                }
                // The connection may be gone by now; the work is done either way.
                let _ = req.reply.send(result);
            }
            debug!("ingestion pipeline stopped");
        });
        Self { tx }
    }

    /// Queue a decoded reading and wait until it has been stored and
    /// evaluated.
    pub async fn submit(&self, reading: Reading) -> Result<IngestOutcome, AppError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(IngestRequest { reading, reply })
            .await
            .map_err(|e| AppError::Pipeline(format!("send reading: {}", e)))?;
        rx.await
            .map_err(|_| AppError::Pipeline("pipeline dropped the reading".into()))?
    }
}

/// Persist one reading, then raise a battery notification if its level
/// changed. A failed reading insert aborts; a failed notification insert is
/// logged and the reading still counts as stored.
pub async fn process(
    storage: &dyn Storage,
    evaluator: &ThresholdEvaluator,
    reading: &Reading,
) -> Result<IngestOutcome, AppError> {
    let reading_id = storage.save_reading(reading).await?;
    debug!(device_id = %reading.device_id, reading_id, "reading stored");

    let Some(mut notification) = evaluator
        .evaluate(storage, &reading.device_id, reading.voltage_raw)
        .await
    else {
        return Ok(IngestOutcome {
            reading_id,
            notification_id: None,
        });
    };

    notification.asset_data_id = Some(reading_id);
    let notification_id = match storage.save_notification(&notification).await {
        Ok(stored) => {
            info!(
                device_id = %stored.device_id,
                notification_id = stored.id,
                level = %notification.battery_level,
                message = %stored.message,
                "low battery notification created"
            );
            Some(stored.id)
        }
        Err(e) => {
            error!(device_id = %reading.device_id, error = %e, "failed to store notification");
            None
        }
    };

    Ok(IngestOutcome {
        reading_id,
        notification_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        FixStatus, NewNotification, Notification, NotificationStatus, NotificationType,
    };
    use crate::storage::MemoryStorage;
    use crate::thresholds::BatteryLevel;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    fn reading(device_id: &str, voltage_raw: f64) -> Reading {
        Reading {
            device_id: device_id.into(),
            voltage_raw,
            fix_status: FixStatus::ValidPosition,
            latitude: 10.7,
            longitude: 106.6,
            speed_knots: 1.0,
            gps_date: None,
            gps_time: None,
        }
    }

    #[tokio::test]
    async fn test_battery_sequence_creates_notifications_on_level_change() {
        let storage = Arc::new(MemoryStorage::new());
        let ingestor = Ingestor::spawn(storage.clone(), ThresholdEvaluator::default(), 8);

        let first = ingestor.submit(reading("dev", 33.0)).await.unwrap();
        assert!(first.notification_id.is_some());
        let second = ingestor.submit(reading("dev", 34.0)).await.unwrap();
        assert!(second.notification_id.is_some());
        let third = ingestor.submit(reading("dev", 34.2)).await.unwrap();
        assert_eq!(third.notification_id, None);

        let notifications = storage.notifications_for_device("dev").await.unwrap();
        let levels: Vec<_> = notifications.iter().map(|n| n.battery_level).collect();
        assert_eq!(
            levels,
            vec![Some(BatteryLevel::Low), Some(BatteryLevel::Critical)]
        );
        assert_eq!(notifications[0].asset_data_id, Some(second.reading_id));
        assert_eq!(storage.readings_for_device("dev").await.len(), 3);
    }

    #[tokio::test]
    async fn test_normal_voltage_stores_reading_only() {
        let storage = Arc::new(MemoryStorage::new());
        let outcome = process(storage.as_ref(), &ThresholdEvaluator::default(), &reading("dev", 41.0))
            .await
            .unwrap();
        assert_eq!(outcome.notification_id, None);
        assert!(storage.notifications_for_device("dev").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_acknowledged_notification_allows_new_one() {
        let storage = Arc::new(MemoryStorage::new());
        let evaluator = ThresholdEvaluator::default();
        let first = process(storage.as_ref(), &evaluator, &reading("dev", 34.0))
            .await
            .unwrap();
        storage
            .update_notification_status(
                first.notification_id.unwrap(),
                NotificationStatus::Acknowledged,
                Some(1),
            )
            .await
            .unwrap();
        let second = process(storage.as_ref(), &evaluator, &reading("dev", 34.0))
            .await
            .unwrap();
        assert!(second.notification_id.is_some());
    }

    /// Storage whose notification side is broken.
    #[derive(Default)]
    struct FlakyStorage {
        inner: MemoryStorage,
        fail_readings: bool,
    }

    #[async_trait]
    impl Storage for FlakyStorage {
        async fn save_reading(&self, reading: &Reading) -> crate::error::Result<ReadingId> {
            if self.fail_readings {
                return Err(AppError::Storage("disk full".into()));
            }
            self.inner.save_reading(reading).await
        }

        async fn latest_active_notification(
            &self,
            _device_id: &str,
            _kind: NotificationType,
        ) -> crate::error::Result<Option<Notification>> {
            Err(AppError::Storage("lookup unavailable".into()))
        }

        async fn save_notification(
            &self,
            _notification: &NewNotification,
        ) -> crate::error::Result<Notification> {
            Err(AppError::Storage("insert rejected".into()))
        }

        async fn notifications_for_device(
            &self,
            device_id: &str,
        ) -> crate::error::Result<Vec<Notification>> {
            self.inner.notifications_for_device(device_id).await
        }

        async fn update_notification_status(
            &self,
            id: NotificationId,
            status: NotificationStatus,
            acknowledged_by: Option<i64>,
        ) -> crate::error::Result<Option<Notification>> {
            self.inner
                .update_notification_status(id, status, acknowledged_by)
                .await
        }
    }

    #[tokio::test]
    async fn test_failed_notification_insert_keeps_reading() {
        let storage = FlakyStorage::default();
        let outcome = process(&storage, &ThresholdEvaluator::default(), &reading("dev", 30.0))
            .await
            .unwrap();
        assert_eq!(outcome.notification_id, None);
        assert_eq!(storage.inner.readings_for_device("dev").await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_reading_insert_is_reported() {
        let storage = Arc::new(FlakyStorage {
            fail_readings: true,
            ..Default::default()
        });
        let ingestor = Ingestor::spawn(storage, ThresholdEvaluator::default(), 1);
        let result = ingestor.submit(reading("dev", 30.0)).await;
        assert!(matches!(result, Err(AppError::Storage(_))));
    }
}
