pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod models;
pub mod protocol;
pub mod repositories;
pub mod server;
pub mod storage;
pub mod thresholds;

pub use config::Config;
pub use error::{AppError, Result};
pub use ingest::{IngestOutcome, Ingestor};
pub use models::{Notification, Reading};
pub use server::{Listener, ServerHandle};
pub use storage::{MemoryStorage, PgStorage, Storage};
pub use thresholds::{BatteryLevel, ThresholdEvaluator};
