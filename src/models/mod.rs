pub mod notification;
pub mod reading;

pub use notification::{NewNotification, Notification, NotificationStatus, NotificationType};
pub use reading::{FixStatus, Reading};

/// Primary key of a stored reading (`asset_data.asset_data_id`).
pub type ReadingId = i64;

/// Primary key of a stored notification.
pub type NotificationId = i64;
