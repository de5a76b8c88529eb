pub mod notifications;
pub mod readings;

pub use notifications::NotificationRepository;
pub use readings::ReadingRepository;
