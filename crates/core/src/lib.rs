pub mod channels;
pub mod config;
pub mod envelope;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use envelope::NotificationEnvelope;
pub use error::{NotifyError, NotifyResult};
