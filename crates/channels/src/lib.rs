//! Notification channels and the dispatch router.
//!
//! Handlers for SMS, push, Telegram and the live socket, the registry that
//! maps a notification type to its handler, and the connection registry
//! backing live delivery.

pub mod connections;
pub mod dispatcher;
pub mod handler;
pub mod live;
pub mod push;
pub mod sms;
pub mod telegram;

pub use connections::{ConnectionId, ConnectionRegistry, LiveConnection};
pub use dispatcher::NotificationDispatcher;
pub use handler::{DispatchTarget, HandlerRegistry, NotificationHandler};
pub use live::LiveSocketHandler;
pub use push::PushHandler;
pub use sms::{build_provider, SmsHandler, SmsProvider};
pub use telegram::{ChatBotClient, TelegramApi, TelegramHandler};
