//! In-app notifications pushed over the live socket.

use crate::connections::ConnectionRegistry;
use crate::handler::NotificationHandler;
use async_trait::async_trait;
use notifier_core::channels::{LiveNotification, SocketFrame, WebPayload};
use notifier_core::types::{CanonicalRequest, Channel, NotificationResponse};
use notifier_core::NotifyResult;
use std::sync::Arc;
use tracing::{debug, info};

pub struct LiveSocketHandler {
    registry: Arc<ConnectionRegistry>,
}

impl LiveSocketHandler {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl NotificationHandler for LiveSocketHandler {
    type Payload = WebPayload;

    fn channel(&self) -> Channel {
        Channel::Web
    }

    /// Reports `delivered = true` even when the user has no open session;
    /// the registry logs the drop.
    async fn handle(
        &self,
        request: CanonicalRequest<WebPayload>,
    ) -> NotifyResult<NotificationResponse> {
        let cid = request.correlation_id();
        let user_id = request.user_id();

        let frame = SocketFrame::Notification(LiveNotification::from_payload(request.payload()));
        let text = serde_json::to_string(&frame)?;

        let pushed = self.registry.send_to_user(user_id, &text).await;
        debug!(user_id = %user_id, correlation_id = %cid, pushed, "Live notification handled");
        if pushed {
            info!(user_id = %user_id, correlation_id = %cid, "Live notification pushed");
        }
        metrics::counter!("live.notifications", "pushed" => if pushed { "true" } else { "false" })
            .increment(1);

        Ok(NotificationResponse::success(
            Channel::Web,
            cid,
            "Live notification dispatched",
        ))
    }
}
