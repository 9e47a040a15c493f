//! Mobile push. No provider is wired yet; requests are logged and reported
//! as delivered.

use crate::handler::NotificationHandler;
use async_trait::async_trait;
use notifier_core::channels::PushPayload;
use notifier_core::types::{CanonicalRequest, Channel, NotificationResponse};
use notifier_core::NotifyResult;
use tracing::info;

#[derive(Debug, Default)]
pub struct PushHandler;

impl PushHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationHandler for PushHandler {
    type Payload = PushPayload;

    fn channel(&self) -> Channel {
        Channel::Push
    }

    async fn handle(
        &self,
        request: CanonicalRequest<PushPayload>,
    ) -> NotifyResult<NotificationResponse> {
        let payload = request.payload();
        info!(
            user_id = %request.user_id(),
            correlation_id = %request.correlation_id(),
            device_token = %payload.device_token,
            title = %payload.title,
            "Push notification accepted"
        );
        metrics::counter!("push.accepted").increment(1);

        Ok(NotificationResponse::success(
            Channel::Push,
            request.correlation_id(),
            "Push notification accepted",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notifier_core::types::{Priority, RequestMeta};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_always_delivered() {
        let cid = Uuid::new_v4();
        let request = CanonicalRequest::new(
            RequestMeta {
                channel: Channel::Push,
                user_id: Uuid::new_v4(),
                correlation_id: cid,
                priority: Priority::Low,
                source_app: "app".into(),
                retry_count: 0,
                timestamp_ms: 0,
            },
            PushPayload {
                device_token: "fcm-token".into(),
                title: "Hi".into(),
                message: "there".into(),
            },
        );

        let resp = PushHandler::new().handle(request).await.unwrap();
        assert!(resp.delivered);
        assert_eq!(resp.channel, Channel::Push);
        assert_eq!(resp.correlation_id, cid);
    }
}
