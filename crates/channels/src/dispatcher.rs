//! Routes an untyped envelope to the handler registered for its `type`.

use crate::handler::HandlerRegistry;
use notifier_core::types::{Channel, NotificationResponse, RequestMeta};
use notifier_core::{NotificationEnvelope, NotifyError, NotifyResult};
use tracing::{debug, error, info, warn};

pub struct NotificationDispatcher {
    registry: HandlerRegistry,
}

impl NotificationDispatcher {
    pub fn new(registry: HandlerRegistry) -> Self {
        info!(
            handlers = registry.len(),
            channels = ?registry.channels(),
            "Notification dispatcher initialized"
        );
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Resolves the handler, binds the payload, builds the canonical request
    /// and returns the handler's response unchanged.
    pub async fn dispatch(
        &self,
        envelope: NotificationEnvelope,
    ) -> NotifyResult<NotificationResponse> {
        let result = self.route(envelope).await;
        if let Err(err) = &result {
            metrics::counter!("dispatch.errors", "kind" => err.kind()).increment(1);
        }
        result
    }

    async fn route(&self, envelope: NotificationEnvelope) -> NotifyResult<NotificationResponse> {
        let raw_type = envelope.notification_type().inspect_err(|_| {
            warn!("Dispatch failed: missing 'type' field");
        })?;

        let channel: Channel = raw_type.parse().map_err(|_| {
            error!(received = %raw_type, "Dispatch failed: invalid notification type");
            NotifyError::UnknownType(raw_type.clone())
        })?;

        let target = self.registry.get(channel).ok_or_else(|| {
            error!(channel = %channel, "Dispatch failed: no handler registered");
            NotifyError::NoHandler(channel)
        })?;

        debug!(
            channel = %channel,
            shape = target.payload_shape(),
            "Binding payload"
        );
        let invocation = target.bind(envelope.payload())?;

        let correlation_id = envelope.resolve_correlation_id();
        let priority = envelope.resolve_priority(correlation_id);
        let user_id = envelope.resolve_user_id(correlation_id)?;

        let meta = RequestMeta {
            channel,
            user_id,
            correlation_id,
            priority,
            source_app: envelope.source_app(),
            retry_count: envelope.retry_count(),
            timestamp_ms: envelope.timestamp_ms(),
        };

        info!(
            channel = %channel,
            correlation_id = %correlation_id,
            user_id = %user_id,
            priority = %priority,
            "Dispatching notification"
        );
        metrics::counter!("dispatch.requests", "channel" => channel.as_str()).increment(1);

        let response = invocation(meta).await?;
        debug!(
            channel = %channel,
            correlation_id = %correlation_id,
            delivered = response.delivered,
            "Handler completed"
        );
        Ok(response)
    }
}
