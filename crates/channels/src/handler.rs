//! Channel handler contract and the start-up registry.
//!
//! A handler names its payload type; the blanket [`DispatchTarget`] impl
//! erases it so the router can hold every handler in one map and bind the
//! raw JSON payload without knowing the concrete type.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use notifier_core::types::{CanonicalRequest, Channel, NotificationResponse, RequestMeta};
use notifier_core::{NotifyError, NotifyResult};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[async_trait]
pub trait NotificationHandler: Send + Sync + 'static {
    type Payload: DeserializeOwned + Send + Sync + 'static;

    fn channel(&self) -> Channel;

    async fn handle(
        &self,
        request: CanonicalRequest<Self::Payload>,
    ) -> NotifyResult<NotificationResponse>;
}

/// A bound payload waiting for its request metadata.
pub type Invocation =
    Box<dyn FnOnce(RequestMeta) -> BoxFuture<'static, NotifyResult<NotificationResponse>> + Send>;

/// Type-erased view of a handler.
pub trait DispatchTarget: Send + Sync {
    fn channel(&self) -> Channel;

    /// Name of the payload type this handler binds to.
    fn payload_shape(&self) -> &'static str;

    /// Deserializes `payload` into the handler's payload type.
    fn bind(self: Arc<Self>, payload: Value) -> NotifyResult<Invocation>;
}

impl<H: NotificationHandler> DispatchTarget for H {
    fn channel(&self) -> Channel {
        NotificationHandler::channel(self)
    }

    fn payload_shape(&self) -> &'static str {
        let full = std::any::type_name::<H::Payload>();
        full.rsplit("::").next().unwrap_or(full)
    }

    fn bind(self: Arc<Self>, payload: Value) -> NotifyResult<Invocation> {
        let channel = NotificationHandler::channel(self.as_ref());
        let shape = DispatchTarget::payload_shape(self.as_ref());
        let payload: H::Payload =
            serde_json::from_value(payload).map_err(|e| NotifyError::BadPayload {
                channel,
                shape,
                reason: e.to_string(),
            })?;
        debug!(channel = %channel, shape, "Payload bound");

        Ok(Box::new(move |meta| {
            async move { self.handle(CanonicalRequest::new(meta, payload)).await }.boxed()
        }))
    }
}

/// Explicit `channel -> handler` map, assembled once at start-up.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Channel, Arc<dyn DispatchTarget>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<H: NotificationHandler>(mut self, handler: Arc<H>) -> Self {
        self.register(handler);
        self
    }

    pub fn register(&mut self, target: Arc<dyn DispatchTarget>) {
        let channel = target.channel();
        if self.handlers.insert(channel, target).is_some() {
            warn!(channel = %channel, "Replacing previously registered handler");
        } else {
            debug!(channel = %channel, "Registered handler");
        }
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn DispatchTarget>> {
        self.handlers.get(&channel).cloned()
    }

    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<_> = self.handlers.keys().copied().collect();
        channels.sort_by_key(|c| c.as_str());
        channels
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
