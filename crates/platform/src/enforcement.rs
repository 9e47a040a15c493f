//! Rate-limit enforcement around an arbitrary async operation.

use crate::metrics::RateLimitMetrics;
use crate::rate_limit::AdmissionController;
use notifier_core::types::{Plan, Priority};
use notifier_core::{NotifyError, NotifyResult};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Extracts a user from the call, asks the admission controller, runs the
/// operation and records the outcome.
///
/// Any failure after admission is reported as `RateLimitExceeded` with
/// `admitted = true` and the operation's own error text, and counted as
/// rate-limited. Callers that need to tell the two apart read that flag.
#[derive(Clone)]
pub struct RateLimitEnforcer {
    admission: Arc<AdmissionController>,
    metrics: Arc<RateLimitMetrics>,
}

impl RateLimitEnforcer {
    pub fn new(admission: Arc<AdmissionController>, metrics: Arc<RateLimitMetrics>) -> Self {
        Self { admission, metrics }
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn metrics(&self) -> &Arc<RateLimitMetrics> {
        &self.metrics
    }

    pub async fn guard<R, T, X, F, Fut>(
        &self,
        request: &R,
        extract_user: X,
        plan: Plan,
        priority: Priority,
        operation: F,
    ) -> NotifyResult<T>
    where
        R: ?Sized,
        X: FnOnce(&R) -> Option<Uuid>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = NotifyResult<T>>,
    {
        let user_id = extract_user(request).ok_or_else(|| {
            NotifyError::BadRequest("userId is required for rate limiting".to_string())
        })?;

        if let Err(denied) = self.admission.admit(user_id, plan, priority) {
            self.metrics.record_rate_limited(user_id);
            return Err(denied);
        }

        match operation().await {
            Ok(value) => {
                self.metrics.record_success(user_id);
                debug!(user_id = %user_id, "Guarded operation completed");
                Ok(value)
            }
            Err(err) => {
                self.metrics.record_rate_limited(user_id);
                warn!(
                    user_id = %user_id,
                    error_kind = err.kind(),
                    error = %err,
                    "Guarded operation failed after admission"
                );
                Err(NotifyError::RateLimitExceeded {
                    user_id,
                    plan,
                    priority,
                    admitted: true,
                    message: err.to_string(),
                })
            }
        }
    }
}
