//! Per-user admission counters.
//!
//! Counts live in process memory for the diagnostics endpoint and are
//! mirrored into the `metrics` facade for the Prometheus exporter.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug)]
pub struct UserMetrics {
    since: DateTime<Utc>,
    successful: AtomicU64,
    rate_limited: AtomicU64,
}

impl UserMetrics {
    fn new() -> Self {
        Self {
            since: Utc::now(),
            successful: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
        }
    }

    pub fn since(&self) -> DateTime<Utc> {
        self.since
    }

    pub fn successful(&self) -> u64 {
        self.successful.load(Ordering::Relaxed)
    }

    pub fn rate_limited(&self) -> u64 {
        self.rate_limited.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.successful() + self.rate_limited()
    }
}

/// Point-in-time copy of one user's counters.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserMetricsSnapshot {
    pub user_id: Uuid,
    pub since: DateTime<Utc>,
    pub successful_requests: u64,
    pub rate_limited_requests: u64,
    pub total: u64,
}

#[derive(Debug, Default)]
pub struct RateLimitMetrics {
    users: DashMap<Uuid, Arc<UserMetrics>>,
}

impl RateLimitMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, user_id: Uuid) -> Arc<UserMetrics> {
        self.users
            .entry(user_id)
            .or_insert_with(|| Arc::new(UserMetrics::new()))
            .value()
            .clone()
    }

    pub fn record_success(&self, user_id: Uuid) {
        self.entry(user_id).successful.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("ratelimit.requests", "result" => "success").increment(1);
    }

    pub fn record_rate_limited(&self, user_id: Uuid) {
        self.entry(user_id)
            .rate_limited
            .fetch_add(1, Ordering::Relaxed);
        metrics::counter!("ratelimit.requests", "result" => "rate_limited").increment(1);
    }

    /// Counters for `user_id`, created zeroed on first read.
    pub fn user(&self, user_id: Uuid) -> Arc<UserMetrics> {
        self.entry(user_id)
    }

    pub fn snapshot(&self, user_id: Uuid) -> UserMetricsSnapshot {
        let m = self.entry(user_id);
        snapshot_of(user_id, &m)
    }

    pub fn all(&self) -> Vec<UserMetricsSnapshot> {
        let mut out: Vec<_> = self
            .users
            .iter()
            .map(|e| snapshot_of(*e.key(), e.value()))
            .collect();
        out.sort_by_key(|s| s.since);
        out
    }

    pub fn tracked_users(&self) -> usize {
        self.users.len()
    }
}

fn snapshot_of(user_id: Uuid, m: &UserMetrics) -> UserMetricsSnapshot {
    let successful_requests = m.successful();
    let rate_limited_requests = m.rate_limited();
    UserMetricsSnapshot {
        user_id,
        since: m.since(),
        successful_requests,
        rate_limited_requests,
        total: successful_requests + rate_limited_requests,
    }
}
