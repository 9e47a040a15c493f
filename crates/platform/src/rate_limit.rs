//! Priority-aware token-bucket rate limiter backed by DashMap.
//!
//! Buckets are keyed by `(user, tier)` and created lazily on the first
//! admission check. Refill is greedy and continuous: tokens accrue in
//! proportion to elapsed time, capped at capacity, and are settled only when
//! a token is requested. There is no background timer and no eviction.

use dashmap::DashMap;
use notifier_core::types::{Plan, Priority, TierClass};
use notifier_core::{NotifyError, NotifyResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Refill window for every plan.
pub const REFILL_WINDOW: Duration = Duration::from_secs(60);

/// One token bucket.
///
/// State is a single theoretical-arrival-time (nanoseconds since `epoch`):
/// the instant at which the bucket would be full again. Consuming a token
/// pushes it forward by one emission interval; a token is available while
/// that push stays within `capacity` intervals of now. This makes
/// take-one-token a single compare-and-swap and keeps the token count in
/// `[0, capacity]` by construction.
#[derive(Debug)]
pub struct Bucket {
    capacity: u32,
    emission_nanos: u64,
    epoch: Instant,
    tat: AtomicU64,
}

impl Bucket {
    /// A full bucket refilling `capacity` tokens per `window`.
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self::starting_at(capacity, window, Instant::now())
    }

    fn starting_at(capacity: u32, window: Duration, epoch: Instant) -> Self {
        let per_token = window.as_nanos() / u128::from(capacity.max(1));
        Self {
            capacity,
            emission_nanos: per_token.max(1) as u64,
            epoch,
            tat: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Time needed to accrue one token.
    pub fn refill_interval(&self) -> Duration {
        Duration::from_nanos(self.emission_nanos)
    }

    fn nanos_since_epoch(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_nanos() as u64
    }

    fn burst_nanos(&self) -> u64 {
        self.emission_nanos.saturating_mul(u64::from(self.capacity))
    }

    pub fn try_consume(&self) -> bool {
        self.try_consume_at(Instant::now())
    }

    /// Atomically takes one token if one has accrued by `now`.
    pub fn try_consume_at(&self, now: Instant) -> bool {
        let now_ns = self.nanos_since_epoch(now);
        let burst = self.burst_nanos();
        let step = self.emission_nanos;

        self.tat
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |tat| {
                let next = tat.max(now_ns).saturating_add(step);
                (next - now_ns <= burst).then_some(next)
            })
            .is_ok()
    }

    pub fn available_tokens(&self) -> u32 {
        self.available_tokens_at(Instant::now())
    }

    pub fn available_tokens_at(&self, now: Instant) -> u32 {
        let now_ns = self.nanos_since_epoch(now);
        let burst = self.burst_nanos();
        let debt = self.tat.load(Ordering::Acquire).saturating_sub(now_ns).min(burst);
        ((burst - debt) / self.emission_nanos) as u32
    }
}

/// Structured bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub user_id: Uuid,
    pub tier: TierClass,
}

/// Owns every bucket in the process.
pub struct TokenBucketStore {
    buckets: DashMap<BucketKey, Arc<Bucket>>,
    window: Duration,
}

impl Default for TokenBucketStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenBucketStore {
    pub fn new() -> Self {
        Self::with_window(REFILL_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            window,
        }
    }

    /// Returns the bucket for `(user, priority tier)`, creating it from `plan`
    /// if this is the first check for the key. Concurrent first checks agree
    /// on a single instance. The plan only matters at creation.
    pub fn resolve(&self, user_id: Uuid, plan: Plan, priority: Priority) -> Arc<Bucket> {
        let key = BucketKey {
            user_id,
            tier: priority.tier(),
        };
        self.buckets
            .entry(key)
            .or_insert_with(|| {
                let capacity = plan.capacity_for(key.tier);
                info!(
                    user_id = %user_id,
                    plan = %plan,
                    priority = %priority,
                    tier = key.tier.as_str(),
                    capacity,
                    "Creating rate-limit bucket"
                );
                metrics::gauge!("ratelimit.buckets").increment(1.0);
                Arc::new(Bucket::new(capacity, self.window))
            })
            .value()
            .clone()
    }

    /// Raw bucket decision: takes one token or reports exhaustion.
    pub fn try_consume(&self, user_id: Uuid, plan: Plan, priority: Priority) -> bool {
        // Shard lock is released before the CAS.
        let bucket = self.resolve(user_id, plan, priority);
        bucket.try_consume()
    }

    pub fn available_tokens(&self, user_id: Uuid, tier: TierClass) -> Option<u32> {
        self.buckets
            .get(&BucketKey { user_id, tier })
            .map(|b| b.available_tokens())
    }

    pub fn contains(&self, user_id: Uuid, tier: TierClass) -> bool {
        self.buckets.contains_key(&BucketKey { user_id, tier })
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// How a request got past the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// CRITICAL: no bucket consulted.
    Bypassed,
    /// A token was consumed.
    Granted,
    /// HIGH on an empty bucket, let through anyway.
    Boosted,
}

impl Admission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Admission::Bypassed => "bypassed",
            Admission::Granted => "granted",
            Admission::Boosted => "boosted",
        }
    }
}

/// Plan/priority policy on top of the bucket store.
pub struct AdmissionController {
    store: TokenBucketStore,
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(TokenBucketStore::new())
    }
}

impl AdmissionController {
    pub fn new(store: TokenBucketStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &TokenBucketStore {
        &self.store
    }

    pub fn try_admit(&self, user_id: Uuid, plan: Plan, priority: Priority) -> bool {
        self.admit(user_id, plan, priority).is_ok()
    }

    /// Applies the admission policy:
    /// CRITICAL always passes without touching a bucket; HIGH passes even when
    /// its bucket is empty; everything else is refused once its bucket is empty.
    pub fn admit(&self, user_id: Uuid, plan: Plan, priority: Priority) -> NotifyResult<Admission> {
        if priority == Priority::Critical {
            debug!(user_id = %user_id, "Bypassing rate limit for CRITICAL request");
            metrics::counter!("ratelimit.admitted", "outcome" => "bypassed").increment(1);
            return Ok(Admission::Bypassed);
        }

        let admission = if self.store.try_consume(user_id, plan, priority) {
            Admission::Granted
        } else if priority == Priority::High {
            warn!(
                user_id = %user_id,
                plan = %plan,
                "Rate limit exceeded for HIGH priority request, allowing it"
            );
            Admission::Boosted
        } else {
            warn!(
                user_id = %user_id,
                plan = %plan,
                priority = %priority,
                "Rate limit exceeded"
            );
            metrics::counter!("ratelimit.denied", "plan" => plan.as_str()).increment(1);
            return Err(NotifyError::rate_limited(user_id, plan, priority));
        };

        metrics::counter!("ratelimit.admitted", "outcome" => admission.as_str()).increment(1);
        Ok(admission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_starts_full_and_never_exceeds_capacity() {
        let epoch = Instant::now();
        let bucket = Bucket::starting_at(5, REFILL_WINDOW, epoch);
        assert_eq!(bucket.available_tokens_at(epoch), 5);

        // An hour idle still caps at capacity.
        let later = epoch + Duration::from_secs(3600);
        assert_eq!(bucket.available_tokens_at(later), 5);
        for _ in 0..5 {
            assert!(bucket.try_consume_at(later));
        }
        assert!(!bucket.try_consume_at(later));
        assert_eq!(bucket.available_tokens_at(later), 0);
    }

    #[test]
    fn test_bucket_refills_in_proportion_to_elapsed_time() {
        let epoch = Instant::now();
        // BASIC: 2 tokens per minute => one token every 30s.
        let bucket = Bucket::starting_at(2, REFILL_WINDOW, epoch);
        assert!(bucket.try_consume_at(epoch));
        assert!(bucket.try_consume_at(epoch));
        assert!(!bucket.try_consume_at(epoch));

        assert!(!bucket.try_consume_at(epoch + Duration::from_secs(29)));
        assert!(bucket.try_consume_at(epoch + Duration::from_secs(30)));
        assert!(!bucket.try_consume_at(epoch + Duration::from_secs(31)));

        assert_eq!(bucket.available_tokens_at(epoch + Duration::from_secs(120)), 2);
    }

    #[test]
    fn test_bucket_refill_interval() {
        let bucket = Bucket::new(200, REFILL_WINDOW);
        assert_eq!(bucket.refill_interval(), Duration::from_millis(300));
    }

    #[test]
    fn test_store_creates_one_bucket_per_tier() {
        let store = TokenBucketStore::new();
        let user = Uuid::new_v4();

        store.try_consume(user, Plan::Basic, Priority::Low);
        store.try_consume(user, Plan::Basic, Priority::Medium);
        store.try_consume(user, Plan::Basic, Priority::Standard);
        assert_eq!(store.len(), 1);

        store.try_consume(user, Plan::Basic, Priority::High);
        assert_eq!(store.len(), 2);
        assert!(store.contains(user, TierClass::High));
    }

    #[test]
    fn test_store_concurrent_first_checks_share_bucket() {
        let store = Arc::new(TokenBucketStore::new());
        let user = Uuid::new_v4();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.try_consume(user, Plan::Premium, Priority::Low))
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(store.len(), 1);
        assert_eq!(admitted, Plan::Premium.tokens_per_minute() as usize);
    }

    #[test]
    fn test_standard_capacity_then_denied() {
        let controller = AdmissionController::default();
        let user = Uuid::new_v4();

        for p in [Priority::Low, Priority::Medium, Priority::Standard] {
            let user = Uuid::new_v4();
            for i in 0..Plan::Premium.tokens_per_minute() {
                assert!(controller.try_admit(user, Plan::Premium, p), "{p} request {i}");
            }
            assert!(!controller.try_admit(user, Plan::Premium, p));
        }

        // BASIC / STANDARD: 2 admitted, the 3rd rejected with the user named.
        assert_eq!(
            controller.admit(user, Plan::Basic, Priority::Standard).unwrap(),
            Admission::Granted
        );
        assert!(controller.admit(user, Plan::Basic, Priority::Standard).is_ok());
        match controller.admit(user, Plan::Basic, Priority::Standard) {
            Err(NotifyError::RateLimitExceeded {
                user_id,
                plan,
                priority,
                admitted,
                ..
            }) => {
                assert_eq!(user_id, user);
                assert_eq!(plan, Plan::Basic);
                assert_eq!(priority, Priority::Standard);
                assert!(!admitted);
            }
            other => panic!("expected RateLimitExceeded, got {other:?}"),
        }
    }

    #[test]
    fn test_critical_bypasses_and_never_touches_buckets() {
        let controller = AdmissionController::default();
        let user = Uuid::new_v4();

        for _ in 0..50 {
            assert_eq!(
                controller.admit(user, Plan::Basic, Priority::Critical).unwrap(),
                Admission::Bypassed
            );
        }
        assert!(controller.store().is_empty());

        // Drain the standard bucket; CRITICAL still passes and leaves it at zero.
        controller.try_admit(user, Plan::Basic, Priority::Low);
        controller.try_admit(user, Plan::Basic, Priority::Low);
        assert!(controller.try_admit(user, Plan::Basic, Priority::Critical));
        assert_eq!(
            controller.store().available_tokens(user, TierClass::Standard),
            Some(0)
        );
    }

    #[test]
    fn test_high_is_boosted_when_empty_unlike_medium() {
        let controller = AdmissionController::default();
        let high_user = Uuid::new_v4();
        let medium_user = Uuid::new_v4();

        // BASIC high bucket holds floor(2 * 1.25) = 2 tokens.
        for _ in 0..2 {
            assert_eq!(
                controller.admit(high_user, Plan::Basic, Priority::High).unwrap(),
                Admission::Granted
            );
            controller.admit(medium_user, Plan::Basic, Priority::Medium).unwrap();
        }

        assert_eq!(
            controller.admit(high_user, Plan::Basic, Priority::High).unwrap(),
            Admission::Boosted
        );
        assert!(controller.admit(medium_user, Plan::Basic, Priority::Medium).is_err());
    }

    #[test]
    fn test_high_uses_separate_bucket() {
        let controller = AdmissionController::default();
        let user = Uuid::new_v4();

        controller.try_admit(user, Plan::Premium, Priority::Low);
        assert_eq!(
            controller.store().available_tokens(user, TierClass::Standard),
            Some(4)
        );
        assert_eq!(controller.store().available_tokens(user, TierClass::High), None);

        controller.try_admit(user, Plan::Premium, Priority::High);
        assert_eq!(
            controller.store().available_tokens(user, TierClass::High),
            Some(5)
        );
    }
}
