//! Admission control and execution plumbing: token buckets, per-user
//! metrics, the enforcement guard, bearer-token verification, backoff
//! and the worker pool.

pub mod auth;
pub mod backoff;
pub mod enforcement;
pub mod executor;
pub mod metrics;
pub mod rate_limit;

pub use auth::{Claims, TokenError, TokenVerifier};
pub use backoff::BackoffPolicy;
pub use enforcement::RateLimitEnforcer;
pub use executor::WorkerPool;
pub use metrics::RateLimitMetrics;
pub use rate_limit::{Admission, AdmissionController, TokenBucketStore};
