//! Shared resilience primitives: jittered backoff, retry, and timeout
//! wrappers for suspension points that cross a process boundary — database
//! pool creation, the stream log's publish path, and per-session transport
//! writes wrap these; the outbox consumer's own retry loop uses
//! [`backoff::compute`] directly instead, since it persists its own
//! `retry_count`.

pub mod backoff;
pub mod retry;
pub mod timeout;

pub use backoff::{compute as compute_backoff, BackoffConfig};
pub use retry::{with_retry, RetryConfig, RetryError};
pub use timeout::{with_timeout, with_timeout_result, TimeoutConfig, TimeoutError};
