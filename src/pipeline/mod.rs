//! Per-sentence processing stages between the source and the sinks.
//!
//! Each stage is synchronous and cheap; the session drives them in order
//! for every sentence the parser yields: filter, rate limiter, health
//! monitor.

mod filter;
mod health;
mod rate_limit;

pub use filter::SentenceFilter;
pub use health::{HealthMonitor, HealthStatus, DEFAULT_STALE_AFTER};
pub use rate_limit::RateLimiter;
