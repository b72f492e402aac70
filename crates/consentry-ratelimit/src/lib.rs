//! # consentry-ratelimit
//!
//! Fixed-window counters keyed by an opaque caller identity. The in-memory
//! store only sees the requests of its own process; run the database store
//! when several server instances share one limit.

mod config;
mod error;
mod limiter;
mod memory;
mod middleware;
mod sql;

pub use config::RateLimitConfig;
pub use error::RateLimitError;
pub use limiter::{RateLimitDecision, RateLimitStore, RateLimiter, WindowCount};
pub use memory::InMemoryStore;
pub use middleware::{client_key, rate_limit_middleware};
pub use sql::DatabaseStore;
