use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per key in one window
    pub limit: u32,
    pub window: Duration,
    /// Minimum time between sweeps of expired counters
    pub cleanup_interval: Duration,
    /// Peers whose `X-Forwarded-For` header is believed. Empty means the
    /// header is ignored and every client is keyed by its socket address.
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 60,
            window: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60),
            trusted_proxies: Vec::new(),
        }
    }
}
