//! Process-local counters. Each server instance enforces its own limit, so
//! N instances together admit up to N times the configured rate.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{RateLimitError, RateLimitStore, WindowCount};

#[derive(Debug, Clone, Copy)]
struct Entry {
    window_start_ms: i64,
    count: u32,
    expires_at_ms: i64,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    last_cleanup_ms: i64,
}

pub struct InMemoryStore {
    state: Mutex<State>,
    cleanup_interval_ms: i64,
}

impl InMemoryStore {
    pub fn new(cleanup_interval: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            cleanup_interval_ms: i64::try_from(cleanup_interval.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// Number of tracked keys, expired ones included until the next cleanup
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RateLimitStore for InMemoryStore {
    async fn increment(
        &self,
        key: &str,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<WindowCount, RateLimitError> {
        let mut state = self.state.lock().await;

        // Throttled so the map is not scanned on every request
        if now_ms - state.last_cleanup_ms >= self.cleanup_interval_ms {
            let before = state.entries.len();
            state.entries.retain(|_, entry| entry.expires_at_ms > now_ms);
            state.last_cleanup_ms = now_ms;
            let removed = before - state.entries.len();
            if removed > 0 {
                debug!("Removed {} expired rate limit counters", removed);
            }
        }

        let entry = state
            .entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if now_ms >= entry.expires_at_ms {
                    *entry = Entry {
                        window_start_ms: now_ms,
                        count: 1,
                        expires_at_ms: now_ms.saturating_add(window_ms),
                    };
                } else {
                    entry.count = entry.count.saturating_add(1);
                }
            })
            .or_insert(Entry {
                window_start_ms: now_ms,
                count: 1,
                expires_at_ms: now_ms.saturating_add(window_ms),
            });

        Ok(WindowCount {
            count: entry.count,
            window_start_ms: entry.window_start_ms,
        })
    }
}
