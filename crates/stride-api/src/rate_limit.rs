use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::error::AppError;

/// Fixed-window per-user limiter over the protected endpoints
#[derive(Clone)]
pub struct EndpointRateLimiter {
    state: Arc<Mutex<HashMap<String, RateWindow>>>,
    window: Duration,
    sync_limit: u32,
    history_limit: u32,
    metrics: Arc<RateLimitMetrics>,
}

#[derive(Clone, Copy)]
pub enum ProtectedEndpoint {
    SyncSubmit,
    SyncHistory,
}

#[derive(Default)]
struct RateLimitMetrics {
    sync_allowed: AtomicU64,
    sync_limited: AtomicU64,
    history_allowed: AtomicU64,
    history_limited: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub sync_allowed: u64,
    pub sync_limited: u64,
    pub history_allowed: u64,
    pub history_limited: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    count: u32,
}

impl EndpointRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            window: config.rate_limit_window,
            sync_limit: config.sync_rate_limit_per_window,
            history_limit: config.history_rate_limit_per_window,
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    pub async fn check(&self, endpoint: ProtectedEndpoint, user_id: &str) -> Result<(), AppError> {
        let limit = match endpoint {
            ProtectedEndpoint::SyncSubmit => self.sync_limit,
            ProtectedEndpoint::SyncHistory => self.history_limit,
        };

        let key = format!("{}:{user_id}", endpoint.label());
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let entry = guard.entry(key).or_insert(RateWindow {
            started_at: now,
            count: 0,
        });

        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= limit {
            let retry_after_secs = self
                .window
                .saturating_sub(now.duration_since(entry.started_at))
                .as_secs();
            self.mark_limited(endpoint);
            tracing::warn!(
                endpoint = endpoint.label(),
                user = user_fingerprint(user_id),
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(AppError::too_many_requests(
                "Rate limit exceeded for protected endpoint",
                retry_after_secs,
            ));
        }

        entry.count += 1;
        self.mark_allowed(endpoint);
        Ok(())
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            sync_allowed: self.metrics.sync_allowed.load(Ordering::Relaxed),
            sync_limited: self.metrics.sync_limited.load(Ordering::Relaxed),
            history_allowed: self.metrics.history_allowed.load(Ordering::Relaxed),
            history_limited: self.metrics.history_limited.load(Ordering::Relaxed),
        }
    }

    fn mark_allowed(&self, endpoint: ProtectedEndpoint) {
        match endpoint {
            ProtectedEndpoint::SyncSubmit => {
                self.metrics.sync_allowed.fetch_add(1, Ordering::Relaxed);
            }
            ProtectedEndpoint::SyncHistory => {
                self.metrics.history_allowed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn mark_limited(&self, endpoint: ProtectedEndpoint) {
        match endpoint {
            ProtectedEndpoint::SyncSubmit => {
                self.metrics.sync_limited.fetch_add(1, Ordering::Relaxed);
            }
            ProtectedEndpoint::SyncHistory => {
                self.metrics.history_limited.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl ProtectedEndpoint {
    pub const fn label(self) -> &'static str {
        match self {
            Self::SyncSubmit => "sync_submit",
            Self::SyncHistory => "sync_history",
        }
    }
}

fn user_fingerprint(user_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}
