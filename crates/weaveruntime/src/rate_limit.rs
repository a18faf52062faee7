//! Fixed-window request limiting for webhook endpoints.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// N requests per T-second window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_seconds: u64) -> Self {
        Self {
            max_requests,
            window_seconds,
        }
    }

    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, 60)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed { remaining: u32 },
    Exceeded { retry_after: Duration },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

#[derive(Debug)]
struct WindowState {
    count: u32,
    window_start: Instant,
}

/// Counter for a single endpoint.
///
/// The count is read and incremented under one lock, so concurrent requests
/// can never push it past `max_requests` within a window.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    config: RateLimitConfig,
    state: Mutex<WindowState>,
}

impl FixedWindowLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(WindowState {
                count: 0,
                window_start: Instant::now(),
            }),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Count one request against the current window.
    pub fn check(&self) -> RateLimitResult {
        self.check_at(Instant::now())
    }

    fn check_at(&self, now: Instant) -> RateLimitResult {
        let window = Duration::from_secs(self.config.window_seconds);
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if now.duration_since(state.window_start) >= window {
            state.count = 0;
            state.window_start = now;
        }

        if state.count >= self.config.max_requests {
            let elapsed = now.duration_since(state.window_start);
            return RateLimitResult::Exceeded {
                retry_after: window.saturating_sub(elapsed),
            };
        }

        state.count += 1;
        RateLimitResult::Allowed {
            remaining: self.config.max_requests - state.count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn third_request_in_window_is_rejected() {
        let limiter = FixedWindowLimiter::new(RateLimitConfig::new(2, 60));
        assert_eq!(limiter.check(), RateLimitResult::Allowed { remaining: 1 });
        assert_eq!(limiter.check(), RateLimitResult::Allowed { remaining: 0 });
        assert!(!limiter.check().is_allowed());
    }

    #[test]
    fn window_resets_after_expiry() {
        let limiter = FixedWindowLimiter::new(RateLimitConfig::new(1, 1));
        let start = Instant::now();
        assert!(limiter.check_at(start).is_allowed());
        assert!(!limiter.check_at(start + Duration::from_millis(500)).is_allowed());
        assert!(limiter.check_at(start + Duration::from_secs(2)).is_allowed());
    }

    #[test]
    fn concurrent_checks_never_exceed_ceiling() {
        let limiter = Arc::new(FixedWindowLimiter::new(RateLimitConfig::new(5, 60)));
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || limiter.check().is_allowed())
            })
            .collect();
        let allowed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(allowed, 5);
    }
}
