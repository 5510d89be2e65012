use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding window rate limiter using in-memory timestamp tracking.
pub struct RateLimiter {
    /// Global request timestamps (sliding window).
    global: Mutex<SlidingWindow>,
    /// Per-key request timestamps (sliding window per key).
    per_key: Mutex<KeyWindows>,
    config: RwLock<RateLimitConfig>,
}

/// Per-key windows plus the time of the last eviction sweep.
///
/// Keys come straight from client headers, so idle windows are evicted once
/// per window length to keep the map bounded by recent traffic.
struct KeyWindows {
    windows: HashMap<String, SlidingWindow>,
    last_sweep: Instant,
}

impl KeyWindows {
    fn new(now: Instant) -> Self {
        Self {
            windows: HashMap::new(),
            last_sweep: now,
        }
    }

    fn sweep_if_due(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_sweep) < WINDOW {
            return;
        }
        self.last_sweep = now;
        let before = self.windows.len();
        self.windows.retain(|_, window| window.count_and_prune(now) > 0);
        let evicted = before - self.windows.len();
        if evicted > 0 {
            tracing::debug!(
                evicted,
                remaining = self.windows.len(),
                "Evicted idle rate-limit keys"
            );
        }
    }
}

#[derive(Default)]
struct SlidingWindow {
    timestamps: VecDeque<Instant>,
}

impl SlidingWindow {
    /// Drop timestamps older than the window and return the current count.
    fn count_and_prune(&mut self, now: Instant) -> u32 {
        while let Some(&oldest) = self.timestamps.front() {
            if now.duration_since(oldest) < WINDOW {
                break;
            }
            self.timestamps.pop_front();
        }
        self.timestamps.len() as u32
    }

    fn reset_secs(&self, now: Instant) -> u64 {
        match self.timestamps.front() {
            Some(&oldest) => WINDOW
                .saturating_sub(now.duration_since(oldest))
                .as_secs()
                .max(1),
            None => WINDOW.as_secs(),
        }
    }
}

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Whether the request was admitted (and counted against the window).
    pub allowed: bool,
    /// Requests remaining in the current window after this one.
    pub remaining: u32,
    /// The most restrictive limit that applied, 0 when unlimited.
    pub limit: u32,
    /// Seconds until the window frees a slot (approximate).
    pub reset_secs: u64,
}

impl Admission {
    fn unlimited() -> Self {
        Self {
            allowed: true,
            remaining: u32::MAX,
            limit: 0,
            reset_secs: 0,
        }
    }
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            global: Mutex::new(SlidingWindow::default()),
            per_key: Mutex::new(KeyWindows::new(Instant::now())),
            config: RwLock::new(config.clone()),
        }
    }

    /// Update configuration (called on hot-reload).
    pub fn update_config(&self, config: &RateLimitConfig) {
        let mut cfg = self.config.write().unwrap_or_else(PoisonError::into_inner);
        *cfg = config.clone();
    }

    pub fn is_enabled(&self) -> bool {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .enabled
    }

    /// Check every applicable limit and, if all pass, record the request.
    ///
    /// `api_key` is None for unauthenticated requests; those are only subject
    /// to the global limit.
    pub fn try_acquire(&self, api_key: Option<&str>) -> Admission {
        self.try_acquire_at(api_key, Instant::now())
    }

    fn try_acquire_at(&self, api_key: Option<&str>, now: Instant) -> Admission {
        let config = self
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if !config.enabled {
            return Admission::unlimited();
        }

        let mut global = self.global.lock().unwrap_or_else(PoisonError::into_inner);
        let mut per_key = self.per_key.lock().unwrap_or_else(PoisonError::into_inner);

        let mut result = Admission::unlimited();
        result.reset_secs = WINDOW.as_secs();

        if config.global_rpm > 0 {
            let count = global.count_and_prune(now);
            if count >= config.global_rpm {
                return Admission {
                    allowed: false,
                    remaining: 0,
                    limit: config.global_rpm,
                    reset_secs: global.reset_secs(now),
                };
            }
            result.remaining = config.global_rpm - count - 1;
            result.limit = config.global_rpm;
        }

        let key_window = match api_key {
            Some(key) if config.per_key_rpm > 0 => {
                per_key.sweep_if_due(now);
                let window = per_key.windows.entry(key.to_string()).or_default();
                let count = window.count_and_prune(now);
                if count >= config.per_key_rpm {
                    return Admission {
                        allowed: false,
                        remaining: 0,
                        limit: config.per_key_rpm,
                        reset_secs: window.reset_secs(now),
                    };
                }
                let remaining = config.per_key_rpm - count - 1;
                if remaining < result.remaining {
                    result.remaining = remaining;
                    result.limit = config.per_key_rpm;
                }
                Some(window)
            }
            _ => None,
        };

        if let Some(window) = key_window {
            window.timestamps.push_back(now);
        }
        if config.global_rpm > 0 {
            global.timestamps.push_back(now);
        }
        result
    }

    /// Number of API keys currently holding a window.
    pub fn tracked_keys(&self) -> usize {
        self.per_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .windows
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(global_rpm: u32, per_key_rpm: u32) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            enabled: true,
            global_rpm,
            per_key_rpm,
        })
    }

    #[test]
    fn test_disabled_allows_all() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            enabled: false,
            global_rpm: 1,
            per_key_rpm: 1,
        });
        for _ in 0..10 {
            assert!(limiter.try_acquire(Some("key1")).allowed);
        }
        assert!(!limiter.is_enabled());
    }

    #[test]
    fn test_global_rpm_limit() {
        let limiter = limiter(3, 0);
        for expected_remaining in [2, 1, 0] {
            let info = limiter.try_acquire(None);
            assert!(info.allowed);
            assert_eq!(info.remaining, expected_remaining);
        }

        let info = limiter.try_acquire(None);
        assert!(!info.allowed);
        assert_eq!(info.remaining, 0);
        assert_eq!(info.limit, 3);
        assert!(info.reset_secs >= 1 && info.reset_secs <= 60);
    }

    #[test]
    fn test_per_key_rpm_limit() {
        let limiter = limiter(0, 2);

        assert!(limiter.try_acquire(Some("key1")).allowed);
        assert!(limiter.try_acquire(Some("key1")).allowed);
        assert!(!limiter.try_acquire(Some("key1")).allowed);

        // key2 still has quota, anonymous requests are unlimited
        assert!(limiter.try_acquire(Some("key2")).allowed);
        assert!(limiter.try_acquire(None).allowed);
    }

    #[test]
    fn test_rejected_key_does_not_consume_global() {
        let limiter = limiter(3, 1);
        assert!(limiter.try_acquire(Some("a")).allowed);
        assert!(!limiter.try_acquire(Some("a")).allowed);
        assert!(!limiter.try_acquire(Some("a")).allowed);
        // Only one global slot used so far
        let info = limiter.try_acquire(Some("b"));
        assert!(info.allowed);
        assert_eq!(info.limit, 1);
        assert!(limiter.try_acquire(None).allowed);
        assert!(!limiter.try_acquire(None).allowed);
    }

    #[test]
    fn test_idle_keys_are_evicted_after_window() {
        let limiter = limiter(0, 5);
        let start = Instant::now();
        for i in 0..1_000 {
            assert!(limiter.try_acquire_at(Some(&format!("k{i}")), start).allowed);
        }
        assert_eq!(limiter.tracked_keys(), 1_000);

        // Still inside the window: nothing is evicted
        let mid = start + Duration::from_secs(30);
        assert!(limiter.try_acquire_at(Some("k0"), mid).allowed);
        assert_eq!(limiter.tracked_keys(), 1_000);

        // One window later only the key with a recent request survives
        let later = start + WINDOW + Duration::from_secs(1);
        assert!(limiter.try_acquire_at(Some("fresh"), later).allowed);
        assert_eq!(limiter.tracked_keys(), 2);

        let idle = later + WINDOW + Duration::from_secs(1);
        assert!(limiter.try_acquire_at(Some("fresh"), idle).allowed);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_update_config() {
        let limiter = limiter(2, 0);
        assert!(limiter.try_acquire(None).allowed);
        assert!(limiter.try_acquire(None).allowed);
        assert!(!limiter.try_acquire(None).allowed);

        limiter.update_config(&RateLimitConfig {
            enabled: true,
            global_rpm: 5,
            per_key_rpm: 0,
        });
        assert!(limiter.try_acquire(None).allowed);
    }
}
