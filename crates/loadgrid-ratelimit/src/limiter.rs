//! Per-key sliding-window rate limiter.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, trace};

use loadgrid_state::{Clock, ConfigError};

/// Admission policy: at most `max_requests` within any trailing `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    max_requests: u32,
    window_ms: u64,
}

impl RatePolicy {
    /// Build a policy, rejecting zero limits and zero-length windows.
    pub fn new(max_requests: u32, window: Duration) -> Result<Self, ConfigError> {
        if max_requests == 0 {
            return Err(ConfigError::InvalidPolicy {
                key: String::new(),
                reason: "max_requests must be greater than zero".to_string(),
            });
        }
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        if window_ms == 0 {
            return Err(ConfigError::InvalidPolicy {
                key: String::new(),
                reason: "window must be at least 1ms".to_string(),
            });
        }
        Ok(Self {
            max_requests,
            window_ms,
        })
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Checks between two sweeps of idle windows.
const SWEEP_EVERY: u64 = 1024;

/// Sliding-window admission controller keyed by caller identity.
///
/// Policies and windows live in separate `DashMap`s. A check holds the
/// key's window entry for the whole prune/count/record sequence, so two
/// concurrent checks on one key can never both take the last slot.
///
/// Keys without an explicit policy fall back to the default policy, if
/// any. The fallback is never copied per key, and windows whose every
/// timestamp has aged out are swept every `SWEEP_EVERY` checks, so
/// memory tracks the keys active within one window.
pub struct RateLimiter {
    policies: DashMap<String, RatePolicy>,
    default_policy: Option<RatePolicy>,
    windows: DashMap<String, VecDeque<u64>>,
    checks: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            policies: DashMap::new(),
            default_policy: None,
            windows: DashMap::new(),
            checks: AtomicU64::new(0),
            clock,
        }
    }

    /// Apply `policy` to every key without an explicit one.
    pub fn with_default(mut self, policy: RatePolicy) -> Self {
        self.default_policy = Some(policy);
        self
    }

    pub fn default_policy(&self) -> Option<RatePolicy> {
        self.default_policy
    }

    /// Register or replace the policy for `key`. Recorded timestamps are
    /// kept and judged against the new policy.
    pub fn set_config(&self, key: &str, policy: RatePolicy) {
        self.policies.insert(key.to_string(), policy);
        debug!(
            %key,
            max_requests = policy.max_requests,
            window_ms = policy.window_ms,
            "rate limit policy set"
        );
    }

    /// Remove the explicit policy and window for `key`. It then falls back
    /// to the default policy, or admits freely without one.
    pub fn remove_config(&self, key: &str) -> bool {
        self.windows.remove(key);
        self.policies.remove(key).is_some()
    }

    /// Policy in force for `key`: its own, else the default.
    pub fn policy(&self, key: &str) -> Option<RatePolicy> {
        self.policies
            .get(key)
            .map(|p| *p)
            .or(self.default_policy)
    }

    /// Whether `key` has an explicit policy.
    pub fn has_policy(&self, key: &str) -> bool {
        self.policies.contains_key(key)
    }

    /// Admit or reject one unit of work for `key`.
    ///
    /// Keys with no policy in force are always admitted. Rejected calls are
    /// not recorded, so a caller hammering a full window does not extend it.
    pub fn check_rate_limit(&self, key: &str) -> bool {
        let Some(policy) = self.policy(key) else {
            return true;
        };
        let now = self.clock.now_millis();

        let admitted = {
            let mut window = self.windows.entry(key.to_string()).or_default();
            prune(&mut window, now, policy.window_ms);

            if window.len() >= policy.max_requests as usize {
                trace!(%key, in_window = window.len(), "rate limited");
                false
            } else {
                window.push_back(now);
                true
            }
        };

        // The entry guard is released above; retain takes every shard lock.
        if (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            self.sweep_idle();
        }
        admitted
    }

    /// Admissions left in the current window, or `None` when no policy is
    /// in force for `key`.
    pub fn remaining(&self, key: &str) -> Option<u32> {
        let policy = self.policy(key)?;
        let now = self.clock.now_millis();
        let used = self
            .windows
            .get(key)
            .map(|w| {
                w.iter()
                    .filter(|&&ts| now.saturating_sub(ts) < policy.window_ms)
                    .count()
            })
            .unwrap_or(0);
        Some(policy.max_requests.saturating_sub(used as u32))
    }

    /// Drop windows holding no live timestamps. Returns how many were
    /// dropped.
    pub fn sweep_idle(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.windows.len();
        self.windows.retain(|key, window| match self.policy(key) {
            Some(policy) => {
                prune(window, now, policy.window_ms);
                !window.is_empty()
            }
            None => false,
        });
        let dropped = before.saturating_sub(self.windows.len());
        if dropped > 0 {
            trace!(dropped, "idle rate windows swept");
        }
        dropped
    }

    /// Keys currently holding a window.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Forget recorded admissions for `key`; its policy is kept.
    pub fn clear(&self, key: &str) {
        self.windows.remove(key);
    }

    /// Forget recorded admissions for every key.
    pub fn clear_all(&self) {
        self.windows.clear();
    }
}

/// Drop timestamps at least `window_ms` old. A timestamp exactly one
/// window old no longer counts.
fn prune(window: &mut VecDeque<u64>, now: u64, window_ms: u64) {
    while let Some(&oldest) = window.front() {
        if now.saturating_sub(oldest) >= window_ms {
            window.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadgrid_state::ManualClock;

    fn limiter() -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::new(clock.clone());
        (clock, limiter)
    }

    fn policy(max: u32, window_ms: u64) -> RatePolicy {
        RatePolicy::new(max, Duration::from_millis(window_ms)).unwrap()
    }

    #[test]
    fn invalid_policies_rejected() {
        assert!(RatePolicy::new(0, Duration::from_secs(1)).is_err());
        assert!(RatePolicy::new(5, Duration::ZERO).is_err());
        assert!(RatePolicy::new(5, Duration::from_micros(500)).is_err());
    }

    #[test]
    fn sliding_window_sequence() {
        let (clock, limiter) = limiter();
        limiter.set_config("api", policy(3, 1000));

        for t in [0, 100, 200] {
            clock.set(t);
            assert!(limiter.check_rate_limit("api"), "t={t} should be admitted");
        }

        clock.set(300);
        assert!(!limiter.check_rate_limit("api"));

        clock.set(1001);
        assert!(limiter.check_rate_limit("api"));
    }

    #[test]
    fn timestamp_exactly_one_window_old_is_excluded() {
        let (clock, limiter) = limiter();
        limiter.set_config("k", policy(1, 1000));

        assert!(limiter.check_rate_limit("k"));
        clock.set(999);
        assert!(!limiter.check_rate_limit("k"));
        clock.set(1000);
        assert!(limiter.check_rate_limit("k"));
    }

    #[test]
    fn window_slides_rather_than_resets() {
        let (clock, limiter) = limiter();
        limiter.set_config("k", policy(2, 1000));

        clock.set(0);
        assert!(limiter.check_rate_limit("k"));
        clock.set(900);
        assert!(limiter.check_rate_limit("k"));

        // A fixed bucket would reset at 1000; the window still holds t=900.
        clock.set(1000);
        assert!(limiter.check_rate_limit("k"));
        clock.set(1100);
        assert!(!limiter.check_rate_limit("k"));
        clock.set(1900);
        assert!(limiter.check_rate_limit("k"));
    }

    #[test]
    fn rejections_are_not_recorded() {
        let (clock, limiter) = limiter();
        limiter.set_config("k", policy(1, 1000));

        assert!(limiter.check_rate_limit("k"));
        for t in (100..1000).step_by(100) {
            clock.set(t);
            assert!(!limiter.check_rate_limit("k"));
        }
        clock.set(1000);
        assert!(limiter.check_rate_limit("k"));
    }

    #[test]
    fn unconfigured_key_fails_open() {
        let (_, limiter) = limiter();
        for _ in 0..1000 {
            assert!(limiter.check_rate_limit("anyone"));
        }
        assert_eq!(limiter.remaining("anyone"), None);
    }

    #[test]
    fn keys_are_independent() {
        let (_, limiter) = limiter();
        limiter.set_config("a", policy(1, 1000));
        limiter.set_config("b", policy(1, 1000));

        assert!(limiter.check_rate_limit("a"));
        assert!(!limiter.check_rate_limit("a"));
        assert!(limiter.check_rate_limit("b"));
    }

    #[test]
    fn clear_behaves_like_fresh_key() {
        let (clock, limiter) = limiter();
        limiter.set_config("used", policy(2, 1000));
        limiter.set_config("fresh", policy(2, 1000));

        assert!(limiter.check_rate_limit("used"));
        assert!(limiter.check_rate_limit("used"));
        assert!(!limiter.check_rate_limit("used"));

        clock.set(10);
        limiter.clear("used");

        let used: Vec<bool> = (0..3).map(|_| limiter.check_rate_limit("used")).collect();
        let fresh: Vec<bool> = (0..3).map(|_| limiter.check_rate_limit("fresh")).collect();
        assert_eq!(used, fresh);
        assert_eq!(used, vec![true, true, false]);
    }

    #[test]
    fn clear_all_keeps_policies() {
        let (_, limiter) = limiter();
        limiter.set_config("a", policy(1, 1000));
        assert!(limiter.check_rate_limit("a"));

        limiter.clear_all();
        assert!(limiter.has_policy("a"));
        assert!(limiter.check_rate_limit("a"));
        assert!(!limiter.check_rate_limit("a"));
    }

    #[test]
    fn remove_config_fails_open_again() {
        let (_, limiter) = limiter();
        limiter.set_config("a", policy(1, 1000));
        assert!(limiter.check_rate_limit("a"));
        assert!(!limiter.check_rate_limit("a"));

        assert!(limiter.remove_config("a"));
        assert!(limiter.check_rate_limit("a"));
        assert!(!limiter.remove_config("a"));
    }

    #[test]
    fn remaining_counts_live_admissions() {
        let (clock, limiter) = limiter();
        limiter.set_config("k", policy(3, 1000));
        assert_eq!(limiter.remaining("k"), Some(3));

        limiter.check_rate_limit("k");
        clock.set(500);
        limiter.check_rate_limit("k");
        assert_eq!(limiter.remaining("k"), Some(1));

        clock.set(1000);
        assert_eq!(limiter.remaining("k"), Some(2));
    }

    #[test]
    fn replacing_policy_applies_to_existing_window() {
        let (_, limiter) = limiter();
        limiter.set_config("k", policy(5, 1000));
        for _ in 0..3 {
            assert!(limiter.check_rate_limit("k"));
        }

        limiter.set_config("k", policy(3, 1000));
        assert!(!limiter.check_rate_limit("k"));
    }

    #[test]
    fn default_policy_applies_without_per_key_copies() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::new(clock.clone()).with_default(policy(1, 1000));
        limiter.set_config("partner", policy(3, 1000));

        assert!(limiter.check_rate_limit("client-a"));
        assert!(!limiter.check_rate_limit("client-a"));
        assert_eq!(limiter.remaining("client-a"), Some(0));
        assert!(!limiter.has_policy("client-a"));

        for _ in 0..3 {
            assert!(limiter.check_rate_limit("partner"));
        }
        assert!(!limiter.check_rate_limit("partner"));

        assert!(limiter.remove_config("partner"));
        assert_eq!(limiter.policy("partner"), Some(policy(1, 1000)));
    }

    #[test]
    fn sweep_drops_aged_out_windows() {
        let (clock, limiter) = limiter();
        limiter.set_config("old", policy(5, 1000));
        limiter.set_config("live", policy(5, 1000));

        assert!(limiter.check_rate_limit("old"));
        clock.set(600);
        assert!(limiter.check_rate_limit("live"));
        clock.set(1000);

        assert_eq!(limiter.sweep_idle(), 1);
        assert_eq!(limiter.tracked_keys(), 1);
        assert_eq!(limiter.remaining("live"), Some(4));
        assert_eq!(limiter.remaining("old"), Some(5));
    }

    #[test]
    fn distinct_clients_do_not_accumulate() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::new(clock.clone()).with_default(policy(1, 1000));

        for i in 0..5000 {
            assert!(limiter.check_rate_limit(&format!("client-{i}")));
        }
        clock.set(1000);
        for i in 5000..8000 {
            assert!(limiter.check_rate_limit(&format!("client-{i}")));
        }

        // Windows from the first burst aged out and were swept in passing.
        assert!(limiter.tracked_keys() <= 3000);
        assert!(!limiter.has_policy("client-0"));

        clock.set(2000);
        limiter.sweep_idle();
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn concurrent_checks_never_exceed_limit() {
        use std::sync::atomic::AtomicU32;
        use std::thread;

        let clock = Arc::new(ManualClock::new(0));
        let limiter = Arc::new(RateLimiter::new(clock));
        limiter.set_config("shared", policy(50, 60_000));
        let admitted = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                let admitted = admitted.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        if limiter.check_rate_limit("shared") {
                            admitted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(admitted.load(Ordering::Relaxed), 50);
    }
}
