//! Sliding-window rate limiter.
//!
//! In-memory and per-process: counters are keyed by `(identity, scope)`
//! and hold the timestamps of events inside the window. The window
//! slides — it never resets wholesale — so the bucket invariant is that
//! no retained timestamp is older than the window.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use herald_domain::Jid;

/// Default scope applied by the command router.
pub const SCOPE_GLOBAL: &str = "global";

const DEFAULT_MAX_EVENTS: usize = 10;
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    buckets: Mutex<HashMap<(Jid, String), Vec<Instant>>>,
    max_events: usize,
    window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EVENTS, DEFAULT_WINDOW)
    }
}

impl RateLimiter {
    pub fn new(max_events: usize, window: Duration) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            max_events,
            window,
        }
    }

    /// Record an event for `(who, scope)` and return whether it is
    /// allowed. The event that hits the limit is not recorded, so a
    /// blocked sender regains a slot as soon as the oldest event slides
    /// out of the window.
    pub fn check(&self, who: &Jid, scope: &str) -> bool {
        self.check_at(who, scope, Instant::now())
    }

    fn check_at(&self, who: &Jid, scope: &str, now: Instant) -> bool {
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry((who.clone(), scope.to_string()))
            .or_default();
        bucket.retain(|t| now.duration_since(*t) < self.window);
        if bucket.len() >= self.max_events {
            return false;
        }
        bucket.push(now);
        true
    }

    /// Drop empty buckets and expired timestamps. Called from the memory
    /// watermark loop.
    pub fn prune(&self) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        buckets.retain(|_, bucket| {
            bucket.retain(|t| now.duration_since(*t) < self.window);
            !bucket.is_empty()
        });
    }

    pub fn clear(&self) {
        self.buckets.lock().clear();
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jid(n: &str) -> Jid {
        Jid::from_digits(n)
    }

    #[test]
    fn allows_up_to_max() {
        let rl = RateLimiter::new(10, Duration::from_secs(60));
        let who = jid("444");
        for _ in 0..10 {
            assert!(rl.check(&who, SCOPE_GLOBAL));
        }
        assert!(!rl.check(&who, SCOPE_GLOBAL), "11th event is dropped");
    }

    #[test]
    fn window_slides_instead_of_resetting() {
        let rl = RateLimiter::new(10, Duration::from_secs(60));
        let who = jid("444");
        let start = Instant::now();

        // 10 events spread over the first 30 seconds.
        for i in 0..10 {
            assert!(rl.check_at(&who, SCOPE_GLOBAL, start + Duration::from_secs(3 * i)));
        }
        // Still inside the window at second 59: blocked.
        assert!(!rl.check_at(&who, SCOPE_GLOBAL, start + Duration::from_secs(59)));
        // At second 61 the first event (t=0) has slid out: one slot free.
        assert!(rl.check_at(&who, SCOPE_GLOBAL, start + Duration::from_secs(61)));
        // The second event (t=3) is still in the window: blocked again.
        assert!(!rl.check_at(&who, SCOPE_GLOBAL, start + Duration::from_secs(62)));
    }

    #[test]
    fn scopes_are_independent() {
        let rl = RateLimiter::new(1, Duration::from_secs(60));
        let who = jid("444");
        assert!(rl.check(&who, SCOPE_GLOBAL));
        assert!(!rl.check(&who, SCOPE_GLOBAL));
        assert!(rl.check(&who, "economy"), "different scope has its own bucket");
    }

    #[test]
    fn senders_are_independent() {
        let rl = RateLimiter::new(1, Duration::from_secs(60));
        assert!(rl.check(&jid("1"), SCOPE_GLOBAL));
        assert!(rl.check(&jid("2"), SCOPE_GLOBAL));
    }

    #[test]
    fn no_stale_timestamps_survive_check() {
        let rl = RateLimiter::new(10, Duration::from_secs(60));
        let who = jid("444");
        let start = Instant::now();
        rl.check_at(&who, SCOPE_GLOBAL, start);
        rl.check_at(&who, SCOPE_GLOBAL, start + Duration::from_secs(120));
        let buckets = rl.buckets.lock();
        let bucket = buckets.get(&(who, SCOPE_GLOBAL.to_string())).unwrap();
        assert_eq!(bucket.len(), 1, "expired timestamp was evicted");
    }

    #[test]
    fn prune_drops_empty_buckets() {
        let rl = RateLimiter::new(10, Duration::from_millis(0));
        rl.check(&jid("1"), SCOPE_GLOBAL);
        rl.prune();
        assert_eq!(rl.bucket_count(), 0);
    }
}
