//! Per-user sliding-window flood control.
//!
//! Every inbound command is checked here before it reaches a handler. The
//! window state is the only shared mutable state touched from concurrent
//! command tasks, so each user's timestamp queue sits behind its own mutex:
//! two near-simultaneous admits for the same user serialize their
//! read-modify-write and can never both slip past a full window.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::UserId;

/// Outcome of an admission check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(self) -> bool {
        matches!(self, Admission::Allowed)
    }

    /// Retry-after in whole seconds, rounded up (user-visible cooldown).
    pub fn retry_after_secs(self) -> u64 {
        match self {
            Admission::Allowed => 0,
            Admission::Rejected { retry_after } => {
                let ms = retry_after.as_millis() as u64;
                ms.div_ceil(1000)
            }
        }
    }
}

pub struct FloodControl {
    max_requests: usize,
    window: Duration,
    enabled: bool,
    windows: Mutex<HashMap<UserId, Arc<Mutex<VecDeque<Instant>>>>>,
}

impl FloodControl {
    /// Fails open on a non-positive limit or zero window: the limiter
    /// disables itself and logs the anomaly instead of blocking all traffic.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        let enabled = max_requests > 0 && !window.is_zero();
        if !enabled {
            eprintln!(
                "[FLOOD] invalid limiter config (max_requests={max_requests}, window={window:?}); failing open"
            );
        }

        Self {
            max_requests: max_requests as usize,
            window,
            enabled,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub async fn admit(&self, user: UserId, exempt: bool) -> Admission {
        self.admit_at(user, exempt, Instant::now()).await
    }

    pub async fn admit_at(&self, user: UserId, exempt: bool, now: Instant) -> Admission {
        // Exempt identities accumulate no window entries at all.
        if exempt || !self.enabled {
            return Admission::Allowed;
        }

        let window = self.window_for(user).await;
        let mut entries = window.lock().await;

        prune(&mut entries, now, self.window);

        if entries.len() >= self.max_requests {
            let Some(&oldest) = entries.front() else {
                // max_requests >= 1 when enabled, so a full window is never empty.
                return Admission::Allowed;
            };
            // A rejected attempt is not recorded as a new timestamp.
            let retry_after = self.window.saturating_sub(now.duration_since(oldest));
            return Admission::Rejected { retry_after };
        }

        entries.push_back(now);
        Admission::Allowed
    }

    /// Drop expired entries for every tracked user and forget users whose
    /// window drained empty. Bounds memory for an unbounded user population.
    pub async fn sweep(&self) {
        self.sweep_at(Instant::now()).await;
    }

    pub async fn sweep_at(&self, now: Instant) {
        let mut map = self.windows.lock().await;
        let mut drained = Vec::new();

        for (user, window) in map.iter() {
            let mut entries = window.lock().await;
            prune(&mut entries, now, self.window);
            // An outstanding clone means an admit already resolved this
            // window and will record into it once it gets the lock; removing
            // the map entry now would orphan that write.
            if entries.is_empty() && Arc::strong_count(window) == 1 {
                drained.push(*user);
            }
        }

        for user in drained {
            map.remove(&user);
        }
    }

    /// Spawn the periodic sweep task. Runs until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let flood = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.tick().await; // the first tick completes immediately
            loop {
                tokio::select! {
                  _ = cancel.cancelled() => break,
                  _ = tick.tick() => flood.sweep().await,
                }
            }
        })
    }

    /// Number of users currently holding window state.
    pub async fn tracked_users(&self) -> usize {
        self.windows.lock().await.len()
    }

    async fn window_for(&self, user: UserId) -> Arc<Mutex<VecDeque<Instant>>> {
        let mut map = self.windows.lock().await;
        map.entry(user)
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone()
    }
}

fn prune(entries: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while entries
        .front()
        .map(|t| now.duration_since(*t) >= window)
        .unwrap_or(false)
    {
        entries.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    fn limiter(max: u32) -> FloodControl {
        FloodControl::new(max, WINDOW)
    }

    #[tokio::test]
    async fn caps_requests_within_the_window() {
        let fc = limiter(3);
        let u = UserId(1);
        let start = Instant::now();

        for _ in 0..3 {
            assert!(fc.admit_at(u, false, start).await.is_allowed());
        }
        assert!(!fc.admit_at(u, false, start).await.is_allowed());
    }

    #[tokio::test]
    async fn rejected_attempts_are_not_recorded() {
        let fc = limiter(2);
        let u = UserId(1);
        let start = Instant::now();

        assert!(fc.admit_at(u, false, start).await.is_allowed());
        assert!(fc.admit_at(u, false, start).await.is_allowed());

        // Hammering while full must not extend the cooldown.
        for i in 1..10 {
            let at = start + Duration::from_secs(i);
            assert!(!fc.admit_at(u, false, at).await.is_allowed());
        }

        // Once the oldest entry exits the window, a slot opens.
        assert!(fc
            .admit_at(u, false, start + WINDOW)
            .await
            .is_allowed());
    }

    #[tokio::test]
    async fn retry_after_decreases_toward_the_window_boundary() {
        let fc = limiter(1);
        let u = UserId(1);
        let start = Instant::now();

        assert!(fc.admit_at(u, false, start).await.is_allowed());

        let at_10 = fc.admit_at(u, false, start + Duration::from_secs(10)).await;
        let at_50 = fc.admit_at(u, false, start + Duration::from_secs(50)).await;
        assert_eq!(at_10.retry_after_secs(), 50);
        assert_eq!(at_50.retry_after_secs(), 10);
        assert!(at_10.retry_after_secs() > at_50.retry_after_secs());
    }

    #[tokio::test]
    async fn retry_after_rounds_sub_second_remainders_up() {
        let fc = limiter(1);
        let u = UserId(1);
        let start = Instant::now();

        assert!(fc.admit_at(u, false, start).await.is_allowed());
        let rejected = fc
            .admit_at(u, false, start + WINDOW - Duration::from_millis(300))
            .await;
        assert_eq!(rejected.retry_after_secs(), 1);
    }

    #[tokio::test]
    async fn exempt_users_are_never_rejected_and_never_tracked() {
        let fc = limiter(1);
        let u = UserId(1);
        let start = Instant::now();

        for _ in 0..100 {
            assert!(fc.admit_at(u, true, start).await.is_allowed());
        }
        assert_eq!(fc.tracked_users().await, 0);
    }

    #[tokio::test]
    async fn independent_users_do_not_share_windows() {
        let fc = limiter(1);
        let start = Instant::now();

        assert!(fc.admit_at(UserId(1), false, start).await.is_allowed());
        assert!(fc.admit_at(UserId(2), false, start).await.is_allowed());
        assert!(!fc.admit_at(UserId(1), false, start).await.is_allowed());
    }

    #[tokio::test]
    async fn concurrent_admits_never_exceed_the_cap() {
        let fc = Arc::new(limiter(5));
        let u = UserId(7);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let fc = Arc::clone(&fc);
            handles.push(tokio::spawn(async move { fc.admit(u, false).await }));
        }

        let mut allowed = 0;
        for h in handles {
            if h.await.unwrap().is_allowed() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }

    #[tokio::test]
    async fn sweep_forgets_idle_users() {
        let fc = limiter(3);
        let start = Instant::now();

        fc.admit_at(UserId(1), false, start).await;
        fc.admit_at(UserId(2), false, start).await;
        assert_eq!(fc.tracked_users().await, 2);

        // Still inside the window: entries survive.
        fc.sweep_at(start + Duration::from_secs(30)).await;
        assert_eq!(fc.tracked_users().await, 2);

        fc.sweep_at(start + WINDOW).await;
        assert_eq!(fc.tracked_users().await, 0);
    }

    #[tokio::test]
    async fn sweep_keeps_windows_with_an_admit_in_flight() {
        let fc = limiter(1);
        let u = UserId(1);
        let start = Instant::now();

        assert!(fc.admit_at(u, false, start).await.is_allowed());

        // An admit that has resolved its window but not yet locked it.
        let in_flight = fc.window_for(u).await;
        fc.sweep_at(start + WINDOW).await;

        // The sweep pruned the expired entry but must leave the map entry in
        // place: the pending admit records into the same window the next
        // lookup sees.
        {
            let mut entries = in_flight.lock().await;
            entries.push_back(start + WINDOW);
        }
        assert!(!fc
            .admit_at(u, false, start + WINDOW)
            .await
            .is_allowed());
        assert_eq!(fc.tracked_users().await, 1);
    }

    #[tokio::test]
    async fn invalid_config_fails_open() {
        let zero_limit = FloodControl::new(0, WINDOW);
        let zero_window = FloodControl::new(5, Duration::ZERO);
        let u = UserId(1);
        let start = Instant::now();

        for _ in 0..50 {
            assert!(zero_limit.admit_at(u, false, start).await.is_allowed());
            assert!(zero_window.admit_at(u, false, start).await.is_allowed());
        }
    }
}
