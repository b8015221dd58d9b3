use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default coalescing window for remote-change notifications.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(1);

/// Process-wide counter bumped whenever a remote replica merges changes
/// into the local store. Carries no payload — consumers re-fetch to learn
/// what changed.
#[derive(Clone, Debug, Default)]
pub struct RemoteChangeSignal {
    received: Arc<AtomicU64>,
}

impl RemoteChangeSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.received.fetch_add(1, Ordering::SeqCst);
    }

    /// Raw received count. The mirror compares this across a load to detect
    /// mid-load churn; reload decisions go through the debouncer instead.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }
}

/// Coalesces bursts of remote-change notifications into a published
/// "reload needed" counter.
///
/// Poll-driven: `poll_at` republishes the received count once a full
/// window has passed with no further notifications. While suspended the
/// published value is pinned even though the received count keeps
/// advancing; after `resume`, the next poll past the window catches up.
/// Callers compare [`published`](Self::published) against the counter the
/// mirror recorded at its last load.
pub struct RemoteChangeDebouncer {
    signal: RemoteChangeSignal,
    window: Duration,
    suspended: bool,
    seen: u64,
    published: u64,
    quiet_since: Option<Instant>,
}

impl RemoteChangeDebouncer {
    #[must_use]
    pub fn new(signal: RemoteChangeSignal) -> Self {
        Self::with_window(signal, DEBOUNCE_WINDOW)
    }

    #[must_use]
    pub fn with_window(signal: RemoteChangeSignal, window: Duration) -> Self {
        let seen = signal.count();
        RemoteChangeDebouncer {
            signal,
            window,
            suspended: false,
            seen,
            published: seen,
            quiet_since: None,
        }
    }

    /// Pin the published counter while a local batch edit is in flight, so
    /// the edit does not trigger a self-reload.
    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    pub fn resume(&mut self) {
        self.suspended = false;
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Last externally-visible counter value.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn poll(&mut self) -> u64 {
        self.poll_at(Instant::now())
    }

    /// Deterministic variant for tests and host event loops that carry
    /// their own clock.
    pub fn poll_at(&mut self, now: Instant) -> u64 {
        let count = self.signal.count();
        if count > self.seen {
            self.seen = count;
            self.quiet_since = Some(now);
        }
        if !self.suspended
            && self
                .quiet_since
                .is_some_and(|since| now.duration_since(since) >= self.window)
        {
            self.published = self.seen;
            self.quiet_since = None;
        }
        self.published
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(10);

    fn debouncer() -> (RemoteChangeSignal, RemoteChangeDebouncer) {
        let signal = RemoteChangeSignal::new();
        let debouncer = RemoteChangeDebouncer::with_window(signal.clone(), WINDOW);
        (signal, debouncer)
    }

    #[test]
    fn test_quiet_signal_publishes_nothing() {
        let (_signal, mut debouncer) = debouncer();
        let base = Instant::now();
        assert_eq!(debouncer.poll_at(base), 0);
        assert_eq!(debouncer.poll_at(base + WINDOW * 5), 0);
    }

    #[test]
    fn test_burst_coalesces_into_one_bump() {
        let (signal, mut debouncer) = debouncer();
        let base = Instant::now();
        signal.notify();
        signal.notify();
        signal.notify();
        // Within the window nothing surfaces yet.
        assert_eq!(debouncer.poll_at(base), 0);
        // One window later the whole burst lands at once.
        assert_eq!(debouncer.poll_at(base + WINDOW), 3);
    }

    #[test]
    fn test_new_notification_restarts_window() {
        let (signal, mut debouncer) = debouncer();
        let base = Instant::now();
        signal.notify();
        assert_eq!(debouncer.poll_at(base), 0);
        signal.notify();
        assert_eq!(debouncer.poll_at(base + WINDOW / 2), 0);
        // Only half a window since the second notification was observed.
        assert_eq!(debouncer.poll_at(base + WINDOW), 0);
        assert_eq!(debouncer.poll_at(base + WINDOW / 2 + WINDOW), 2);
    }

    #[test]
    fn test_suspension_pins_published_counter() {
        let (signal, mut debouncer) = debouncer();
        let base = Instant::now();
        debouncer.suspend();
        signal.notify();
        assert_eq!(debouncer.poll_at(base), 0);
        signal.notify();
        signal.notify();
        assert_eq!(debouncer.poll_at(base + WINDOW * 10), 0);
        assert_eq!(debouncer.published(), 0);
    }

    #[test]
    fn test_resume_converges_within_one_window() {
        let (signal, mut debouncer) = debouncer();
        let base = Instant::now();
        debouncer.suspend();
        signal.notify();
        signal.notify();
        assert_eq!(debouncer.poll_at(base), 0);
        debouncer.resume();
        assert_eq!(debouncer.poll_at(base + WINDOW), 2);
    }

    #[test]
    fn test_changes_before_construction_count_as_published() {
        let signal = RemoteChangeSignal::new();
        signal.notify();
        let mut debouncer = RemoteChangeDebouncer::with_window(signal.clone(), WINDOW);
        // Pre-existing changes are the baseline, not a pending reload.
        assert_eq!(debouncer.poll_at(Instant::now()), 1);
    }

    #[test]
    fn test_signal_is_shared_between_clones() {
        let signal = RemoteChangeSignal::new();
        let clone = signal.clone();
        clone.notify();
        assert_eq!(signal.count(), 1);
    }
}
