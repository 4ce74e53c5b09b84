//! Cancellable timer handles for one session
//!
//! Each session may have at most one pending timer of each kind. Arming a
//! kind replaces (and aborts) any previous occupant; clearing is
//! idempotent.

use tokio::task::JoinHandle;

/// The three delayed actions a session can have pending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Preemptive ticket renewal
    Refresh,
    /// Hard expiry safety net
    HardExpire,
    /// Reconnect backoff
    Reconnect,
}

/// Holder for the session's timer tasks
#[derive(Debug, Default)]
pub struct TimerSet {
    refresh: Option<JoinHandle<()>>,
    hard_expire: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, kind: TimerKind) -> &mut Option<JoinHandle<()>> {
        match kind {
            TimerKind::Refresh => &mut self.refresh,
            TimerKind::HardExpire => &mut self.hard_expire,
            TimerKind::Reconnect => &mut self.reconnect,
        }
    }

    /// Arm `kind`, aborting any previously armed timer of the same kind
    pub fn arm(&mut self, kind: TimerKind, handle: JoinHandle<()>) {
        if let Some(prev) = self.slot(kind).replace(handle) {
            prev.abort();
        }
    }

    /// Disarm one kind. Idempotent.
    pub fn clear(&mut self, kind: TimerKind) {
        if let Some(handle) = self.slot(kind).take() {
            handle.abort();
        }
    }

    /// Disarm everything. Idempotent and total.
    pub fn clear_all(&mut self) {
        self.clear(TimerKind::Refresh);
        self.clear(TimerKind::HardExpire);
        self.clear(TimerKind::Reconnect);
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::Refresh => self.refresh.is_some(),
            TimerKind::HardExpire => self.hard_expire.is_some(),
            TimerKind::Reconnect => self.reconnect.is_some(),
        }
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.clear_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn fire_after(counter: Arc<AtomicU32>, delay: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_replaces_previous() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut timers = TimerSet::new();

        timers.arm(
            TimerKind::Refresh,
            fire_after(fired.clone(), Duration::from_secs(1)),
        );
        timers.arm(
            TimerKind::Refresh,
            fire_after(fired.clone(), Duration::from_secs(2)),
        );
        assert!(timers.is_armed(TimerKind::Refresh));

        tokio::time::sleep(Duration::from_secs(5)).await;
        // Only the replacement fired; the first was aborted
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all_idempotent() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut timers = TimerSet::new();

        timers.arm(
            TimerKind::Refresh,
            fire_after(fired.clone(), Duration::from_secs(1)),
        );
        timers.arm(
            TimerKind::HardExpire,
            fire_after(fired.clone(), Duration::from_secs(2)),
        );
        timers.arm(
            TimerKind::Reconnect,
            fire_after(fired.clone(), Duration::from_secs(3)),
        );

        timers.clear_all();
        timers.clear_all();
        assert!(!timers.is_armed(TimerKind::Refresh));
        assert!(!timers.is_armed(TimerKind::HardExpire));
        assert!(!timers.is_armed(TimerKind::Reconnect));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kinds_are_independent() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut timers = TimerSet::new();

        timers.arm(
            TimerKind::Refresh,
            fire_after(fired.clone(), Duration::from_secs(1)),
        );
        timers.arm(
            TimerKind::HardExpire,
            fire_after(fired.clone(), Duration::from_secs(2)),
        );
        timers.clear(TimerKind::Refresh);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
