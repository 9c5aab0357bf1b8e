// src/core/cancel.rs - Process-wide cancellation token
//
// Core features:
// - Single abort flag shared by every pipeline thread
// - Observed at every blocking-wait point within one timeout interval
// - Cloneable handle, injected at construction instead of a global

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Granularity of interruptible sleeps. Every thread that sleeps through the
/// token wakes at least this often to re-check the flag.
const SLEEP_STEP: Duration = Duration::from_millis(50);

/// Cooperative cancellation handle.
///
/// All pipeline threads hold a clone and exit their loops once `cancel` has
/// been called. In-flight work (an already dequeued frame) is allowed to
/// finish; no new work is started.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request shutdown. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sleep for `dur`, returning early (with `true`) if cancellation is
    /// requested in the meantime.
    pub fn sleep_interruptibly(&self, dur: Duration) -> bool {
        let deadline = Instant::now() + dur;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(SLEEP_STEP.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_clear() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_is_sticky_and_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_interruptible_sleep_returns_early() {
        let token = CancellationToken::new();
        let clone = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            clone.cancel();
        });
        let interrupted = token.sleep_interruptibly(Duration::from_secs(10));
        assert!(interrupted);
        handle.join().unwrap();
    }

    #[test]
    fn test_sleep_runs_to_completion_when_not_cancelled() {
        let token = CancellationToken::new();
        let interrupted = token.sleep_interruptibly(Duration::from_millis(10));
        assert!(!interrupted);
    }
}
