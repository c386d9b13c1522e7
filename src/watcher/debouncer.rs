//! Shared rescan debouncing.
//!
//! Every watched folder pokes the same debouncer when it sees a change, so a
//! burst of notifications across many folders turns into a single scan sweep.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Counters for observing how well requests are being coalesced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebounceStats {
    /// Calls to [`ScanDebouncer::schedule_scan`].
    pub requests: u64,
    /// Times [`ScanDebouncer::take_ready`] returned `true`.
    pub wakeups: u64,
}

#[derive(Debug, Default)]
struct PendingState {
    /// Oldest request not yet handed out.
    first: Option<Instant>,
    /// Most recent request.
    last: Option<Instant>,
    stats: DebounceStats,
}

/// Coalesces scan requests into wake-ups.
///
/// A pending request becomes ready once no further request has arrived for
/// the debounce duration, or once it has been pending for `max_delay`, so a
/// steady stream of changes cannot postpone scanning forever.
#[derive(Debug)]
pub struct ScanDebouncer {
    state: Mutex<PendingState>,
    /// How long requests must be quiet before a wake-up.
    duration: Duration,
    /// Upper bound on how long a request may wait.
    max_delay: Duration,
}

impl ScanDebouncer {
    /// Create a debouncer with the given quiet period and ceiling, in milliseconds.
    pub fn new(debounce_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            state: Mutex::new(PendingState::default()),
            duration: Duration::from_millis(debounce_ms),
            max_delay: Duration::from_millis(max_delay_ms.max(debounce_ms)),
        }
    }

    /// Record that at least one rescan is wanted soon.
    pub fn schedule_scan(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.first.get_or_insert(now);
        state.last = Some(now);
        state.stats.requests += 1;
    }

    /// Return `true` once per pending burst, when it is ready to be scanned.
    ///
    /// Requests arriving after this returns start a new burst.
    pub fn take_ready(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        let (Some(first), Some(last)) = (state.first, state.last) else {
            return false;
        };

        let quiet = now.duration_since(last) >= self.duration;
        let overdue = now.duration_since(first) >= self.max_delay;
        if !(quiet || overdue) {
            return false;
        }

        state.first = None;
        state.last = None;
        state.stats.wakeups += 1;
        true
    }

    /// Check if a scan has been requested and not yet handed out.
    pub fn has_pending(&self) -> bool {
        self.state.lock().first.is_some()
    }

    pub fn stats(&self) -> DebounceStats {
        self.state.lock().stats
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl Default for ScanDebouncer {
    fn default() -> Self {
        Self::new(500, 5_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread::sleep;

    #[test]
    fn test_debouncer_basic() {
        let debouncer = ScanDebouncer::new(50, 1_000); // 50ms debounce

        debouncer.schedule_scan();

        // Immediately after, nothing should be ready
        assert!(!debouncer.take_ready());
        assert!(debouncer.has_pending());

        // Wait for debounce period
        sleep(Duration::from_millis(60));

        assert!(debouncer.take_ready());
        assert!(!debouncer.has_pending());
        // Handed out once only
        assert!(!debouncer.take_ready());
    }

    #[test]
    fn test_debouncer_resets_on_new_request() {
        let debouncer = ScanDebouncer::new(50, 1_000);

        debouncer.schedule_scan();
        sleep(Duration::from_millis(30));

        // Request again - should reset the quiet period
        debouncer.schedule_scan();
        sleep(Duration::from_millis(30));

        // Only 30ms since the last request
        assert!(!debouncer.take_ready());

        sleep(Duration::from_millis(30));
        assert!(debouncer.take_ready());
    }

    #[test]
    fn test_burst_coalesces_into_one_wakeup() {
        let debouncer = ScanDebouncer::new(40, 1_000);

        for _ in 0..100 {
            debouncer.schedule_scan();
        }
        sleep(Duration::from_millis(50));

        let mut wakeups = 0;
        for _ in 0..5 {
            if debouncer.take_ready() {
                wakeups += 1;
            }
        }
        assert_eq!(wakeups, 1);
        assert_eq!(
            debouncer.stats(),
            DebounceStats {
                requests: 100,
                wakeups: 1
            }
        );
    }

    #[test]
    fn test_max_delay_bounds_continuous_requests() {
        let debouncer = ScanDebouncer::new(50, 120);
        let start = Instant::now();
        let mut fired = false;

        // Keep requesting faster than the quiet period
        while start.elapsed() < Duration::from_millis(400) {
            debouncer.schedule_scan();
            if debouncer.take_ready() {
                fired = true;
                break;
            }
            sleep(Duration::from_millis(10));
        }

        assert!(fired, "a steady stream must still produce a wake-up");
    }

    #[test]
    fn test_concurrent_requests_from_many_threads() {
        let debouncer = Arc::new(ScanDebouncer::new(30, 1_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let debouncer = Arc::clone(&debouncer);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        debouncer.schedule_scan();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        sleep(Duration::from_millis(40));
        assert!(debouncer.take_ready());
        assert!(!debouncer.take_ready());
        assert_eq!(debouncer.stats().requests, 400);
    }
}
