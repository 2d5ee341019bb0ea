use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const STOPPED: u64 = u64::MAX;

/// Lock-free stopwatch with a single writer and any number of readers.
///
/// `started_ns` holds the offset from `origin` at which the current run began,
/// or `STOPPED`. Readers may observe a stop that is still in flight and report
/// a slightly stale value for one read; they never block the writer.
#[derive(Debug)]
pub struct Stopwatch {
    origin: Instant,
    started_ns: AtomicU64,
    accumulated_ns: AtomicU64,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::with_origin(Instant::now())
    }

    pub fn with_origin(origin: Instant) -> Self {
        Self {
            origin,
            started_ns: AtomicU64::new(STOPPED),
            accumulated_ns: AtomicU64::new(0),
        }
    }

    fn offset_ns(&self) -> u64 {
        // Never collides with the sentinel for any realistic session length.
        (self.origin.elapsed().as_nanos() as u64).min(STOPPED - 1)
    }

    /// Starts the stopwatch. Starting a running stopwatch keeps the original start.
    pub fn start(&self) {
        if self.started_ns.load(Ordering::Acquire) == STOPPED {
            self.started_ns.store(self.offset_ns(), Ordering::Release);
        }
    }

    /// Stops the stopwatch, folding the current run into the accumulated time.
    pub fn stop(&self) {
        let started = self.started_ns.load(Ordering::Acquire);
        if started == STOPPED {
            return;
        }
        let run = self.offset_ns().saturating_sub(started);
        let acc = self.accumulated_ns.load(Ordering::Acquire);
        self.accumulated_ns
            .store(acc.saturating_add(run), Ordering::Release);
        self.started_ns.store(STOPPED, Ordering::Release);
    }

    /// Clears accumulated time. A running stopwatch restarts from now.
    pub fn reset(&self) {
        self.accumulated_ns.store(0, Ordering::Release);
        if self.started_ns.load(Ordering::Acquire) != STOPPED {
            self.started_ns.store(self.offset_ns(), Ordering::Release);
        }
    }

    pub fn is_running(&self) -> bool {
        self.started_ns.load(Ordering::Acquire) != STOPPED
    }

    pub fn elapsed(&self) -> Duration {
        let started = self.started_ns.load(Ordering::Acquire);
        let acc = self.accumulated_ns.load(Ordering::Acquire);
        let running = if started == STOPPED {
            0
        } else {
            self.offset_ns().saturating_sub(started)
        };
        Duration::from_nanos(acc.saturating_add(running))
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn stopped_stopwatch_does_not_advance() {
        let sw = Stopwatch::new();
        thread::sleep(Duration::from_millis(2));
        assert_eq!(sw.elapsed(), Duration::ZERO);
        assert!(!sw.is_running());
    }

    #[test]
    fn accumulates_across_runs() {
        let sw = Stopwatch::new();
        sw.start();
        thread::sleep(Duration::from_millis(5));
        sw.stop();
        let first = sw.elapsed();
        assert!(first >= Duration::from_millis(5));

        thread::sleep(Duration::from_millis(5));
        assert_eq!(sw.elapsed(), first);

        sw.start();
        thread::sleep(Duration::from_millis(5));
        sw.stop();
        assert!(sw.elapsed() >= first + Duration::from_millis(5));
    }

    #[test]
    fn second_start_keeps_first_start() {
        let sw = Stopwatch::new();
        sw.start();
        thread::sleep(Duration::from_millis(5));
        sw.start();
        assert!(sw.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn reset_clears_time() {
        let sw = Stopwatch::new();
        sw.start();
        thread::sleep(Duration::from_millis(3));
        sw.stop();
        sw.reset();
        assert_eq!(sw.elapsed(), Duration::ZERO);
    }
}
