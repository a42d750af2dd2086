//! Timers bounding the logger's own cost

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Named timers plus an accumulator of time spent inside the logger
pub struct PerformanceCounter {
    timers: Mutex<HashMap<String, Instant>>,
    window_start: Mutex<Instant>,
    busy_nanos: AtomicU64,
    operations: AtomicU64,
}

/// Adds its lifetime to the owning counter when dropped
pub struct MeasureGuard<'a> {
    counter: &'a PerformanceCounter,
    started: Instant,
}

impl Drop for MeasureGuard<'_> {
    fn drop(&mut self) {
        self.counter.record(self.started.elapsed());
    }
}

impl PerformanceCounter {
    pub fn new() -> Self {
        Self {
            timers: Mutex::new(HashMap::new()),
            window_start: Mutex::new(Instant::now()),
            busy_nanos: AtomicU64::new(0),
            operations: AtomicU64::new(0),
        }
    }

    /// Start (or restart) the timer called `label`
    pub fn start(&self, label: &str) {
        self.timers.lock().insert(label.to_string(), Instant::now());
    }

    /// Stop the timer called `label`, returning its elapsed time
    pub fn end(&self, label: &str) -> Option<Duration> {
        self.timers
            .lock()
            .remove(label)
            .map(|started| started.elapsed())
    }

    /// Measure the enclosing scope
    pub fn measure(&self) -> MeasureGuard<'_> {
        MeasureGuard {
            counter: self,
            started: Instant::now(),
        }
    }

    /// Account `elapsed` as logger overhead
    pub fn record(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.busy_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.operations.fetch_add(1, Ordering::Relaxed);
    }

    /// Measured operations in the current window
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    /// Mean cost of one measured operation
    pub fn average_cost(&self) -> Duration {
        let operations = self.operation_count();
        if operations == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.busy_nanos.load(Ordering::Relaxed) / operations)
    }

    /// Share of wall time spent in measured operations since the window began
    pub fn overhead_percent(&self) -> f64 {
        let wall = self.window_start.lock().elapsed().as_nanos() as f64;
        if wall <= 0.0 {
            return 0.0;
        }
        let busy = self.busy_nanos.load(Ordering::Relaxed) as f64;
        (busy / wall * 100.0).clamp(0.0, 100.0)
    }

    /// Start a new measurement window
    pub fn reset_window(&self) {
        *self.window_start.lock() = Instant::now();
        self.busy_nanos.store(0, Ordering::Relaxed);
        self.operations.store(0, Ordering::Relaxed);
    }
}

impl Default for PerformanceCounter {
    fn default() -> Self {
        Self::new()
    }
}
