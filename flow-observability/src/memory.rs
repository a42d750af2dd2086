//! Memory sampling and pressure classification
//!
//! [`MemoryMonitor`] is the leaf every other component consults before doing
//! work. Pressure callbacks are edge triggered: they fire once when the level
//! crosses the threshold upwards and re-arm only after it drops back below.

use crate::config::MemoryConfig;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use sysinfo::System;
use tracing::debug;

/// Callback fired when memory pressure crosses the configured threshold
pub type PressureCallback = Arc<dyn Fn(&MemorySnapshot) + Send + Sync>;

/// Point-in-time memory reading
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub timestamp_ms: i64,
    /// Bytes in use
    pub heap_used: u64,
    /// Bytes available in total
    pub heap_total: u64,
    /// Memory outside the primary pool (swap in use for system samples)
    pub external: u64,
    /// Additional named readings
    pub extra: HashMap<String, u64>,
}

impl MemorySnapshot {
    /// Build a snapshot stamped with the current time
    pub fn new(heap_used: u64, heap_total: u64) -> Self {
        Self {
            timestamp_ms: Utc::now().timestamp_millis(),
            heap_used: if heap_total > 0 {
                heap_used.min(heap_total)
            } else {
                heap_used
            },
            heap_total,
            external: 0,
            extra: HashMap::new(),
        }
    }

    /// Used / total as a percentage clamped to [0, 100]
    pub fn pressure_percent(&self) -> f64 {
        if self.heap_total == 0 {
            return 0.0;
        }
        let used = self.heap_used.min(self.heap_total);
        (used as f64 / self.heap_total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// Source of memory readings and pressure notifications
pub trait MemoryMonitor: Send + Sync {
    /// Take (or reuse a recent) memory reading
    fn current_usage(&self) -> MemorySnapshot;

    /// Threshold in percent at or above which pressure is high
    fn threshold_percent(&self) -> f64;

    /// Register a callback fired on each upward threshold crossing
    fn on_memory_pressure(&self, callback: PressureCallback);

    /// Current pressure level in percent
    fn memory_pressure_level(&self) -> f64 {
        self.current_usage().pressure_percent()
    }

    /// Whether pressure is at or above the threshold
    fn is_memory_pressure_high(&self) -> bool {
        self.memory_pressure_level() >= self.threshold_percent()
    }
}

/// Edge detector shared by monitor implementations
#[derive(Default)]
struct PressureNotifier {
    callbacks: RwLock<Vec<PressureCallback>>,
    above: AtomicBool,
}

impl PressureNotifier {
    fn register(&self, callback: PressureCallback) {
        self.callbacks.write().push(callback);
    }

    fn observe(&self, snapshot: &MemorySnapshot, threshold: f64) {
        let high = snapshot.pressure_percent() >= threshold;
        let was_high = self.above.swap(high, Ordering::AcqRel);

        if high && !was_high {
            debug!(
                pressure = snapshot.pressure_percent(),
                threshold, "Memory pressure threshold crossed"
            );
            let callbacks = self.callbacks.read().clone();
            for callback in callbacks {
                let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    callback(snapshot)
                }));
            }
        }
    }
}

struct CachedSample {
    taken_at: Instant,
    snapshot: MemorySnapshot,
}

/// Monitor backed by host memory statistics
pub struct SystemMemoryMonitor {
    system: Mutex<System>,
    cache: Mutex<Option<CachedSample>>,
    sample_interval: Duration,
    threshold_percent: f64,
    notifier: PressureNotifier,
}

impl SystemMemoryMonitor {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            system: Mutex::new(System::new()),
            cache: Mutex::new(None),
            sample_interval: Duration::from_millis(config.sample_interval_ms),
            threshold_percent: config.pressure_threshold_percent,
            notifier: PressureNotifier::default(),
        }
    }

    fn sample(&self) -> MemorySnapshot {
        let mut system = self.system.lock();
        system.refresh_memory();

        let mut snapshot = MemorySnapshot::new(system.used_memory(), system.total_memory());
        snapshot.external = system.used_swap();
        snapshot
            .extra
            .insert("available".to_string(), system.available_memory());
        snapshot
            .extra
            .insert("swap_total".to_string(), system.total_swap());
        snapshot
    }
}

impl Default for SystemMemoryMonitor {
    fn default() -> Self {
        Self::new(&MemoryConfig::default())
    }
}

impl MemoryMonitor for SystemMemoryMonitor {
    fn current_usage(&self) -> MemorySnapshot {
        {
            let cache = self.cache.lock();
            if let Some(cached) = cache.as_ref() {
                if cached.taken_at.elapsed() < self.sample_interval {
                    return cached.snapshot.clone();
                }
            }
        }

        let snapshot = self.sample();
        *self.cache.lock() = Some(CachedSample {
            taken_at: Instant::now(),
            snapshot: snapshot.clone(),
        });
        self.notifier.observe(&snapshot, self.threshold_percent);
        snapshot
    }

    fn threshold_percent(&self) -> f64 {
        self.threshold_percent
    }

    fn on_memory_pressure(&self, callback: PressureCallback) {
        self.notifier.register(callback);
    }
}

/// Monitor whose pressure level is set explicitly
///
/// Used wherever the host already tracks memory itself, and as the in-memory
/// fake in tests.
pub struct ManualMemoryMonitor {
    level_bits: AtomicU64,
    threshold_percent: f64,
    total: u64,
    samples: AtomicU64,
    notifier: PressureNotifier,
}

impl ManualMemoryMonitor {
    pub fn new(threshold_percent: f64) -> Self {
        Self {
            level_bits: AtomicU64::new(0f64.to_bits()),
            threshold_percent,
            total: 1 << 30,
            samples: AtomicU64::new(0),
            notifier: PressureNotifier::default(),
        }
    }

    /// Set the pressure level in percent; values are clamped to [0, 100]
    pub fn set_level(&self, percent: f64) {
        let percent = percent.clamp(0.0, 100.0);
        self.level_bits.store(percent.to_bits(), Ordering::Release);
        self.notifier.observe(&self.snapshot_at(percent), self.threshold_percent);
    }

    /// Number of readings taken so far
    pub fn sample_count(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    fn level(&self) -> f64 {
        f64::from_bits(self.level_bits.load(Ordering::Acquire))
    }

    fn snapshot_at(&self, percent: f64) -> MemorySnapshot {
        let used = (self.total as f64 * percent / 100.0).round() as u64;
        MemorySnapshot::new(used, self.total)
    }
}

impl Default for ManualMemoryMonitor {
    fn default() -> Self {
        Self::new(MemoryConfig::default().pressure_threshold_percent)
    }
}

impl MemoryMonitor for ManualMemoryMonitor {
    fn current_usage(&self) -> MemorySnapshot {
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.snapshot_at(self.level())
    }

    fn threshold_percent(&self) -> f64 {
        self.threshold_percent
    }

    fn on_memory_pressure(&self, callback: PressureCallback) {
        self.notifier.register(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_pressure_percent_clamped() {
        let snapshot = MemorySnapshot::new(50, 200);
        assert_eq!(snapshot.pressure_percent(), 25.0);

        let empty = MemorySnapshot::new(0, 0);
        assert_eq!(empty.pressure_percent(), 0.0);

        let over = MemorySnapshot {
            heap_used: 300,
            heap_total: 200,
            ..Default::default()
        };
        assert_eq!(over.pressure_percent(), 100.0);
    }

    #[test]
    fn test_manual_monitor_threshold() {
        let monitor = ManualMemoryMonitor::new(95.0);
        monitor.set_level(50.0);
        assert!(!monitor.is_memory_pressure_high());
        assert!((monitor.memory_pressure_level() - 50.0).abs() < 0.01);

        monitor.set_level(99.0);
        assert!(monitor.is_memory_pressure_high());

        let usage = monitor.current_usage();
        assert!(usage.heap_used <= usage.heap_total);
    }

    #[test]
    fn test_pressure_callback_is_edge_triggered() {
        let monitor = ManualMemoryMonitor::new(90.0);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        monitor.on_memory_pressure(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        monitor.set_level(95.0);
        monitor.set_level(97.0);
        monitor.set_level(99.0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        monitor.set_level(40.0);
        monitor.set_level(92.0);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let monitor = ManualMemoryMonitor::new(90.0);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        monitor.on_memory_pressure(Arc::new(|_| panic!("callback failure")));
        monitor.on_memory_pressure(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        monitor.set_level(95.0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_system_monitor_reads_host_memory() {
        let monitor = SystemMemoryMonitor::default();
        let usage = monitor.current_usage();
        assert!(usage.heap_total > 0);
        assert!(usage.heap_used <= usage.heap_total);

        let level = monitor.memory_pressure_level();
        assert!((0.0..=100.0).contains(&level));
    }

    #[test]
    fn test_system_monitor_caches_samples() {
        let monitor = SystemMemoryMonitor::new(&MemoryConfig {
            sample_interval_ms: 60_000,
            ..Default::default()
        });
        let first = monitor.current_usage();
        let second = monitor.current_usage();
        assert_eq!(first.timestamp_ms, second.timestamp_ms);
    }
}
