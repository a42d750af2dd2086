//! Emergency mode
//!
//! The manager watches memory pressure, host load and the emission breaker.
//! When a threshold is breached it enters emergency mode with the first
//! matching reason (memory, cpu, disk, then circuit breaker). While active,
//! debug output is dropped and counted. Leaving emergency mode is always an
//! explicit call: recovery must be confirmed by the caller.

use crate::circuit_breaker::{BreakerState, CircuitBreaker};
use crate::config::EmergencyConfig;
use crate::memory::{MemoryMonitor, MemorySnapshot};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use sysinfo::{Disks, System};
use tracing::{debug, info};

/// Why emergency mode was entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyReason {
    MemoryPressure,
    CpuOverload,
    DiskSpace,
    CircuitBreakerOpen,
    CascadeFailure,
    ExternalDependencyFailure,
}

impl EmergencyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EmergencyReason::MemoryPressure => "memory_pressure",
            EmergencyReason::CpuOverload => "cpu_overload",
            EmergencyReason::DiskSpace => "disk_space",
            EmergencyReason::CircuitBreakerOpen => "circuit_breaker_open",
            EmergencyReason::CascadeFailure => "cascade_failure",
            EmergencyReason::ExternalDependencyFailure => "external_dependency_failure",
        }
    }
}

impl fmt::Display for EmergencyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effect of an emergency episode, computed when it ends
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmergencyMetrics {
    /// Bytes released between activation and deactivation
    pub memory_reclaimed: u64,
    /// Drop of the busiest resource, in percentage points
    pub system_load_reduction: f64,
}

/// Emergency state as observed by callers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmergencyState {
    pub active: bool,
    pub reason: Option<EmergencyReason>,
    pub activation_time: Option<DateTime<Utc>>,
    pub suppressed_operations: u64,
    pub metrics: EmergencyMetrics,
}

/// Host load in percent per resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemLoad {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
}

impl SystemLoad {
    fn peak(&self) -> f64 {
        self.cpu_percent
            .max(self.memory_percent)
            .max(self.disk_percent)
    }
}

/// Snapshot attached to the activation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyActivation {
    pub reason: EmergencyReason,
    pub activation_time: DateTime<Utc>,
    pub memory: MemorySnapshot,
    pub memory_pressure_percent: f64,
    pub system_load: SystemLoad,
    pub breaker_state: BreakerState,
    pub breaker_failures: u32,
}

/// Source of host load readings
pub trait LoadProbe: Send + Sync {
    fn sample(&self) -> SystemLoad;
}

/// Load probe with a fixed, adjustable reading
#[derive(Debug, Default)]
pub struct FixedLoadProbe {
    load: Mutex<SystemLoad>,
}

impl FixedLoadProbe {
    pub fn new(load: SystemLoad) -> Self {
        Self {
            load: Mutex::new(load),
        }
    }

    pub fn set(&self, load: SystemLoad) {
        *self.load.lock() = load;
    }
}

impl LoadProbe for FixedLoadProbe {
    fn sample(&self) -> SystemLoad {
        *self.load.lock()
    }
}

/// Load probe reading host statistics, cached for `sample_interval`
pub struct SystemLoadProbe {
    system: Mutex<System>,
    cache: Mutex<Option<(Instant, SystemLoad)>>,
    sample_interval: Duration,
}

impl SystemLoadProbe {
    pub fn new(sample_interval: Duration) -> Self {
        Self {
            system: Mutex::new(System::new()),
            cache: Mutex::new(None),
            sample_interval,
        }
    }

    fn read(&self) -> SystemLoad {
        let mut system = self.system.lock();
        system.refresh_cpu();
        system.refresh_memory();

        let memory_percent = percent(system.used_memory(), system.total_memory());
        let cpu_percent = f64::from(system.global_cpu_info().cpu_usage()).clamp(0.0, 100.0);

        let disks = Disks::new_with_refreshed_list();
        let (total, available) = disks.list().iter().fold((0u64, 0u64), |(total, free), disk| {
            (
                total.saturating_add(disk.total_space()),
                free.saturating_add(disk.available_space()),
            )
        });
        let disk_percent = percent(total.saturating_sub(available), total);

        SystemLoad {
            cpu_percent,
            memory_percent,
            disk_percent,
        }
    }
}

impl Default for SystemLoadProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl LoadProbe for SystemLoadProbe {
    fn sample(&self) -> SystemLoad {
        let mut cache = self.cache.lock();
        if let Some((taken_at, load)) = *cache {
            if taken_at.elapsed() < self.sample_interval {
                return load;
            }
        }
        let load = self.read();
        *cache = Some((Instant::now(), load));
        load
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

struct Sample {
    memory: MemorySnapshot,
    load: SystemLoad,
    breaker: (BreakerState, u32),
}

struct Episode {
    state: EmergencyState,
    baseline: Option<(MemorySnapshot, SystemLoad)>,
    unannounced: Option<EmergencyActivation>,
}

/// Owner and only mutator of [`EmergencyState`]
pub struct EmergencyManager {
    config: EmergencyConfig,
    memory: Arc<dyn MemoryMonitor>,
    breaker: Arc<CircuitBreaker>,
    probe: Arc<dyn LoadProbe>,
    episode: Mutex<Episode>,
    active: AtomicBool,
    suppressed: AtomicU64,
}

impl EmergencyManager {
    pub fn new(
        config: EmergencyConfig,
        memory: Arc<dyn MemoryMonitor>,
        breaker: Arc<CircuitBreaker>,
        probe: Arc<dyn LoadProbe>,
    ) -> Self {
        Self {
            config,
            memory,
            breaker,
            probe,
            episode: Mutex::new(Episode {
                state: EmergencyState::default(),
                baseline: None,
                unannounced: None,
            }),
            active: AtomicBool::new(false),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Check entry conditions, entering emergency mode on the first breach
    ///
    /// Returns the activation exactly once per episode so the caller can log
    /// it; every other call returns `None`.
    ///
    /// Collaborators are sampled before the episode lock is taken: a memory
    /// monitor may run pressure callbacks that log, and logging re-enters here.
    pub fn evaluate(&self) -> Option<EmergencyActivation> {
        if self.active.load(Ordering::Acquire) {
            let mut episode = self.episode.lock();
            return episode.unannounced.take();
        }
        if !self.config.enabled {
            return None;
        }

        let memory = self.memory.current_usage();
        let memory_high = memory.pressure_percent() >= self.memory.threshold_percent();
        let load = self.probe.sample();
        let reason = self.breached(memory_high, &load)?;
        let breaker = (self.breaker.state(), self.breaker.failure_count());

        let mut episode = self.episode.lock();
        if episode.state.active {
            return episode.unannounced.take();
        }
        Some(self.activate(&mut episode, reason, Sample { memory, load, breaker }))
    }

    fn breached(&self, memory_high: bool, load: &SystemLoad) -> Option<EmergencyReason> {
        if memory_high || load.memory_percent > self.config.memory_threshold_percent {
            Some(EmergencyReason::MemoryPressure)
        } else if load.cpu_percent > self.config.cpu_threshold_percent {
            Some(EmergencyReason::CpuOverload)
        } else if load.disk_percent > self.config.disk_threshold_percent {
            Some(EmergencyReason::DiskSpace)
        } else if self.breaker.state() == BreakerState::Open
            && self.breaker.failure_count() > self.config.breaker_failure_ceiling
        {
            Some(EmergencyReason::CircuitBreakerOpen)
        } else {
            None
        }
    }

    /// Readings taken ahead of the episode lock
    fn take_sample(&self) -> Sample {
        Sample {
            memory: self.memory.current_usage(),
            load: self.probe.sample(),
            breaker: (self.breaker.state(), self.breaker.failure_count()),
        }
    }

    /// Enter the active state; must not call any collaborator
    fn activate(
        &self,
        episode: &mut Episode,
        reason: EmergencyReason,
        sample: Sample,
    ) -> EmergencyActivation {
        let now = Utc::now();
        let Sample {
            memory,
            load,
            breaker: (breaker_state, breaker_failures),
        } = sample;

        self.suppressed.store(0, Ordering::Relaxed);
        episode.state = EmergencyState {
            active: true,
            reason: Some(reason),
            activation_time: Some(now),
            suppressed_operations: 0,
            metrics: EmergencyMetrics::default(),
        };
        episode.baseline = Some((memory.clone(), load));
        self.active.store(true, Ordering::Release);

        info!(reason = %reason, "Emergency mode activated");

        EmergencyActivation {
            reason,
            activation_time: now,
            memory_pressure_percent: memory.pressure_percent(),
            memory,
            system_load: load,
            breaker_state,
            breaker_failures,
        }
    }

    /// Enter emergency mode for a condition detected elsewhere
    ///
    /// Returns `false` when already active. The activation is reported by the
    /// next [`evaluate`](Self::evaluate) call.
    pub fn enable_emergency_mode(&self, reason: EmergencyReason) -> bool {
        if self.active.load(Ordering::Acquire) {
            return false;
        }
        let sample = self.take_sample();

        let mut episode = self.episode.lock();
        if episode.state.active {
            return false;
        }
        let activation = self.activate(&mut episode, reason, sample);
        episode.unannounced = Some(activation);
        true
    }

    /// Leave emergency mode, returning the final state of the episode
    pub fn disable_emergency_mode(&self) -> Option<EmergencyState> {
        if !self.active.load(Ordering::Acquire) {
            return None;
        }
        let now = self.take_sample();

        let mut episode = self.episode.lock();
        if !episode.state.active {
            return None;
        }

        let mut state = std::mem::take(&mut episode.state);
        state.active = false;
        state.suppressed_operations = self.suppressed.swap(0, Ordering::Relaxed);

        if let Some((memory, load)) = episode.baseline.take() {
            state.metrics.memory_reclaimed = memory.heap_used.saturating_sub(now.memory.heap_used);
            state.metrics.system_load_reduction = (load.peak() - now.load.peak()).max(0.0);
        }
        episode.unannounced = None;
        self.active.store(false, Ordering::Release);

        info!(
            reason = ?state.reason,
            suppressed = state.suppressed_operations,
            "Emergency mode deactivated"
        );
        Some(state)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Count one dropped operation
    pub fn record_suppressed(&self) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
        debug!("Operation suppressed in emergency mode");
    }

    pub fn state(&self) -> EmergencyState {
        let episode = self.episode.lock();
        let mut state = episode.state.clone();
        if state.active {
            state.suppressed_operations = self.suppressed.load(Ordering::Relaxed);
        }
        state
    }
}
