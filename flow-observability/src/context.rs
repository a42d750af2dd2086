//! Process-wide observability context
//!
//! [`ObservabilityContext`] wires the memory monitor, circuit breaker,
//! emergency manager, logger and protocol tracer together once at startup and
//! owns the background sweep. Collaborators receive clones of the logger and
//! tracer instead of reaching for global state.

use crate::circuit_breaker::CircuitBreaker;
use crate::config::{LogFormat, LoggingConfig, ObservabilityConfig};
use crate::emergency::{
    EmergencyManager, EmergencyReason, EmergencyState, LoadProbe, SystemLoadProbe,
};
use crate::logger::{CategorySet, DebugLogger, LoggerParts};
use crate::memory::{MemoryMonitor, SystemMemoryMonitor};
use crate::pii::{LogSanitizer, PatternDetector, PiiDetector, PiiRedactor, StrategyRedactor};
use crate::protocol::ProtocolTracer;
use crate::sink::{LogLevel, LogSink, TracingSink};
use crate::{LoggingError, Result};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;

const PERFORMANCE_CATEGORY: &str = "flow:performance";
const EMERGENCY_CATEGORY: &str = "flow:emergency";

/// Install the global `tracing` subscriber writing to stderr
///
/// The filter comes from `RUST_LOG` when set, otherwise from `config.level`.
/// Output goes through a non-blocking writer; keep the returned guard alive
/// for as long as output should be flushed. Fails with
/// [`LoggingError::Tracing`] when a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<WorkerGuard> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| LoggingError::Tracing(format!("Invalid log level: {e}")))?;
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(writer))
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty().with_writer(writer))
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_ansi(false).with_writer(writer))
            .try_init(),
    };
    installed.map_err(|e| LoggingError::Tracing(e.to_string()))?;

    Ok(guard)
}

/// Outcome of one maintenance sweep
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SweepReport {
    /// Protocol traces and closed correlations removed
    pub purged: usize,
    /// Completed tool invocations dropped from history
    pub trimmed_tool_history: usize,
    pub memory_pressure_percent: f64,
    pub overhead_percent: f64,
}

struct Sweeper {
    logger: DebugLogger,
    tracer: ProtocolTracer,
    max_usage_locations: usize,
    performance_threshold: f64,
    overhead_breached: AtomicBool,
}

impl Sweeper {
    fn run(&self) -> SweepReport {
        let purged = self.tracer.purge_expired();
        self.logger.trim_usage_locations(self.max_usage_locations);
        let trimmed_tool_history = self.tracer.trim_tool_history();
        let memory_pressure_percent = self.logger.memory().memory_pressure_level();

        let overhead_percent = self.logger.measure_overhead();
        let breached = overhead_percent > self.performance_threshold;
        if breached && !self.overhead_breached.swap(true, Ordering::AcqRel) {
            self.logger.warn(
                PERFORMANCE_CATEGORY,
                "Logger overhead above threshold",
                Some(json!({
                    "overhead_percent": overhead_percent,
                    "threshold_percent": self.performance_threshold,
                })),
                None,
            );
        } else if !breached {
            self.overhead_breached.store(false, Ordering::Release);
        }
        self.logger.performance().reset_window();

        debug!(
            purged,
            trimmed_tool_history, memory_pressure_percent, overhead_percent, "Observability sweep"
        );
        SweepReport {
            purged,
            trimmed_tool_history,
            memory_pressure_percent,
            overhead_percent,
        }
    }
}

/// Builder for [`ObservabilityContext`]
///
/// Every collaborator has a production default; tests substitute fakes.
pub struct ObservabilityBuilder {
    config: ObservabilityConfig,
    memory: Option<Arc<dyn MemoryMonitor>>,
    load_probe: Option<Arc<dyn LoadProbe>>,
    sink: Option<Arc<dyn LogSink>>,
    detector: Option<Arc<dyn PiiDetector>>,
    redactor: Option<Arc<dyn PiiRedactor>>,
    install_tracing: bool,
}

impl ObservabilityBuilder {
    pub fn new() -> Self {
        Self {
            config: ObservabilityConfig::default(),
            memory: None,
            load_probe: None,
            sink: None,
            detector: None,
            redactor: None,
            install_tracing: false,
        }
    }

    pub fn config(mut self, config: ObservabilityConfig) -> Self {
        self.config = config;
        self
    }

    pub fn memory_monitor(mut self, memory: Arc<dyn MemoryMonitor>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn load_probe(mut self, probe: Arc<dyn LoadProbe>) -> Self {
        self.load_probe = Some(probe);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn pii_detector(mut self, detector: Arc<dyn PiiDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn pii_redactor(mut self, redactor: Arc<dyn PiiRedactor>) -> Self {
        self.redactor = Some(redactor);
        self
    }

    /// Also install the global stderr subscriber via [`init_tracing`]
    pub fn install_tracing(mut self, install: bool) -> Self {
        self.install_tracing = install;
        self
    }

    /// Validate the configuration, assemble the components and start the sweep
    ///
    /// Must be called from within a tokio runtime.
    pub fn init(self) -> Result<ObservabilityContext> {
        let config = self.config;
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| LoggingError::Runtime(e.to_string()))?;

        let guard = if self.install_tracing {
            match init_tracing(&config.logging) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    debug!(error = %e, "Keeping existing tracing subscriber");
                    None
                }
            }
        } else {
            None
        };

        let memory = self
            .memory
            .unwrap_or_else(|| Arc::new(SystemMemoryMonitor::new(&config.memory)));
        let probe = self
            .load_probe
            .unwrap_or_else(|| Arc::new(SystemLoadProbe::default()));
        let breaker = Arc::new(CircuitBreaker::new(&config.circuit_breaker));
        let emergency = Arc::new(EmergencyManager::new(
            config.emergency.clone(),
            memory.clone(),
            breaker.clone(),
            probe,
        ));

        let sanitizer = LogSanitizer::with_components(
            self.detector
                .unwrap_or_else(|| Arc::new(PatternDetector::new(config.sanitization.max_depth))),
            self.redactor
                .unwrap_or_else(|| Arc::new(StrategyRedactor::new(&config.sanitization))),
            config.sanitization.failure_policy,
        );

        let mut parts = LoggerParts::new(
            self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
            memory.clone(),
            breaker.clone(),
        );
        parts.emergency = Some(emergency.clone());
        parts.sanitizer = config
            .sanitize_sensitive_data
            .then(|| sanitizer.clone());
        parts.categories = CategorySet::parse(&config.logging.enabled_categories.join(","));
        parts.max_usage_locations = config.max_usage_locations;
        let logger = DebugLogger::new(parts);

        let tracer = ProtocolTracer::new(&config, &logger, sanitizer);

        let sweeper = Arc::new(Sweeper {
            logger: logger.clone(),
            tracer: tracer.clone(),
            max_usage_locations: config.max_usage_locations,
            performance_threshold: config.performance_threshold,
            overhead_breached: AtomicBool::new(false),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweep_task = runtime.spawn(run_sweep_loop(
            sweeper.clone(),
            config.sweep_interval(),
            shutdown_rx,
        ));

        info!(
            tracing = config.enable_tracing,
            sanitize = config.sanitize_sensitive_data,
            categories = ?logger.enabled_categories(),
            "Observability context initialized"
        );

        Ok(ObservabilityContext {
            config,
            logger,
            tracer,
            emergency,
            breaker,
            memory,
            sweeper,
            shutdown_tx,
            sweep_task: Mutex::new(Some(sweep_task)),
            guard: Mutex::new(guard),
        })
    }
}

impl Default for ObservabilityBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_sweep_loop(
    sweeper: Arc<Sweeper>,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                sweeper.run();
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Observability sweep stopped");
}

/// Wired observability components with an explicit lifecycle
pub struct ObservabilityContext {
    config: ObservabilityConfig,
    logger: DebugLogger,
    tracer: ProtocolTracer,
    emergency: Arc<EmergencyManager>,
    breaker: Arc<CircuitBreaker>,
    memory: Arc<dyn MemoryMonitor>,
    sweeper: Arc<Sweeper>,
    shutdown_tx: watch::Sender<bool>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
    guard: Mutex<Option<WorkerGuard>>,
}

impl ObservabilityContext {
    /// Initialize with production collaborators and the stderr subscriber
    pub fn init(config: ObservabilityConfig) -> Result<Self> {
        ObservabilityBuilder::new()
            .config(config)
            .install_tracing(true)
            .init()
    }

    pub fn builder() -> ObservabilityBuilder {
        ObservabilityBuilder::new()
    }

    pub fn config(&self) -> &ObservabilityConfig {
        &self.config
    }

    pub fn logger(&self) -> &DebugLogger {
        &self.logger
    }

    pub fn tracer(&self) -> &ProtocolTracer {
        &self.tracer
    }

    pub fn emergency(&self) -> &Arc<EmergencyManager> {
        &self.emergency
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn memory(&self) -> &Arc<dyn MemoryMonitor> {
        &self.memory
    }

    /// Enter emergency mode for an externally detected condition
    ///
    /// The activation is logged immediately. Returns `false` if emergency mode
    /// was already active.
    pub fn enable_emergency_mode(&self, reason: EmergencyReason) -> bool {
        let entered = self.emergency.enable_emergency_mode(reason);
        if entered {
            self.logger.check_emergency();
        }
        entered
    }

    /// Leave emergency mode, logging the final episode state
    pub fn disable_emergency_mode(&self) -> Option<EmergencyState> {
        let state = self.emergency.disable_emergency_mode()?;
        self.logger.log_essential(
            LogLevel::Info,
            EMERGENCY_CATEGORY,
            "Emergency mode deactivated",
            serde_json::to_value(&state).ok(),
            None,
        );
        Some(state)
    }

    /// Run one maintenance sweep immediately
    pub fn sweep_now(&self) -> SweepReport {
        self.sweeper.run()
    }

    /// Whether the background sweep is still scheduled
    pub fn is_running(&self) -> bool {
        self.sweep_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop the sweep, run a final sweep and flush all output
    ///
    /// Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.sweep_task.lock().take();
        let Some(task) = task else {
            return;
        };
        if let Err(e) = task.await {
            debug!(error = %e, "Sweep task ended abnormally");
        }

        self.sweeper.run();
        self.logger.flush();
        info!("Observability context shut down");
        drop(self.guard.lock().take());
    }
}

impl Drop for ObservabilityContext {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emergency::{FixedLoadProbe, SystemLoad};
    use crate::memory::ManualMemoryMonitor;
    use crate::sink::MemorySink;
    use std::time::Duration;

    struct Fakes {
        sink: Arc<MemorySink>,
        memory: Arc<ManualMemoryMonitor>,
    }

    fn builder(config: ObservabilityConfig) -> (ObservabilityBuilder, Fakes) {
        let sink = Arc::new(MemorySink::new());
        let memory = Arc::new(ManualMemoryMonitor::new(95.0));
        memory.set_level(30.0);
        let builder = ObservabilityContext::builder()
            .config(config)
            .sink(sink.clone())
            .memory_monitor(memory.clone())
            .load_probe(Arc::new(FixedLoadProbe::new(SystemLoad::default())));
        (builder, Fakes { sink, memory })
    }

    #[test]
    fn test_init_requires_runtime() {
        let (builder, _) = builder(ObservabilityConfig::default());
        let result = builder.init();
        assert!(matches!(result, Err(LoggingError::Runtime(_))));
    }

    #[tokio::test]
    async fn test_init_rejects_invalid_config() {
        let mut config = ObservabilityConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        let (builder, _) = builder(config);
        assert!(matches!(builder.init(), Err(LoggingError::Config(_))));
    }

    #[tokio::test]
    async fn test_categories_from_config() {
        let mut config = ObservabilityConfig::default();
        config.logging.enabled_categories = vec!["core:*".to_string()];
        let (builder, fakes) = builder(config);
        let context = builder.init().unwrap();

        context.logger().debug("core:swarm", "visible", None, None);
        context.logger().debug("mcp:protocol", "hidden", None, None);
        assert_eq!(fakes.sink.len(), 1);

        context.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_sweep() {
        let (builder, fakes) = builder(ObservabilityConfig::default());
        let context = builder.init().unwrap();
        assert!(context.is_running());

        context.logger().warn("core:test", "before shutdown", None, None);
        context.shutdown().await;
        assert!(!context.is_running());
        assert!(!fakes.sink.is_empty());

        context.shutdown().await;
    }

    #[tokio::test]
    async fn test_periodic_sweep_purges_traces() {
        let config = ObservabilityConfig {
            sweep_interval_ms: 20,
            trace_retention_ms: 10,
            ..Default::default()
        };
        let (builder, _fakes) = builder(config);
        let context = builder.init().unwrap();

        context.tracer().trace_protocol_message(
            crate::protocol::Direction::Inbound,
            crate::protocol::MessageType::Request,
            &json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
            None,
            None,
        );
        assert_eq!(context.tracer().trace_count(), 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(context.tracer().trace_count(), 0);

        context.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweep_reports_memory() {
        let (builder, fakes) = builder(ObservabilityConfig::default());
        let context = builder.init().unwrap();

        fakes.memory.set_level(60.0);
        let report = context.sweep_now();
        assert!((report.memory_pressure_percent - 60.0).abs() < 0.01);
        assert_eq!(report.purged, 0);

        context.shutdown().await;
    }

    #[tokio::test]
    async fn test_overhead_breach_warns_once() {
        let config = ObservabilityConfig {
            performance_threshold: 0.0,
            ..Default::default()
        };
        let (builder, fakes) = builder(config);
        let context = builder.init().unwrap();

        for _ in 0..2 {
            context.logger().performance().record(Duration::from_millis(5));
            context.sweep_now();
        }

        let warnings: Vec<_> = fakes
            .sink
            .records_at(LogLevel::Warn)
            .into_iter()
            .filter(|record| record.category == PERFORMANCE_CATEGORY)
            .collect();
        assert_eq!(warnings.len(), 1);

        context.shutdown().await;
    }

    #[tokio::test]
    async fn test_explicit_emergency_round_trip() {
        let (builder, fakes) = builder(ObservabilityConfig::default());
        let context = builder.init().unwrap();

        assert!(context.enable_emergency_mode(EmergencyReason::CascadeFailure));
        assert!(!context.enable_emergency_mode(EmergencyReason::CascadeFailure));
        assert!(context.emergency().is_active());

        let activations = fakes.sink.records_at(LogLevel::Error);
        assert_eq!(activations.len(), 1);
        assert!(activations[0].message.contains("cascade_failure"));

        context.logger().debug("core:test", "shed", None, None);
        let state = context.disable_emergency_mode().unwrap();
        assert_eq!(state.suppressed_operations, 1);
        assert!(!context.emergency().is_active());
        assert!(context.disable_emergency_mode().is_none());

        context.shutdown().await;
    }
}
