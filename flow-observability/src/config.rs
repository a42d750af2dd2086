//! Observability configuration
//!
//! Every field has a safe default, so an empty TOML document is a valid
//! configuration. Environment variables are layered on top by [`ObservabilityConfig::apply_env`].

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::pii::{FailurePolicy, PiiType, RedactionStrategy};
use crate::{LoggingError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Environment variable holding comma separated category patterns
pub const DEBUG_CATEGORIES_ENV: &str = "FLOW_DEBUG";

/// Environment variable selecting the output format
pub const LOG_FORMAT_ENV: &str = "FLOW_LOG_FORMAT";

/// Top-level configuration for the observability core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Record protocol traces
    pub enable_tracing: bool,
    /// Track cross-system correlations
    pub enable_cross_system_correlation: bool,
    /// Trace tool invocations
    pub enable_tool_tracing: bool,
    /// Maximum tolerated logger overhead, in percent of wall time
    pub performance_threshold: f64,
    /// How long protocol traces are retained, in milliseconds
    pub trace_retention_ms: u64,
    /// Run payloads through PII detection and redaction
    pub sanitize_sensitive_data: bool,
    /// Memory monitor settings
    pub memory: MemoryConfig,
    /// Circuit breaker guarding log emission
    pub circuit_breaker: CircuitBreakerConfig,
    /// Emergency mode thresholds
    pub emergency: EmergencyConfig,
    /// PII redaction policy
    pub sanitization: SanitizationConfig,
    /// Output configuration
    pub logging: LoggingConfig,
    /// Background sweep interval in milliseconds
    pub sweep_interval_ms: u64,
    /// Maximum locations remembered per tracked symbol
    pub max_usage_locations: usize,
    /// Maximum completed tool invocations retained
    pub max_tool_history: usize,
    /// Maximum protocol trace records retained
    pub max_traces: usize,
}

/// Memory monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Pressure level (percent) at or above which memory is considered critical
    pub pressure_threshold_percent: f64,
    /// Minimum interval between two system samples
    pub sample_interval_ms: u64,
}

/// Emergency mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyConfig {
    /// Evaluate emergency conditions on log calls
    pub enabled: bool,
    pub cpu_threshold_percent: f64,
    pub memory_threshold_percent: f64,
    pub disk_threshold_percent: f64,
    /// Failure count above which an open breaker triggers emergency mode
    pub breaker_failure_ceiling: u32,
}

/// PII sanitization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizationConfig {
    /// Detections below this confidence are reported but left in place
    pub confidence_floor: f64,
    /// Per-type strategy overrides; types not listed use the built-in defaults
    pub strategies: HashMap<PiiType, RedactionStrategy>,
    /// What to do when detection or redaction itself fails
    pub failure_policy: FailurePolicy,
    /// Maximum nesting depth inspected inside structured payloads
    pub max_depth: usize,
}

/// Output format of the compliant channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
    /// Category patterns enabled at startup (`*`, `ns:*` or exact names)
    pub enabled_categories: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enable_tracing: true,
            enable_cross_system_correlation: true,
            enable_tool_tracing: true,
            performance_threshold: 5.0,
            trace_retention_ms: 300_000, // 5 minutes
            sanitize_sensitive_data: true,
            memory: MemoryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            emergency: EmergencyConfig::default(),
            sanitization: SanitizationConfig::default(),
            logging: LoggingConfig::default(),
            sweep_interval_ms: 60_000,
            max_usage_locations: 100,
            max_tool_history: 1_000,
            max_traces: 10_000,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            pressure_threshold_percent: 95.0,
            sample_interval_ms: 500,
        }
    }
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cpu_threshold_percent: 90.0,
            memory_threshold_percent: 95.0,
            disk_threshold_percent: 95.0,
            breaker_failure_ceiling: 5,
        }
    }
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.7,
            strategies: HashMap::new(),
            failure_policy: FailurePolicy::FailClosed,
            max_depth: 32,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            enabled_categories: Vec::new(),
        }
    }
}

impl ObservabilityConfig {
    /// Parse a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Layer environment overrides on top of this configuration
    pub fn apply_env(self) -> Result<Self> {
        self.apply_overrides(
            std::env::var(DEBUG_CATEGORIES_ENV).ok().as_deref(),
            std::env::var(LOG_FORMAT_ENV).ok().as_deref(),
        )
    }

    fn apply_overrides(mut self, categories: Option<&str>, format: Option<&str>) -> Result<Self> {
        if let Some(categories) = categories {
            self.logging.enabled_categories.extend(
                categories
                    .split(',')
                    .map(str::trim)
                    .filter(|pattern| !pattern.is_empty())
                    .map(str::to_string),
            );
        }

        if let Some(format) = format {
            self.logging.format = match format.to_ascii_lowercase().as_str() {
                "pretty" => LogFormat::Pretty,
                "compact" => LogFormat::Compact,
                "json" => LogFormat::Json,
                other => {
                    return Err(LoggingError::Config(format!(
                        "unknown log format '{other}'"
                    )));
                }
            };
        }

        Ok(self)
    }

    /// Reject values that would make the core misbehave
    pub fn validate(&self) -> Result<()> {
        let percentages = [
            ("memory.pressure_threshold_percent", self.memory.pressure_threshold_percent),
            ("emergency.cpu_threshold_percent", self.emergency.cpu_threshold_percent),
            ("emergency.memory_threshold_percent", self.emergency.memory_threshold_percent),
            ("emergency.disk_threshold_percent", self.emergency.disk_threshold_percent),
        ];
        for (name, value) in percentages {
            if !(value > 0.0 && value <= 100.0) {
                return Err(LoggingError::Config(format!(
                    "{name} must be in (0, 100], got {value}"
                )));
            }
        }

        if self.performance_threshold < 0.0 {
            return Err(LoggingError::Config(
                "performance_threshold cannot be negative".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.sanitization.confidence_floor) {
            return Err(LoggingError::Config(format!(
                "sanitization.confidence_floor must be in [0, 1], got {}",
                self.sanitization.confidence_floor
            )));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(LoggingError::Config(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }

        if self.sweep_interval_ms == 0 {
            return Err(LoggingError::Config(
                "sweep_interval_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Trace retention as a duration
    pub fn trace_retention(&self) -> Duration {
        Duration::from_millis(self.trace_retention_ms)
    }

    /// Sweep interval as a duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
