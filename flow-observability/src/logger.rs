//! Memory-aware debug logger
//!
//! Every emission goes through the same admission steps:
//! - emergency evaluation (activation is announced once at error level)
//! - debug calls are dropped outright under memory pressure
//! - everything else runs inside the shared [`CircuitBreaker`], where the
//!   category filter is applied and the record is written to the sink
//!
//! Loggers are cheap handles. `with_*` derivations return a new handle bound to
//! a new [`CorrelationBinding`] while sharing the sink, monitor and breaker.

use crate::circuit_breaker::CircuitBreaker;
use crate::emergency::{EmergencyActivation, EmergencyManager};
use crate::memory::MemoryMonitor;
use crate::performance::PerformanceCounter;
use crate::pii::LogSanitizer;
use crate::sink::{LogLevel, LogRecord, LogSink, OutputStream, RecordTags};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::debug;

/// Component name used when a logger has not been bound to one
pub const DEFAULT_COMPONENT: &str = "claude-flow";

const INTERNAL_CATEGORY: &str = "flow:observability";

/// Set of enabled category patterns
///
/// Patterns are exact names, the global wildcard `*`, or namespace wildcards
/// `ns:*` / `ns.*` matching every category below `ns`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategorySet {
    exact: HashSet<String>,
    prefixes: Vec<String>,
    all: bool,
}

impl CategorySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comma or whitespace separated pattern list (`"core:*,mcp:*"`)
    pub fn parse(patterns: &str) -> Self {
        let mut set = Self::new();
        for pattern in patterns
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|pattern| !pattern.is_empty())
        {
            set.set_enabled(pattern, true);
        }
        set
    }

    /// Whether `category` is enabled: exact match, then `*`, then namespace wildcards
    pub fn is_enabled(&self, category: &str) -> bool {
        if self.exact.contains(category) {
            return true;
        }
        if self.all {
            return true;
        }
        self.prefixes
            .iter()
            .any(|prefix| category.len() > prefix.len() && category.starts_with(prefix.as_str()))
    }

    /// Add or remove one pattern; other patterns are left untouched
    pub fn set_enabled(&mut self, pattern: &str, enabled: bool) {
        let pattern = pattern.trim();
        if pattern == "*" {
            self.all = enabled;
        } else if let Some(prefix) = namespace_prefix(pattern) {
            let present = self.prefixes.iter().any(|existing| existing == prefix);
            if enabled && !present {
                self.prefixes.push(prefix.to_string());
            } else if !enabled {
                self.prefixes.retain(|existing| existing != prefix);
            }
        } else if enabled {
            self.exact.insert(pattern.to_string());
        } else {
            self.exact.remove(pattern);
        }
    }

    /// Enabled patterns, sorted
    pub fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self.exact.iter().cloned().collect();
        patterns.extend(self.prefixes.iter().map(|prefix| format!("{prefix}*")));
        if self.all {
            patterns.push("*".to_string());
        }
        patterns.sort();
        patterns
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.exact.is_empty() && self.prefixes.is_empty()
    }
}

/// `"ns:*"` -> `"ns:"`
fn namespace_prefix(pattern: &str) -> Option<&str> {
    let prefix = pattern.strip_suffix('*')?;
    (prefix.len() > 1 && (prefix.ends_with(':') || prefix.ends_with('.'))).then_some(prefix)
}

/// Context attached to a logger handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationBinding {
    pub correlation_id: Option<String>,
    pub session_id: Option<String>,
    pub component: String,
    /// Records are written under the protocol output discipline
    pub mcp_compliant: bool,
}

impl Default for CorrelationBinding {
    fn default() -> Self {
        Self {
            correlation_id: None,
            session_id: None,
            component: DEFAULT_COMPONENT.to_string(),
            mcp_compliant: false,
        }
    }
}

/// Per-symbol usage counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolUsage {
    pub count: u64,
    pub locations: Vec<String>,
}

/// Snapshot of usage counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageAnalytics {
    pub total_calls: u64,
    pub symbol_usage: BTreeMap<String, SymbolUsage>,
}

/// Collaborators a logger is assembled from
pub struct LoggerParts {
    pub sink: Arc<dyn LogSink>,
    pub memory: Arc<dyn MemoryMonitor>,
    pub breaker: Arc<CircuitBreaker>,
    pub emergency: Option<Arc<EmergencyManager>>,
    /// Redact messages and payloads before they reach the sink
    pub sanitizer: Option<LogSanitizer>,
    pub categories: CategorySet,
    pub max_usage_locations: usize,
}

impl LoggerParts {
    pub fn new(
        sink: Arc<dyn LogSink>,
        memory: Arc<dyn MemoryMonitor>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            sink,
            memory,
            breaker,
            emergency: None,
            sanitizer: None,
            categories: CategorySet::new(),
            max_usage_locations: 100,
        }
    }
}

struct LoggerShared {
    sink: Arc<dyn LogSink>,
    memory: Arc<dyn MemoryMonitor>,
    breaker: Arc<CircuitBreaker>,
    emergency: Option<Arc<EmergencyManager>>,
    sanitizer: Option<LogSanitizer>,
    categories: RwLock<CategorySet>,
    performance: PerformanceCounter,
    usage: Mutex<UsageAnalytics>,
    max_usage_locations: usize,
}

enum Admission {
    Drop,
    Direct,
    Protected,
}

/// Debug logger handle
#[derive(Clone)]
pub struct DebugLogger {
    shared: Arc<LoggerShared>,
    binding: Arc<CorrelationBinding>,
}

impl DebugLogger {
    pub fn new(parts: LoggerParts) -> Self {
        Self {
            shared: Arc::new(LoggerShared {
                sink: parts.sink,
                memory: parts.memory,
                breaker: parts.breaker,
                emergency: parts.emergency,
                sanitizer: parts.sanitizer,
                categories: RwLock::new(parts.categories),
                performance: PerformanceCounter::new(),
                usage: Mutex::new(UsageAnalytics::default()),
                max_usage_locations: parts.max_usage_locations.max(1),
            }),
            binding: Arc::new(CorrelationBinding::default()),
        }
    }

    fn derive(&self, update: impl FnOnce(&mut CorrelationBinding)) -> Self {
        let mut binding = (*self.binding).clone();
        update(&mut binding);
        Self {
            shared: self.shared.clone(),
            binding: Arc::new(binding),
        }
    }

    pub fn with_correlation_id(&self, correlation_id: impl Into<String>) -> Self {
        let correlation_id = correlation_id.into();
        self.derive(|binding| binding.correlation_id = Some(correlation_id))
    }

    pub fn with_session_id(&self, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        self.derive(|binding| binding.session_id = Some(session_id))
    }

    pub fn with_component(&self, component: impl Into<String>) -> Self {
        let component = component.into();
        self.derive(|binding| binding.component = component)
    }

    pub fn with_mcp_compliant(&self, mcp_compliant: bool) -> Self {
        self.derive(|binding| binding.mcp_compliant = mcp_compliant)
    }

    pub fn bound_context(&self) -> &CorrelationBinding {
        &self.binding
    }

    pub fn debug(
        &self,
        category: &str,
        message: &str,
        data: Option<Value>,
        correlation_id: Option<&str>,
    ) {
        self.log(LogLevel::Debug, category, message, data, correlation_id);
    }

    pub fn info(
        &self,
        category: &str,
        message: &str,
        data: Option<Value>,
        correlation_id: Option<&str>,
    ) {
        self.log(LogLevel::Info, category, message, data, correlation_id);
    }

    pub fn warn(
        &self,
        category: &str,
        message: &str,
        data: Option<Value>,
        correlation_id: Option<&str>,
    ) {
        self.log(LogLevel::Warn, category, message, data, correlation_id);
    }

    pub fn error(
        &self,
        category: &str,
        message: &str,
        data: Option<Value>,
        correlation_id: Option<&str>,
    ) {
        self.log(LogLevel::Error, category, message, data, correlation_id);
    }

    /// Debug message built only when it will be emitted
    pub fn debug_lazy<F>(&self, category: &str, factory: F)
    where
        F: FnOnce() -> String,
    {
        let _measure = self.shared.performance.measure();
        if !matches!(self.admit(LogLevel::Debug), Admission::Protected)
            || !self.is_enabled(category)
        {
            return;
        }

        match catch_unwind(AssertUnwindSafe(factory)) {
            Ok(message) => {
                self.protected_write(LogLevel::Debug, category, &message, None, None, true);
            }
            Err(payload) => self.internal_warning(
                "Debug message factory failed",
                crate::panic_message(payload.as_ref()),
                category,
            ),
        }
    }

    /// Debug message emitted only when `condition` holds
    pub fn debug_if<F>(&self, condition: F, category: &str, message: &str, data: Option<Value>)
    where
        F: FnOnce() -> bool,
    {
        let _measure = self.shared.performance.measure();
        if !matches!(self.admit(LogLevel::Debug), Admission::Protected)
            || !self.is_enabled(category)
        {
            return;
        }

        match catch_unwind(AssertUnwindSafe(condition)) {
            Ok(true) => {
                self.protected_write(LogLevel::Debug, category, message, data, None, true);
            }
            Ok(false) => {}
            Err(payload) => self.internal_warning(
                "Debug condition failed",
                crate::panic_message(payload.as_ref()),
                category,
            ),
        }
    }

    pub fn is_enabled(&self, category: &str) -> bool {
        self.shared.categories.read().is_enabled(category)
    }

    pub fn set_enabled(&self, category: &str, enabled: bool) {
        self.shared.categories.write().set_enabled(category, enabled);
    }

    pub fn enabled_categories(&self) -> Vec<String> {
        self.shared.categories.read().patterns()
    }

    /// Share of wall time spent inside the logger, in percent
    pub fn measure_overhead(&self) -> f64 {
        self.shared.performance.overhead_percent()
    }

    pub fn performance(&self) -> &PerformanceCounter {
        &self.shared.performance
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.shared.breaker
    }

    pub fn memory(&self) -> &Arc<dyn MemoryMonitor> {
        &self.shared.memory
    }

    pub fn emergency(&self) -> Option<&Arc<EmergencyManager>> {
        self.shared.emergency.as_ref()
    }

    /// Count a use of `symbol` at `location`
    pub fn track_usage(&self, symbol: &str, location: &str) {
        let max = self.shared.max_usage_locations;
        let mut usage = self.shared.usage.lock();
        usage.total_calls += 1;

        let entry = usage.symbol_usage.entry(symbol.to_string()).or_default();
        entry.count += 1;
        if !entry.locations.iter().any(|known| known == location) {
            if entry.locations.len() >= max {
                entry.locations.remove(0);
            }
            entry.locations.push(location.to_string());
        }
    }

    pub fn get_usage_analytics(&self) -> UsageAnalytics {
        self.shared.usage.lock().clone()
    }

    /// Keep at most `max` most recent locations per symbol
    pub fn trim_usage_locations(&self, max: usize) {
        let mut usage = self.shared.usage.lock();
        for entry in usage.symbol_usage.values_mut() {
            if entry.locations.len() > max {
                let excess = entry.locations.len() - max;
                entry.locations.drain(..excess);
            }
        }
    }

    /// Run emergency evaluation now, announcing a pending activation
    pub fn check_emergency(&self) {
        if let Some(emergency) = &self.shared.emergency {
            if let Some(activation) = emergency.evaluate() {
                self.announce(&activation);
            }
        }
    }

    pub fn flush(&self) {
        if let Err(error) = self.shared.sink.flush() {
            debug!(error = %error, "Sink flush failed");
        }
    }

    fn log(
        &self,
        level: LogLevel,
        category: &str,
        message: &str,
        data: Option<Value>,
        correlation_id: Option<&str>,
    ) {
        let _measure = self.shared.performance.measure();
        match self.admit(level) {
            Admission::Drop => {}
            Admission::Direct => {
                let record = self.sanitized_record(level, category, message, data, correlation_id);
                self.write_direct(&record);
            }
            Admission::Protected => {
                let gated = level <= LogLevel::Info;
                self.protected_write(level, category, message, data, correlation_id, gated);
            }
        }
    }

    /// Emit through the breaker without consulting the category filter
    ///
    /// Returns whether the record reached the sink.
    pub(crate) fn log_essential(
        &self,
        level: LogLevel,
        category: &str,
        message: &str,
        data: Option<Value>,
        correlation_id: Option<&str>,
    ) -> bool {
        let _measure = self.shared.performance.measure();
        match self.admit(level) {
            Admission::Drop => false,
            Admission::Direct => {
                let record = self.sanitized_record(level, category, message, data, correlation_id);
                self.write_direct(&record)
            }
            Admission::Protected => {
                self.protected_write(level, category, message, data, correlation_id, false)
            }
        }
    }

    fn admit(&self, level: LogLevel) -> Admission {
        if let Some(emergency) = &self.shared.emergency {
            if let Some(activation) = emergency.evaluate() {
                self.announce(&activation);
            }
            if emergency.is_active() {
                return match level {
                    LogLevel::Debug => {
                        emergency.record_suppressed();
                        Admission::Drop
                    }
                    LogLevel::Info => Admission::Protected,
                    LogLevel::Warn | LogLevel::Error => Admission::Direct,
                };
            }
        }

        if level == LogLevel::Debug && self.shared.memory.is_memory_pressure_high() {
            return Admission::Drop;
        }
        Admission::Protected
    }

    fn protected_write(
        &self,
        level: LogLevel,
        category: &str,
        message: &str,
        data: Option<Value>,
        correlation_id: Option<&str>,
        gated: bool,
    ) -> bool {
        self.shared
            .breaker
            .execute(|| {
                if gated && !self.is_enabled(category) {
                    return Ok(false);
                }
                let record = self.sanitized_record(level, category, message, data, correlation_id);
                self.shared.sink.write(&record).map(|()| true)
            })
            .unwrap_or(false)
    }

    fn sanitized_record(
        &self,
        level: LogLevel,
        category: &str,
        message: &str,
        data: Option<Value>,
        correlation_id: Option<&str>,
    ) -> LogRecord {
        let Some(sanitizer) = &self.shared.sanitizer else {
            return self.record(level, category, message.to_string(), data, correlation_id);
        };

        let text = sanitizer.sanitize_text_or_fallback(message);
        let mut failure = text.failure;
        let data = data.map(|data| {
            let sanitized = sanitizer.sanitize_value_or_fallback(&data);
            failure = failure.take().or(sanitized.failure);
            sanitized.value
        });

        if let Some(failure) = failure {
            self.internal_warning("Redaction failed, applying failure policy", failure, category);
        }
        self.record(level, category, text.value, data, correlation_id)
    }

    fn record(
        &self,
        level: LogLevel,
        category: &str,
        message: String,
        data: Option<Value>,
        correlation_id: Option<&str>,
    ) -> LogRecord {
        LogRecord {
            timestamp: Utc::now(),
            level,
            category: category.to_string(),
            message,
            data,
            correlation_id: correlation_id
                .map(str::to_string)
                .or_else(|| self.binding.correlation_id.clone()),
            session_id: self.binding.session_id.clone(),
            tags: RecordTags {
                component: self.binding.component.clone(),
                mcp_compliant: self.binding.mcp_compliant,
                output_stream: OutputStream::Stderr,
            },
        }
    }

    /// Write bypassing the breaker; sink failures are swallowed
    fn write_direct(&self, record: &LogRecord) -> bool {
        let result = catch_unwind(AssertUnwindSafe(|| self.shared.sink.write(record)));
        match result {
            Ok(Ok(())) => true,
            Ok(Err(error)) => {
                debug!(error = %error, "Direct write failed");
                false
            }
            Err(payload) => {
                debug!(
                    panic = %crate::panic_message(payload.as_ref()),
                    "Direct write panicked"
                );
                false
            }
        }
    }

    /// Warning about the logger itself, always written
    pub(crate) fn internal_warning(&self, message: &str, detail: String, category: &str) {
        let record = self.record(
            LogLevel::Warn,
            INTERNAL_CATEGORY,
            message.to_string(),
            Some(json!({ "error": detail, "category": category })),
            None,
        );
        self.write_direct(&record);
    }

    fn announce(&self, activation: &EmergencyActivation) {
        let data = serde_json::to_value(activation).ok();
        let record = self.record(
            LogLevel::Error,
            "flow:emergency",
            format!("Emergency mode activated: {}", activation.reason),
            data,
            None,
        );
        self.write_direct(&record);
    }
}

#[cfg(test)]
#[path = "logger_tests.rs"]
mod logger_tests;
