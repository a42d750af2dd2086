//! MCP protocol tracing
//!
//! [`ProtocolTracer`] records one [`ProtocolTrace`] per observed JSON-RPC
//! message, keyed by correlation id, and writes an audit record for each trace
//! to the compliant channel. Cross-system correlation and tool invocation
//! tracing live in the `correlation` and `tools` sub-modules.

mod compliance;
mod correlation;
mod tools;

pub use compliance::{
    ComplianceViolation, PROTOCOL_ERROR_CODES, TRANSPORT_ERROR_CODES, categorize_error,
    check_envelope, extract_error, is_compliant,
};
pub use correlation::{CorrelationStatus, CrossSystemCorrelation};
pub use tools::{ToolExecution, ToolInvocationTrace, ToolParameters};

use crate::config::ObservabilityConfig;
use crate::logger::DebugLogger;
use crate::metrics::{MetricsCollector, PerformanceMetrics, TracerMetrics};
use crate::pii::LogSanitizer;
use crate::sink::LogLevel;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const PROTOCOL_CATEGORY: &str = "mcp:protocol";
const COMPLIANCE_CATEGORY: &str = "mcp:compliance";

/// Component name carried by tracer records
pub const TRACER_COMPONENT: &str = "mcp-protocol-tracer";

/// Message direction relative to this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        })
    }
}

/// JSON-RPC message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Request,
    Response,
    Notification,
    Error,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Notification => "notification",
            MessageType::Error => "error",
        })
    }
}

/// Error triage bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Transport,
    Protocol,
    Correlation,
    Application,
}

/// Error carried by a traced message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceError {
    pub code: i64,
    pub message: String,
    pub category: ErrorCategory,
}

/// MCP protocol version negotiated for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Session supplied by the host protocol runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub protocol_version: ProtocolVersion,
    pub transport: String,
    #[serde(default)]
    pub capabilities: Value,
}

impl SessionInfo {
    pub fn new(id: impl Into<String>, transport: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            protocol_version: ProtocolVersion::default(),
            transport: transport.into(),
            capabilities: Value::Null,
        }
    }
}

/// Caller-supplied tracing context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceContext {
    pub correlation_id: Option<String>,
    pub session_id: Option<String>,
    /// Session id of the cooperating foreign system
    pub claude_code_session_id: Option<String>,
}

/// Protocol envelope facts of a traced message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolInfo {
    pub version: String,
    pub transport: String,
    pub compliance: bool,
}

/// One observed protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolTrace {
    pub correlation_id: String,
    pub direction: Direction,
    pub message_type: MessageType,
    pub method: Option<String>,
    pub protocol: ProtocolInfo,
    pub session_id: Option<String>,
    pub claude_code_session_id: Option<String>,
    pub error: Option<TraceError>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct TracerSettings {
    enable_tracing: bool,
    enable_cross_system_correlation: bool,
    enable_tool_tracing: bool,
    trace_retention: Duration,
    max_traces: usize,
    max_tool_history: usize,
}

impl From<&ObservabilityConfig> for TracerSettings {
    fn from(config: &ObservabilityConfig) -> Self {
        Self {
            enable_tracing: config.enable_tracing,
            enable_cross_system_correlation: config.enable_cross_system_correlation,
            enable_tool_tracing: config.enable_tool_tracing,
            trace_retention: config.trace_retention(),
            max_traces: config.max_traces.max(1),
            max_tool_history: config.max_tool_history,
        }
    }
}

/// Traces by correlation id plus their insertion order
///
/// `order` holds one entry per stored trace; the entries for one id appear in
/// the same sequence as that id's list, so the front always names a list head.
#[derive(Default)]
struct TraceStore {
    by_id: HashMap<String, Vec<ProtocolTrace>>,
    order: VecDeque<(DateTime<Utc>, String)>,
}

impl TraceStore {
    fn push(&mut self, trace: ProtocolTrace) {
        self.order
            .push_back((trace.started_at, trace.correlation_id.clone()));
        self.by_id
            .entry(trace.correlation_id.clone())
            .or_default()
            .push(trace);
    }

    /// Drop the single oldest trace
    fn evict_oldest(&mut self) -> bool {
        let Some((_, id)) = self.order.pop_front() else {
            return false;
        };
        let Some(list) = self.by_id.get_mut(&id) else {
            return false;
        };
        if !list.is_empty() {
            list.remove(0);
        }
        if list.is_empty() {
            self.by_id.remove(&id);
        }
        true
    }

    /// Drop every trace started at or before `cutoff`, returning how many
    fn purge_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.by_id.retain(|_, list| {
            let before = list.len();
            list.retain(|trace| trace.started_at > cutoff);
            removed += before - list.len();
            !list.is_empty()
        });
        self.order.retain(|(started_at, _)| *started_at > cutoff);
        removed
    }
}

struct TracerState {
    settings: TracerSettings,
    logger: DebugLogger,
    sanitizer: LogSanitizer,
    traces: RwLock<TraceStore>,
    trace_count: AtomicUsize,
    correlations: RwLock<HashMap<String, CrossSystemCorrelation>>,
    active_tools: Mutex<HashMap<String, ToolInvocationTrace>>,
    tool_history: Mutex<VecDeque<ToolInvocationTrace>>,
    metrics: MetricsCollector,
}

/// Protocol, correlation and tool tracer
///
/// Cloning is cheap; clones share the same trace maps.
#[derive(Clone)]
pub struct ProtocolTracer {
    state: Arc<TracerState>,
}

impl ProtocolTracer {
    pub fn new(
        config: &ObservabilityConfig,
        logger: &DebugLogger,
        sanitizer: LogSanitizer,
    ) -> Self {
        Self {
            state: Arc::new(TracerState {
                settings: TracerSettings::from(config),
                logger: logger.with_component(TRACER_COMPONENT).with_mcp_compliant(true),
                sanitizer,
                traces: RwLock::new(TraceStore::default()),
                trace_count: AtomicUsize::new(0),
                correlations: RwLock::new(HashMap::new()),
                active_tools: Mutex::new(HashMap::new()),
                tool_history: Mutex::new(VecDeque::new()),
                metrics: MetricsCollector::new(),
            }),
        }
    }

    /// Record a protocol message and return its correlation id
    ///
    /// Never fails: malformed messages produce a non-compliant trace and a
    /// warning on the compliant channel.
    pub fn trace_protocol_message(
        &self,
        direction: Direction,
        message_type: MessageType,
        message: &Value,
        session: Option<&SessionInfo>,
        context: Option<&TraceContext>,
    ) -> String {
        let correlation_id = resolve_correlation_id(message, session);
        if !self.state.settings.enable_tracing {
            return correlation_id;
        }

        let verdict = check_envelope(message);
        let compliance = verdict.is_ok();
        self.state.metrics.record_message(compliance);

        let trace = ProtocolTrace {
            correlation_id: correlation_id.clone(),
            direction,
            message_type,
            method: message
                .get("method")
                .and_then(Value::as_str)
                .map(str::to_string),
            protocol: ProtocolInfo {
                version: protocol_version(message, session),
                transport: session
                    .map(|session| session.transport.clone())
                    .unwrap_or_else(|| "stdio".to_string()),
                compliance,
            },
            session_id: session
                .map(|session| session.id.clone())
                .or_else(|| context.and_then(|context| context.session_id.clone())),
            claude_code_session_id: context
                .and_then(|context| context.claude_code_session_id.clone()),
            error: extract_error(message),
            started_at: Utc::now(),
        };

        self.emit_trace(&trace);
        if let Err(violation) = verdict {
            let written = self.state.logger.log_essential(
                LogLevel::Warn,
                COMPLIANCE_CATEGORY,
                "Non-compliant MCP message",
                Some(json!({
                    "violation": violation.to_string(),
                    "direction": direction,
                    "message_type": message_type,
                })),
                Some(&correlation_id),
            );
            if written {
                self.state.metrics.record_stderr_write();
            }
        }
        self.store_trace(trace);

        correlation_id
    }

    fn emit_trace(&self, trace: &ProtocolTrace) {
        let mut data = json!({
            "direction": trace.direction,
            "message_type": trace.message_type,
            "method": trace.method,
            "protocol": trace.protocol,
        });
        if let Some(error) = &trace.error {
            data["error"] = json!(error);
        }

        let written = self.state.logger.log_essential(
            LogLevel::Info,
            PROTOCOL_CATEGORY,
            &format!("MCP {} {}", trace.direction, trace.message_type),
            Some(data),
            Some(&trace.correlation_id),
        );
        if written {
            self.state.metrics.record_stderr_write();
        }
    }

    /// Store a trace, evicting the oldest one at capacity
    ///
    /// Expiry is left to the sweep so this stays constant time.
    fn store_trace(&self, trace: ProtocolTrace) {
        let mut traces = self.state.traces.write();
        if self.state.trace_count.load(Ordering::Relaxed) >= self.state.settings.max_traces
            && traces.evict_oldest()
        {
            self.state.trace_count.fetch_sub(1, Ordering::Relaxed);
        }
        traces.push(trace);
        self.state.trace_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Traces recorded for `correlation_id`, in call order
    pub fn get_traces(&self, correlation_id: &str) -> Vec<ProtocolTrace> {
        self.state
            .traces
            .read()
            .by_id
            .get(correlation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of stored protocol traces
    pub fn trace_count(&self) -> usize {
        self.state.trace_count.load(Ordering::Relaxed)
    }

    /// Drop traces, closed correlations and abandoned tool invocations older
    /// than the retention period
    ///
    /// Returns the number of records removed.
    pub fn purge_expired(&self) -> usize {
        let cutoff = chrono::Duration::from_std(self.state.settings.trace_retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention));
        let Some(cutoff) = cutoff else {
            return 0;
        };

        let mut removed = {
            let mut traces = self.state.traces.write();
            let removed = traces.purge_before(cutoff);
            self.state.trace_count.fetch_sub(removed, Ordering::Relaxed);
            removed
        };

        removed += self.purge_closed_correlations(cutoff);
        removed += self.purge_abandoned_tool_invocations(cutoff);

        if removed > 0 {
            debug!(removed, "Purged expired protocol traces");
        }
        removed
    }

    /// Keep at most `max_tool_history` completed tool invocations
    pub fn trim_tool_history(&self) -> usize {
        let max = self.state.settings.max_tool_history;
        let mut history = self.state.tool_history.lock();
        let excess = history.len().saturating_sub(max);
        history.drain(..excess);
        excess
    }

    /// Aggregate metrics for dashboards
    pub fn get_metrics(&self) -> TracerMetrics {
        let memory = self.state.logger.memory().current_usage();
        self.state.metrics.snapshot(PerformanceMetrics {
            memory_usage: memory.heap_used,
            memory_pressure_percent: memory.pressure_percent(),
            overhead_percent: self.state.logger.measure_overhead(),
        })
    }

    pub(crate) fn logger(&self) -> &DebugLogger {
        &self.state.logger
    }
}

/// Message id verbatim, else session-derived, else generated
fn resolve_correlation_id(message: &Value, session: Option<&SessionInfo>) -> String {
    match message.get("id") {
        Some(Value::String(id)) if !id.is_empty() => return id.clone(),
        Some(Value::Number(id)) => return id.to_string(),
        _ => {}
    }

    match session {
        Some(session) => format!("{}-{}", session.id, short_id()),
        None => generate_correlation_id(),
    }
}

fn protocol_version(message: &Value, session: Option<&SessionInfo>) -> String {
    if let Some(session) = session {
        return session.protocol_version.to_string();
    }
    message
        .get("jsonrpc")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

/// Generate a correlation ID for request tracing
pub(crate) fn generate_correlation_id() -> String {
    let uuid = Uuid::new_v4();
    let bytes = uuid.as_bytes();
    hex::encode(&bytes[..12]) // 24 character hex string
}

fn short_id() -> String {
    let uuid = Uuid::new_v4();
    hex::encode(&uuid.as_bytes()[..4])
}

#[cfg(test)]
#[path = "tracer_tests.rs"]
mod tracer_tests;
