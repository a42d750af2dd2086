//! Observability core for claude-flow
//!
//! This crate provides the logging and tracing layer shared by the orchestrator:
//! - Memory-pressure-aware debug logging with category filtering
//! - Circuit breaker protection around log emission
//! - MCP (JSON-RPC) protocol compliance tracing and correlation
//! - Tool invocation tracing with PII redaction
//! - Emergency mode that sheds non-essential logging under resource exhaustion
//!
//! # Example
//!
//! ```rust,no_run
//! use flow_observability::{ObservabilityConfig, ObservabilityContext};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> flow_observability::Result<()> {
//!     let context = ObservabilityContext::init(ObservabilityConfig::default())?;
//!
//!     let logger = context.logger().with_component("orchestrator");
//!     logger.info("core:orchestrator", "swarm started", Some(json!({"agents": 4})), None);
//!
//!     let tracer = context.tracer();
//!     let correlation_id = tracer.trace_protocol_message(
//!         flow_observability::Direction::Inbound,
//!         flow_observability::MessageType::Request,
//!         &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
//!         None,
//!         None,
//!     );
//!     println!("traced {correlation_id}");
//!
//!     context.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod context;
pub mod emergency;
pub mod logger;
pub mod memory;
pub mod metrics;
pub mod performance;
pub mod pii;
pub mod protocol;
pub mod sink;

// Re-export main types for convenience
pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use config::{
    EmergencyConfig, LogFormat, LoggingConfig, MemoryConfig, ObservabilityConfig,
    SanitizationConfig,
};
pub use context::{ObservabilityBuilder, ObservabilityContext, SweepReport, init_tracing};
pub use emergency::{
    EmergencyActivation, EmergencyManager, EmergencyMetrics, EmergencyReason, EmergencyState,
    FixedLoadProbe, LoadProbe, SystemLoad, SystemLoadProbe,
};
pub use logger::{
    CategorySet, CorrelationBinding, DebugLogger, LoggerParts, SymbolUsage, UsageAnalytics,
};
pub use memory::{
    ManualMemoryMonitor, MemoryMonitor, MemorySnapshot, PressureCallback, SystemMemoryMonitor,
};
pub use metrics::{
    CorrelationMetrics, MetricsCollector, PerformanceMetrics, ProtocolComplianceMetrics,
    ToolMetrics, TracerMetrics,
};
pub use performance::PerformanceCounter;
pub use pii::{
    FailurePolicy, LogSanitizer, PatternDetector, PiiDetection, PiiDetector, PiiRedactor,
    PiiType, RedactionKind, RedactionStrategy, StrategyRedactor,
};
pub use protocol::{
    ComplianceViolation, CorrelationStatus, CrossSystemCorrelation, Direction, ErrorCategory,
    MessageType, ProtocolInfo, ProtocolTrace, ProtocolTracer, ProtocolVersion, SessionInfo,
    ToolExecution, ToolInvocationTrace, ToolParameters, TraceContext, TraceError,
};
pub use sink::{LogLevel, LogRecord, LogSink, MemorySink, OutputStream, RecordTags, TracingSink};

/// Result type for logging operations
pub type Result<T> = std::result::Result<T, LoggingError>;

/// Logging error types
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Tracing error: {0}")]
    Tracing(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Redaction error: {0}")]
    Redaction(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Extract a readable message from a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
