//! Unit tests for the protocol tracer

use super::ProtocolTracer;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::ObservabilityConfig;
use crate::logger::{CategorySet, DebugLogger, LoggerParts};
use crate::memory::ManualMemoryMonitor;
use crate::pii::LogSanitizer;
use crate::sink::MemorySink;
use std::sync::Arc;

pub(super) struct Harness {
    pub sink: Arc<MemorySink>,
    pub memory: Arc<ManualMemoryMonitor>,
    pub tracer: ProtocolTracer,
}

/// Tracer writing to an in-memory sink with every category enabled
pub(super) fn harness(config: ObservabilityConfig) -> Harness {
    let sanitizer = LogSanitizer::new(&config.sanitization);
    harness_with_sanitizer(config, sanitizer)
}

pub(super) fn harness_with_sanitizer(config: ObservabilityConfig, sanitizer: LogSanitizer) -> Harness {
    let sink = Arc::new(MemorySink::new());
    let memory = Arc::new(ManualMemoryMonitor::new(95.0));
    memory.set_level(25.0);

    let mut parts = LoggerParts::new(
        sink.clone(),
        memory.clone(),
        Arc::new(CircuitBreaker::new(&config.circuit_breaker)),
    );
    parts.categories = CategorySet::parse("*");
    let logger = DebugLogger::new(parts);
    let tracer = ProtocolTracer::new(&config, &logger, sanitizer);

    Harness {
        sink,
        memory,
        tracer,
    }
}

#[cfg(test)]
mod tests {
    use super::super::*;
    use super::harness;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::logger::LoggerParts;
    use crate::memory::ManualMemoryMonitor;
    use crate::sink::{LogLevel, MemorySink, OutputStream};

    fn initialize() -> Value {
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}})
    }

    #[test]
    fn test_compliant_request_traced() {
        let h = harness(ObservabilityConfig::default());
        let id = h.tracer.trace_protocol_message(
            Direction::Inbound,
            MessageType::Request,
            &initialize(),
            None,
            None,
        );
        assert_eq!(id, "1");

        let traces = h.tracer.get_traces("1");
        assert_eq!(traces.len(), 1);
        let trace = &traces[0];
        assert!(trace.protocol.compliance);
        assert_eq!(trace.protocol.version, "2.0");
        assert_eq!(trace.protocol.transport, "stdio");
        assert_eq!(trace.method.as_deref(), Some("initialize"));
        assert_eq!(trace.direction, Direction::Inbound);
    }

    #[test]
    fn test_wrong_version_is_non_compliant() {
        let h = harness(ObservabilityConfig::default());
        let message = json!({"jsonrpc": "1.0", "id": 1, "method": "test"});
        h.tracer
            .trace_protocol_message(Direction::Inbound, MessageType::Request, &message, None, None);

        assert!(!h.tracer.get_traces("1")[0].protocol.compliance);
        let warnings = h.sink.records_at(LogLevel::Warn);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].category, "mcp:compliance");

        let metrics = h.tracer.get_metrics().protocol_compliance;
        assert_eq!(metrics.total_messages, 1);
        assert_eq!(metrics.violations, 1);
        assert_eq!(metrics.compliant_messages, 0);
    }

    #[test]
    fn test_null_message_never_fails() {
        let h = harness(ObservabilityConfig::default());
        let id = h.tracer.trace_protocol_message(
            Direction::Inbound,
            MessageType::Request,
            &Value::Null,
            None,
            None,
        );
        assert_eq!(id.len(), 24);
        assert!(!h.tracer.get_traces(&id)[0].protocol.compliance);
    }

    #[test]
    fn test_records_are_tagged_for_the_compliant_channel() {
        let h = harness(ObservabilityConfig::default());
        h.tracer.trace_protocol_message(
            Direction::Outbound,
            MessageType::Response,
            &json!({"jsonrpc": "2.0", "id": 1, "result": {}}),
            None,
            None,
        );

        let records = h.sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(record.tags.mcp_compliant);
        assert_eq!(record.tags.output_stream, OutputStream::Stderr);
        assert_eq!(record.tags.component, TRACER_COMPONENT);
        assert_eq!(record.correlation_id.as_deref(), Some("1"));
        assert_eq!(h.tracer.get_metrics().protocol_compliance.stderr_usage, 1);
    }

    #[test]
    fn test_trace_records_ignore_category_filter() {
        let sink = Arc::new(MemorySink::new());
        let memory = Arc::new(ManualMemoryMonitor::new(95.0));
        let logger = DebugLogger::new(LoggerParts::new(
            sink.clone(),
            memory,
            Arc::new(CircuitBreaker::default()),
        ));
        let tracer = ProtocolTracer::new(
            &ObservabilityConfig::default(),
            &logger,
            LogSanitizer::default(),
        );

        tracer.trace_protocol_message(
            Direction::Inbound,
            MessageType::Request,
            &initialize(),
            None,
            None,
        );
        assert_eq!(sink.records_at(LogLevel::Info).len(), 1);
    }

    #[test]
    fn test_correlation_id_resolution() {
        let h = harness(ObservabilityConfig::default());
        let session = SessionInfo {
            id: "session-9".to_string(),
            protocol_version: ProtocolVersion {
                major: 2024,
                minor: 11,
                patch: 5,
            },
            transport: "http".to_string(),
            capabilities: json!({"tools": {}}),
        };

        let from_id = h.tracer.trace_protocol_message(
            Direction::Inbound,
            MessageType::Request,
            &json!({"jsonrpc": "2.0", "id": "req-42", "method": "tools/list"}),
            Some(&session),
            None,
        );
        assert_eq!(from_id, "req-42");

        let from_session = h.tracer.trace_protocol_message(
            Direction::Inbound,
            MessageType::Notification,
            &json!({"jsonrpc": "2.0", "method": "notifications/progress"}),
            Some(&session),
            None,
        );
        assert!(from_session.starts_with("session-9-"));
        let trace = &h.tracer.get_traces(&from_session)[0];
        assert_eq!(trace.protocol.version, "2024.11.5");
        assert_eq!(trace.protocol.transport, "http");
        assert_eq!(trace.session_id.as_deref(), Some("session-9"));

        let empty_id = h.tracer.trace_protocol_message(
            Direction::Inbound,
            MessageType::Request,
            &json!({"jsonrpc": "2.0", "id": "", "method": "ping"}),
            None,
            None,
        );
        assert_eq!(empty_id.len(), 24);
    }

    #[test]
    fn test_same_id_traces_kept_in_order() {
        let h = harness(ObservabilityConfig::default());
        h.tracer.trace_protocol_message(
            Direction::Inbound,
            MessageType::Request,
            &initialize(),
            None,
            None,
        );
        h.tracer.trace_protocol_message(
            Direction::Outbound,
            MessageType::Response,
            &json!({"jsonrpc": "2.0", "id": 1, "result": {"protocolVersion": "2024-11-05"}}),
            None,
            None,
        );

        let traces = h.tracer.get_traces("1");
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].message_type, MessageType::Request);
        assert_eq!(traces[1].message_type, MessageType::Response);
    }

    #[test]
    fn test_error_response_categorized() {
        let h = harness(ObservabilityConfig::default());
        let context = TraceContext {
            claude_code_session_id: Some("code-1".to_string()),
            ..Default::default()
        };
        h.tracer.trace_protocol_message(
            Direction::Outbound,
            MessageType::Error,
            &json!({
                "jsonrpc": "2.0",
                "id": 5,
                "error": {"code": -32601, "message": "Method not found"}
            }),
            None,
            Some(&context),
        );

        let trace = &h.tracer.get_traces("5")[0];
        let error = trace.error.as_ref().unwrap();
        assert_eq!(error.category, ErrorCategory::Transport);
        assert_eq!(trace.claude_code_session_id.as_deref(), Some("code-1"));
    }

    #[test]
    fn test_disabled_tracing_is_noop() {
        let h = harness(ObservabilityConfig {
            enable_tracing: false,
            ..Default::default()
        });
        let id = h.tracer.trace_protocol_message(
            Direction::Inbound,
            MessageType::Request,
            &initialize(),
            None,
            None,
        );
        assert_eq!(id, "1");
        assert!(h.tracer.get_traces("1").is_empty());
        assert!(h.sink.is_empty());
        assert_eq!(h.tracer.get_metrics().protocol_compliance.total_messages, 0);
    }

    #[test]
    fn test_expired_traces_purged() {
        let h = harness(ObservabilityConfig {
            trace_retention_ms: 10,
            ..Default::default()
        });
        h.tracer.trace_protocol_message(
            Direction::Inbound,
            MessageType::Request,
            &initialize(),
            None,
            None,
        );
        assert_eq!(h.tracer.purge_expired(), 0);

        std::thread::sleep(std::time::Duration::from_millis(30));
        assert_eq!(h.tracer.purge_expired(), 1);
        assert!(h.tracer.get_traces("1").is_empty());
        assert_eq!(h.tracer.trace_count(), 0);
    }

    #[test]
    fn test_trace_capacity_evicts_oldest() {
        let h = harness(ObservabilityConfig {
            max_traces: 2,
            ..Default::default()
        });
        for id in 1..=3 {
            h.tracer.trace_protocol_message(
                Direction::Inbound,
                MessageType::Request,
                &json!({"jsonrpc": "2.0", "id": id, "method": "ping"}),
                None,
                None,
            );
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        assert_eq!(h.tracer.trace_count(), 2);
        assert!(h.tracer.get_traces("1").is_empty());
        assert_eq!(h.tracer.get_traces("3").len(), 1);
    }

    #[test]
    fn test_capacity_evicts_single_oldest_trace() {
        let h = harness(ObservabilityConfig {
            max_traces: 3,
            ..Default::default()
        });
        h.tracer.trace_protocol_message(
            Direction::Inbound,
            MessageType::Request,
            &initialize(),
            None,
            None,
        );
        h.tracer.trace_protocol_message(
            Direction::Outbound,
            MessageType::Response,
            &json!({"jsonrpc": "2.0", "id": 1, "result": {}}),
            None,
            None,
        );
        for id in 2..=3 {
            h.tracer.trace_protocol_message(
                Direction::Inbound,
                MessageType::Request,
                &json!({"jsonrpc": "2.0", "id": id, "method": "ping"}),
                None,
                None,
            );
        }

        assert_eq!(h.tracer.trace_count(), 3);
        let remaining = h.tracer.get_traces("1");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message_type, MessageType::Response);
        assert_eq!(h.tracer.get_traces("2").len(), 1);
        assert_eq!(h.tracer.get_traces("3").len(), 1);
    }

    #[test]
    fn test_eviction_after_purge_stays_consistent() {
        let h = harness(ObservabilityConfig {
            max_traces: 2,
            trace_retention_ms: 10,
            ..Default::default()
        });
        h.tracer.trace_protocol_message(
            Direction::Inbound,
            MessageType::Request,
            &initialize(),
            None,
            None,
        );
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert_eq!(h.tracer.purge_expired(), 1);

        for id in 2..=4 {
            h.tracer.trace_protocol_message(
                Direction::Inbound,
                MessageType::Request,
                &json!({"jsonrpc": "2.0", "id": id, "method": "ping"}),
                None,
                None,
            );
        }
        assert_eq!(h.tracer.trace_count(), 2);
        assert!(h.tracer.get_traces("2").is_empty());
        assert_eq!(h.tracer.get_traces("3").len(), 1);
        assert_eq!(h.tracer.get_traces("4").len(), 1);
    }

    #[test]
    fn test_stderr_usage_counts_only_delivered_records() {
        let h = harness(ObservabilityConfig::default());
        h.sink.set_failing(true);
        h.tracer.trace_protocol_message(
            Direction::Inbound,
            MessageType::Request,
            &json!({"jsonrpc": "1.0", "id": 1, "method": "test"}),
            None,
            None,
        );
        assert_eq!(h.tracer.get_metrics().protocol_compliance.stderr_usage, 0);
        // the trace itself is still kept
        assert_eq!(h.tracer.trace_count(), 1);

        h.sink.set_failing(false);
        h.tracer.trace_protocol_message(
            Direction::Inbound,
            MessageType::Request,
            &json!({"jsonrpc": "1.0", "id": 2, "method": "test"}),
            None,
            None,
        );
        assert_eq!(h.tracer.get_metrics().protocol_compliance.stderr_usage, 2);
        assert_eq!(h.sink.len(), 2);
    }

    #[test]
    fn test_metrics_include_memory() {
        let h = harness(ObservabilityConfig::default());
        h.memory.set_level(50.0);
        let metrics = h.tracer.get_metrics();
        assert!((metrics.performance.memory_pressure_percent - 50.0).abs() < 0.01);
        assert!(metrics.performance.memory_usage > 0);
    }
}
