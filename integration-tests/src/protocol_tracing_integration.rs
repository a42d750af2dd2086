//! Protocol, correlation and tool tracing through a full context

use crate::test_utils::*;
use flow_observability::{
    CorrelationStatus, Direction, ErrorCategory, LogLevel, MessageType, ObservabilityConfig,
    SessionInfo, TraceContext,
};
use serde_json::json;
use std::collections::HashMap;

#[tokio::test]
async fn test_request_response_round_trip() {
    let (context, fakes) = test_context();
    let tracer = context.tracer();
    let session = SessionInfo::new("flow-session-1", "stdio");

    let request_id = tracer.trace_protocol_message(
        Direction::Inbound,
        MessageType::Request,
        &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
        Some(&session),
        None,
    );
    let response_id = tracer.trace_protocol_message(
        Direction::Outbound,
        MessageType::Response,
        &json!({"jsonrpc": "2.0", "id": 1, "result": {"capabilities": {}}}),
        Some(&session),
        None,
    );
    assert_eq!(request_id, "1");
    assert_eq!(request_id, response_id);

    let traces = tracer.get_traces("1");
    assert_eq!(traces.len(), 2);
    assert!(traces.iter().all(|trace| trace.protocol.compliance));
    assert!(traces.iter().all(|trace| trace.session_id.as_deref() == Some("flow-session-1")));

    let protocol_records: Vec<_> = fakes
        .sink
        .records()
        .into_iter()
        .filter(|record| record.category == "mcp:protocol")
        .collect();
    assert_eq!(protocol_records.len(), 2);
    assert!(protocol_records.iter().all(|record| record.tags.mcp_compliant));

    let metrics = tracer.get_metrics();
    assert_eq!(metrics.protocol_compliance.total_messages, 2);
    assert_eq!(metrics.protocol_compliance.compliant_messages, 2);
    assert!((metrics.protocol_compliance.compliance_rate() - 100.0).abs() < f64::EPSILON);

    context.shutdown().await;
}

#[tokio::test]
async fn test_protocol_records_bypass_category_filter() {
    let mut config = ObservabilityConfig::default();
    config.logging.enabled_categories = vec!["core:*".to_string()];
    let (builder, fakes) = test_builder(config);
    let context = builder.init().unwrap();

    context.tracer().trace_protocol_message(
        Direction::Inbound,
        MessageType::Request,
        &json!({"jsonrpc": "1.0", "id": 2, "method": "tools/list"}),
        None,
        None,
    );

    let records = fakes.sink.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].category, "mcp:protocol");
    assert_eq!(records[1].level, LogLevel::Warn);
    assert_eq!(records[1].category, "mcp:compliance");

    context.shutdown().await;
}

#[tokio::test]
async fn test_error_responses_are_categorized() {
    let (context, _fakes) = test_context();
    let tracer = context.tracer();

    let cases = [
        (10, -32700, ErrorCategory::Transport),
        (11, -32001, ErrorCategory::Protocol),
        (12, 4001, ErrorCategory::Application),
    ];
    for (id, code, expected) in cases {
        tracer.trace_protocol_message(
            Direction::Outbound,
            MessageType::Error,
            &json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": "failed"}}),
            None,
            None,
        );
        let trace = &tracer.get_traces(&id.to_string())[0];
        assert_eq!(trace.error.as_ref().unwrap().category, expected);
    }

    context.shutdown().await;
}

#[tokio::test]
async fn test_cross_system_correlation_lifecycle() {
    let (context, fakes) = test_context();
    let tracer = context.tracer();

    let metadata = HashMap::from([("task".to_string(), json!("refactor"))]);
    let id = tracer
        .create_cross_system_correlation("flow-session-1", None, Some(metadata))
        .unwrap();
    assert!(tracer.link_to_claude_code(&id, "code-session-1", "code-corr-1"));
    assert!(tracer.link_to_claude_code(&id, "code-session-1", "code-corr-2"));

    let context_for_trace = TraceContext {
        correlation_id: Some(id.clone()),
        session_id: Some("flow-session-1".to_string()),
        claude_code_session_id: Some("code-session-1".to_string()),
    };
    tracer.trace_protocol_message(
        Direction::Inbound,
        MessageType::Notification,
        &json!({"jsonrpc": "2.0", "method": "notifications/progress"}),
        None,
        Some(&context_for_trace),
    );

    let record = tracer.get_cross_system_correlation(&id).unwrap();
    assert_eq!(record.correlation_chain, vec![id.clone(), "code-corr-1".into(), "code-corr-2".into()]);
    assert_eq!(record.claude_code_session_id.as_deref(), Some("code-session-1"));

    assert!(tracer.close_cross_system_correlation(&id));
    assert_eq!(
        tracer.get_cross_system_correlation(&id).unwrap().status,
        CorrelationStatus::Closed
    );

    assert!(!tracer.link_to_claude_code("unknown", "code-session-1", "code-corr-3"));
    assert!(
        fakes
            .sink
            .records_at(LogLevel::Warn)
            .iter()
            .any(|record| record.message.contains("not found"))
    );

    let metrics = tracer.get_metrics().correlation;
    assert_eq!(metrics.created, 1);
    assert_eq!(metrics.links, 2);
    assert_eq!(metrics.link_misses, 1);
    assert_eq!(metrics.closed, 1);

    context.shutdown().await;
}

#[tokio::test]
async fn test_tool_invocation_never_leaks_secrets() {
    let (context, fakes) = test_context();
    let tracer = context.tracer();
    let trace_context = TraceContext {
        correlation_id: Some("corr-tools".to_string()),
        session_id: Some("flow-session-1".to_string()),
        ..Default::default()
    };

    let id = tracer
        .trace_tool_invocation(
            "github_clone",
            json!({
                "repository": "org/repo",
                "password": "secret123",
                "auth": {"api_key": "sk-live-0123456789abcdef"},
                "notify": "dev@example.com"
            }),
            Some(&trace_context),
        )
        .unwrap();
    assert_eq!(tracer.active_tool_invocations(), 1);

    assert!(tracer.complete_tool_invocation(&id, Some(json!({"cloned": true})), None));
    assert!(!tracer.complete_tool_invocation(&id, None, None));

    let trace = tracer.get_tool_invocation(&id).unwrap();
    assert_eq!(trace.parameters.sanitized["repository"], "org/repo");
    assert_eq!(trace.execution.success, Some(true));
    assert_eq!(trace.session_id.as_deref(), Some("flow-session-1"));

    let stored = serde_json::to_string(&trace).unwrap();
    let emitted = serde_json::to_string(&fakes.sink.records()).unwrap();
    for secret in ["secret123", "sk-live-0123456789abcdef", "dev@example.com"] {
        assert!(!stored.contains(secret), "stored trace leaked {secret}");
        assert!(!emitted.contains(secret), "log output leaked {secret}");
    }

    context.shutdown().await;
}
