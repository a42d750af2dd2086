//! Context initialization, background sweep and shutdown

use crate::test_utils::*;
use flow_observability::{
    Direction, LogLevel, LoggingError, MessageType, ObservabilityConfig, ObservabilityContext,
};
use serde_json::json;
use std::io::Write;
use std::time::Duration;

#[tokio::test]
async fn test_context_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "sweep_interval_ms = 25").unwrap();
    writeln!(file, "trace_retention_ms = 10").unwrap();
    writeln!(file, "[logging]").unwrap();
    writeln!(file, "enabled_categories = [\"core:*\"]").unwrap();

    let config = ObservabilityConfig::from_file(file.path()).unwrap();
    let (builder, fakes) = test_builder(config);
    let context = builder.init().unwrap();
    assert_eq!(context.logger().enabled_categories(), vec!["core:*".to_string()]);

    context.logger().debug("core:init", "visible", None, None);
    context.logger().debug("swarm:init", "filtered", None, None);
    assert_eq!(fakes.sink.records_at(LogLevel::Debug).len(), 1);

    context.tracer().trace_protocol_message(
        Direction::Inbound,
        MessageType::Request,
        &json!({"jsonrpc": "2.0", "id": "sweep-me", "method": "ping"}),
        None,
        None,
    );
    let tracer = context.tracer().clone();
    wait_for_condition(
        || tracer.trace_count() == 0,
        Duration::from_secs(2),
        Duration::from_millis(10),
    )
    .await
    .expect("background sweep should purge expired traces");

    context.shutdown().await;
    assert!(!context.is_running());
}

#[test]
fn test_init_outside_runtime_fails() {
    let (builder, _fakes) = test_builder(ObservabilityConfig::default());
    assert!(matches!(builder.init(), Err(LoggingError::Runtime(_))));
}

#[tokio::test]
async fn test_shutdown_runs_final_sweep() {
    let config = ObservabilityConfig {
        trace_retention_ms: 1,
        ..Default::default()
    };
    let (builder, _fakes) = test_builder(config);
    let context = builder.init().unwrap();
    let tracer = context.tracer().clone();

    tracer.trace_protocol_message(
        Direction::Inbound,
        MessageType::Request,
        &json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
        None,
        None,
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(tracer.trace_count(), 1);

    context.shutdown().await;
    assert_eq!(tracer.trace_count(), 0);

    context.shutdown().await;
}

#[tokio::test]
async fn test_handles_outlive_shutdown() {
    let (context, fakes) = test_context();
    let logger = context.logger().with_session_id("late-session");
    context.shutdown().await;

    logger.info("core:late", "after shutdown", None, None);
    let records = fakes.sink.records_at(LogLevel::Info);
    assert_eq!(records.last().unwrap().session_id.as_deref(), Some("late-session"));
}

#[tokio::test]
async fn test_context_drop_stops_sweep() {
    let (context, _fakes) = test_context();
    let tracer = context.tracer().clone();
    drop(context);

    tokio::time::sleep(Duration::from_millis(20)).await;
    tracer.trace_protocol_message(
        Direction::Inbound,
        MessageType::Request,
        &json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
        None,
        None,
    );
    assert_eq!(tracer.trace_count(), 1);
}

#[tokio::test]
async fn test_production_init_with_default_config() {
    let context = ObservabilityContext::init(ObservabilityConfig::default()).unwrap();
    assert!(context.is_running());
    context.shutdown().await;
    assert!(!context.is_running());
}
