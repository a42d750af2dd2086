//! Emergency mode and load shedding across logger, breaker and monitor

use crate::test_utils::*;
use assert_matches::assert_matches;
use flow_observability::{BreakerState, EmergencyReason, LogLevel, ObservabilityConfig, SystemLoad};
use serde_json::json;

#[tokio::test]
async fn test_concurrent_debug_under_critical_memory() {
    let (context, fakes) = test_context();
    fakes.memory.set_level(99.0);
    let logger = context.logger().with_component("swarm");

    std::thread::scope(|scope| {
        for n in 0..10 {
            let logger = logger.clone();
            scope.spawn(move || {
                logger.debug("core:swarm", "agent heartbeat", Some(json!({ "agent": n })), None);
            });
        }
    });

    assert!(fakes.sink.records_at(LogLevel::Debug).is_empty());
    assert_eq!(context.breaker().invocation_count(), 0);

    let activations = fakes.sink.records_at(LogLevel::Error);
    assert_eq!(activations.len(), 1);
    assert_eq!(activations[0].category, "flow:emergency");
    assert!(activations[0].message.contains("memory_pressure"));
    let data = activations[0].data.as_ref().unwrap();
    assert!(data["memory_pressure_percent"].as_f64().unwrap() >= 99.0);

    let state = context.emergency().state();
    assert!(state.active);
    assert_eq!(state.reason, Some(EmergencyReason::MemoryPressure));
    assert_eq!(state.suppressed_operations, 10);

    context.shutdown().await;
}

#[tokio::test]
async fn test_essential_records_survive_emergency() {
    let (context, fakes) = test_context();
    fakes.load.set(SystemLoad {
        cpu_percent: 97.0,
        ..Default::default()
    });

    let logger = context.logger();
    logger.debug("core:agent", "dropped", None, None);
    logger.info("core:agent", "still protected", None, None);
    logger.warn("core:agent", "delivered", None, None);
    logger.error("core:agent", "delivered", None, None);

    assert!(context.emergency().is_active());
    assert_eq!(context.emergency().state().reason, Some(EmergencyReason::CpuOverload));
    assert!(fakes.sink.records_at(LogLevel::Debug).is_empty());
    assert_eq!(fakes.sink.records_at(LogLevel::Info).len(), 1);
    assert_eq!(fakes.sink.records_at(LogLevel::Warn).len(), 1);
    // activation plus the explicit error
    assert_eq!(fakes.sink.records_at(LogLevel::Error).len(), 2);

    context.shutdown().await;
}

#[tokio::test]
async fn test_failing_sink_escalates_to_emergency() {
    let mut config = ObservabilityConfig::default();
    config.logging.enabled_categories = vec!["*".to_string()];
    config.circuit_breaker.failure_threshold = 5;
    config.emergency.breaker_failure_ceiling = 3;
    let (builder, fakes) = test_builder(config);
    let context = builder.init().unwrap();

    fakes.sink.set_failing(true);
    for _ in 0..5 {
        context.logger().info("core:io", "lost", None, None);
    }
    assert_matches!(context.breaker().state(), BreakerState::Open);
    assert!(!context.emergency().is_active());

    fakes.sink.set_failing(false);
    context.logger().info("core:io", "rejected by open breaker", None, None);

    let state = context.emergency().state();
    assert!(state.active);
    assert_eq!(state.reason, Some(EmergencyReason::CircuitBreakerOpen));

    let records = fakes.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].level, LogLevel::Error);
    assert!(records[0].message.contains("circuit_breaker_open"));

    context.shutdown().await;
}

#[tokio::test]
async fn test_recovery_reports_episode_metrics() {
    let (context, fakes) = test_context();
    fakes.memory.set_level(98.0);
    context.logger().check_emergency();
    assert!(context.emergency().is_active());

    for _ in 0..3 {
        context.logger().debug("core:cache", "shed", None, None);
    }

    fakes.memory.set_level(40.0);
    let state = context.disable_emergency_mode().unwrap();
    assert!(!state.active);
    assert_eq!(state.suppressed_operations, 3);
    assert!(state.metrics.memory_reclaimed > 0);

    context.logger().debug("core:cache", "back to normal", None, None);
    assert_eq!(fakes.sink.records_at(LogLevel::Debug).len(), 1);

    context.shutdown().await;
}

#[tokio::test]
async fn test_disabled_emergency_falls_back_to_fail_fast() {
    let mut config = ObservabilityConfig::default();
    config.logging.enabled_categories = vec!["*".to_string()];
    config.emergency.enabled = false;
    let (builder, fakes) = test_builder(config);
    let context = builder.init().unwrap();

    fakes.memory.set_level(99.0);
    context.logger().debug("core:agent", "dropped", None, None);
    context.logger().info("core:agent", "kept", None, None);

    assert!(!context.emergency().is_active());
    assert!(fakes.sink.records_at(LogLevel::Debug).is_empty());
    assert_eq!(fakes.sink.records_at(LogLevel::Info).len(), 1);
    assert_eq!(context.breaker().invocation_count(), 1);

    context.shutdown().await;
}
