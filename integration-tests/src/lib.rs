//! Integration tests for the claude-flow observability core
//!
//! These tests assemble a full [`ObservabilityContext`] with in-memory fakes
//! and verify behaviour that spans several components: emergency shedding
//! under memory pressure, protocol tracing end to end, and the context
//! lifecycle.

#![allow(unused_imports)]

#[cfg(test)]
mod context_lifecycle;
#[cfg(test)]
mod emergency_scenarios;
#[cfg(test)]
mod protocol_tracing_integration;

/// Common test utilities for integration tests
pub mod test_utils {
    use flow_observability::{
        FixedLoadProbe, ManualMemoryMonitor, MemorySink, ObservabilityBuilder,
        ObservabilityConfig, ObservabilityContext, SystemLoad,
    };
    use std::sync::Arc;
    use std::time::Duration;

    /// Fakes shared with a context built by [`test_context`]
    pub struct Fakes {
        pub sink: Arc<MemorySink>,
        pub memory: Arc<ManualMemoryMonitor>,
        pub load: Arc<FixedLoadProbe>,
    }

    /// Builder wired to in-memory fakes at a calm 30% memory level
    pub fn test_builder(config: ObservabilityConfig) -> (ObservabilityBuilder, Fakes) {
        let sink = Arc::new(MemorySink::new());
        let memory = Arc::new(ManualMemoryMonitor::new(
            config.memory.pressure_threshold_percent,
        ));
        memory.set_level(30.0);
        let load = Arc::new(FixedLoadProbe::new(SystemLoad::default()));

        let builder = ObservabilityContext::builder()
            .config(config)
            .sink(sink.clone())
            .memory_monitor(memory.clone())
            .load_probe(load.clone());
        (builder, Fakes { sink, memory, load })
    }

    /// Context with every category enabled
    pub fn test_context() -> (ObservabilityContext, Fakes) {
        let mut config = ObservabilityConfig::default();
        config.logging.enabled_categories = vec!["*".to_string()];
        let (builder, fakes) = test_builder(config);
        let context = builder.init().expect("context should initialize");
        (context, fakes)
    }

    /// Wait for a condition with timeout
    pub async fn wait_for_condition<F>(
        mut condition: F,
        timeout_duration: Duration,
        check_interval: Duration,
    ) -> Result<(), Box<dyn std::error::Error>>
    where
        F: FnMut() -> bool,
    {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout_duration {
            if condition() {
                return Ok(());
            }
            tokio::time::sleep(check_interval).await;
        }
        Err("Condition timeout".into())
    }
}
