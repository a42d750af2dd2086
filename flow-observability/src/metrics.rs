//! Metrics for the protocol tracer
//!
//! This module provides the aggregate structures returned by
//! [`ProtocolTracer::get_metrics`](crate::ProtocolTracer::get_metrics):
//! - Protocol compliance counters
//! - Logger and memory performance
//! - Cross-system correlation counts
//! - Tool invocation outcomes

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Counters collected while tracing
#[derive(Default)]
pub struct MetricsCollector {
    /// Compliance counters
    protocol: RwLock<ProtocolComplianceMetrics>,

    /// Correlation counters
    correlation: RwLock<CorrelationMetrics>,

    /// Tool invocation counters
    tools: RwLock<ToolMetrics>,
}

/// Protocol compliance counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolComplianceMetrics {
    /// Messages traced
    pub total_messages: u64,

    /// Messages with a valid JSON-RPC 2.0 envelope
    pub compliant_messages: u64,

    /// Messages failing the envelope check
    pub violations: u64,

    /// Trace records written to the compliant (stderr) channel
    pub stderr_usage: u64,
}

impl ProtocolComplianceMetrics {
    /// Compliant share of traced messages, 100 when nothing was traced
    pub fn compliance_rate(&self) -> f64 {
        if self.total_messages == 0 {
            100.0
        } else {
            self.compliant_messages as f64 / self.total_messages as f64 * 100.0
        }
    }
}

/// Logger and memory performance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Bytes in use at snapshot time
    pub memory_usage: u64,

    /// Memory pressure in percent
    pub memory_pressure_percent: f64,

    /// Share of wall time spent in the logger, in percent
    pub overhead_percent: f64,
}

/// Cross-system correlation counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMetrics {
    pub created: u64,
    pub active: u64,
    pub closed: u64,
    /// Successful foreign links
    pub links: u64,
    /// Link attempts against unknown correlation ids
    pub link_misses: u64,
}

/// Tool invocation outcomes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolMetrics {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,

    /// Invocations never completed within the retention period
    pub abandoned: u64,

    /// Running mean over completed invocations
    pub avg_execution_time_ms: f64,
}

/// Point-in-time view of every metric group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerMetrics {
    pub protocol_compliance: ProtocolComplianceMetrics,
    pub performance: PerformanceMetrics,
    pub correlation: CorrelationMetrics,
    pub tools: ToolMetrics,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one traced message
    pub fn record_message(&self, compliant: bool) {
        let mut metrics = self.protocol.write();
        metrics.total_messages += 1;
        if compliant {
            metrics.compliant_messages += 1;
        } else {
            metrics.violations += 1;
        }
    }

    /// Count one write to the compliant channel
    pub fn record_stderr_write(&self) {
        self.protocol.write().stderr_usage += 1;
    }

    pub fn record_correlation_created(&self) {
        let mut metrics = self.correlation.write();
        metrics.created += 1;
        metrics.active += 1;
    }

    pub fn record_correlation_link(&self, found: bool) {
        let mut metrics = self.correlation.write();
        if found {
            metrics.links += 1;
        } else {
            metrics.link_misses += 1;
        }
    }

    pub fn record_correlation_closed(&self) {
        let mut metrics = self.correlation.write();
        metrics.active = metrics.active.saturating_sub(1);
        metrics.closed += 1;
    }

    pub fn record_tool_started(&self) {
        self.tools.write().total += 1;
    }

    /// Fold one completed invocation into the running mean
    pub fn record_tool_completed(&self, success: bool, duration_ms: f64) {
        let mut metrics = self.tools.write();
        if success {
            metrics.successful += 1;
        } else {
            metrics.failed += 1;
        }
        let completed = (metrics.successful + metrics.failed) as f64;
        metrics.avg_execution_time_ms += (duration_ms - metrics.avg_execution_time_ms) / completed;
    }

    pub fn record_tool_abandoned(&self, count: u64) {
        self.tools.write().abandoned += count;
    }

    /// Snapshot combined with externally measured performance
    pub fn snapshot(&self, performance: PerformanceMetrics) -> TracerMetrics {
        TracerMetrics {
            protocol_compliance: self.protocol.read().clone(),
            performance,
            correlation: self.correlation.read().clone(),
            tools: self.tools.read().clone(),
            timestamp: current_timestamp(),
        }
    }
}

/// Get current timestamp in seconds since Unix epoch
pub(crate) fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod metrics_tests;
