//! Tool invocation tracing
//!
//! Parameters are sanitized the moment an invocation is traced; only the
//! sanitized copy is kept.

use super::{ProtocolTracer, TraceContext, generate_correlation_id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

const TOOLS_CATEGORY: &str = "mcp:tools";

/// Parameters as retained on the trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameters {
    pub sanitized: Value,
}

/// Execution outcome of an invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub start_time: DateTime<Utc>,
    /// `None` while the invocation is running
    pub success: Option<bool>,
    pub duration_ms: Option<f64>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// One traced tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationTrace {
    pub invocation_id: String,
    pub tool_name: String,
    pub correlation_id: Option<String>,
    pub session_id: Option<String>,
    pub parameters: ToolParameters,
    pub execution: ToolExecution,
}

impl ProtocolTracer {
    /// Start tracing a tool call, returning its invocation id
    ///
    /// `parameters` is consumed: it is sanitized and then dropped. Returns
    /// `None` when tool tracing is disabled.
    pub fn trace_tool_invocation(
        &self,
        tool_name: &str,
        parameters: Value,
        context: Option<&TraceContext>,
    ) -> Option<String> {
        if !self.state.settings.enable_tool_tracing {
            return None;
        }

        let sanitized = self.state.sanitizer.sanitize_value_or_fallback(&parameters);
        drop(parameters);
        if let Some(failure) = sanitized.failure {
            self.state.logger.warn(
                TOOLS_CATEGORY,
                "Tool parameter sanitization failed",
                Some(json!({ "tool": tool_name, "error": failure })),
                None,
            );
        }

        let invocation_id = format!("tool-{}", generate_correlation_id());
        let correlation_id = context.and_then(|context| context.correlation_id.clone());
        let trace = ToolInvocationTrace {
            invocation_id: invocation_id.clone(),
            tool_name: tool_name.to_string(),
            correlation_id: correlation_id.clone(),
            session_id: context.and_then(|context| context.session_id.clone()),
            parameters: ToolParameters {
                sanitized: sanitized.value,
            },
            execution: ToolExecution {
                start_time: Utc::now(),
                success: None,
                duration_ms: None,
                result: None,
                error: None,
            },
        };

        self.state.logger.debug(
            TOOLS_CATEGORY,
            "Tool invocation started",
            Some(json!({
                "tool": tool_name,
                "invocation_id": invocation_id,
                "parameters": trace.parameters.sanitized,
            })),
            correlation_id.as_deref(),
        );

        self.state
            .active_tools
            .lock()
            .insert(invocation_id.clone(), trace);
        self.state.metrics.record_tool_started();
        Some(invocation_id)
    }

    /// Record the outcome of a traced tool call
    ///
    /// Unknown ids produce one warning and return `false`. With tool tracing
    /// disabled this does nothing.
    pub fn complete_tool_invocation(
        &self,
        invocation_id: &str,
        result: Option<Value>,
        error: Option<String>,
    ) -> bool {
        if !self.state.settings.enable_tool_tracing {
            return false;
        }

        let removed = self.state.active_tools.lock().remove(invocation_id);
        let Some(mut trace) = removed else {
            self.state.logger.warn(
                TOOLS_CATEGORY,
                "Tool invocation trace not found",
                Some(json!({ "invocation_id": invocation_id })),
                None,
            );
            return false;
        };

        let elapsed = Utc::now() - trace.execution.start_time;
        let duration_ms = elapsed
            .num_microseconds()
            .map(|micros| micros as f64 / 1000.0)
            .unwrap_or(elapsed.num_milliseconds() as f64)
            .max(0.0);
        let success = error.is_none();

        trace.execution.success = Some(success);
        trace.execution.duration_ms = Some(duration_ms);
        trace.execution.result = result.map(|result| {
            let sanitized = self.state.sanitizer.sanitize_value_or_fallback(&result);
            if let Some(failure) = sanitized.failure {
                self.state.logger.warn(
                    TOOLS_CATEGORY,
                    "Tool result sanitization failed",
                    Some(json!({ "tool": trace.tool_name, "error": failure })),
                    trace.correlation_id.as_deref(),
                );
            }
            sanitized.value
        });
        trace.execution.error = error;
        self.state.metrics.record_tool_completed(success, duration_ms);

        let data = json!({
            "tool": trace.tool_name,
            "invocation_id": invocation_id,
            "success": success,
            "duration_ms": duration_ms,
            "error": trace.execution.error,
        });
        if success {
            self.state.logger.debug(
                TOOLS_CATEGORY,
                "Tool invocation completed",
                Some(data),
                trace.correlation_id.as_deref(),
            );
        } else {
            self.state.logger.info(
                TOOLS_CATEGORY,
                "Tool invocation failed",
                Some(data),
                trace.correlation_id.as_deref(),
            );
        }

        let max = self.state.settings.max_tool_history;
        let mut history = self.state.tool_history.lock();
        if max > 0 {
            while history.len() >= max {
                history.pop_front();
            }
            history.push_back(trace);
        }
        true
    }

    /// Running or completed invocation by id
    pub fn get_tool_invocation(&self, invocation_id: &str) -> Option<ToolInvocationTrace> {
        if let Some(trace) = self.state.active_tools.lock().get(invocation_id) {
            return Some(trace.clone());
        }
        self.state
            .tool_history
            .lock()
            .iter()
            .rev()
            .find(|trace| trace.invocation_id == invocation_id)
            .cloned()
    }

    pub fn active_tool_invocations(&self) -> usize {
        self.state.active_tools.lock().len()
    }

    /// Drop in-flight invocations started at or before `cutoff`
    pub(super) fn purge_abandoned_tool_invocations(&self, cutoff: DateTime<Utc>) -> usize {
        let abandoned = {
            let mut active = self.state.active_tools.lock();
            let before = active.len();
            active.retain(|_, trace| trace.execution.start_time > cutoff);
            before - active.len()
        };
        if abandoned > 0 {
            self.state.metrics.record_tool_abandoned(abandoned as u64);
            debug!(abandoned, "Dropped abandoned tool invocations");
        }
        abandoned
    }
}
