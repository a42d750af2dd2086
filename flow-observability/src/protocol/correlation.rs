//! Cross-system correlation
//!
//! Links a local session to a cooperating foreign system. The correlation
//! chain is append-only and always starts with the record's own id.

use super::{ProtocolTracer, generate_correlation_id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::debug;

const CORRELATION_CATEGORY: &str = "mcp:correlation";

/// Lifecycle of a correlation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationStatus {
    Active,
    Closed,
}

/// Correlation between a local session and a foreign one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossSystemCorrelation {
    pub correlation_id: String,
    pub claude_flow_session_id: String,
    pub claude_code_session_id: Option<String>,
    /// Own id first, then each linked foreign correlation id in link order
    pub correlation_chain: Vec<String>,
    pub metadata: HashMap<String, Value>,
    pub status: CorrelationStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl ProtocolTracer {
    /// Allocate an active correlation record for `local_session_id`
    ///
    /// Returns `None` when cross-system correlation is disabled.
    pub fn create_cross_system_correlation(
        &self,
        local_session_id: &str,
        foreign_session_id: Option<&str>,
        metadata: Option<HashMap<String, Value>>,
    ) -> Option<String> {
        if !self.state.settings.enable_cross_system_correlation {
            return None;
        }

        let correlation_id = generate_correlation_id();
        let record = CrossSystemCorrelation {
            correlation_id: correlation_id.clone(),
            claude_flow_session_id: local_session_id.to_string(),
            claude_code_session_id: foreign_session_id.map(str::to_string),
            correlation_chain: vec![correlation_id.clone()],
            metadata: metadata.unwrap_or_default(),
            status: CorrelationStatus::Active,
            created_at: Utc::now(),
            closed_at: None,
        };

        self.state
            .correlations
            .write()
            .insert(correlation_id.clone(), record);
        self.state.metrics.record_correlation_created();

        self.state.logger.info(
            CORRELATION_CATEGORY,
            "Cross-system correlation created",
            Some(json!({
                "claude_flow_session_id": local_session_id,
                "claude_code_session_id": foreign_session_id,
            })),
            Some(&correlation_id),
        );
        Some(correlation_id)
    }

    /// Attach a foreign session and append its correlation id to the chain
    ///
    /// Unknown or closed ids are reported as a warning and return `false`.
    pub fn link_to_claude_code(
        &self,
        correlation_id: &str,
        foreign_session_id: &str,
        foreign_correlation_id: &str,
    ) -> bool {
        if !self.state.settings.enable_cross_system_correlation {
            return false;
        }

        let outcome = {
            let mut correlations = self.state.correlations.write();
            match correlations.get_mut(correlation_id) {
                Some(record) if record.status == CorrelationStatus::Active => {
                    record.claude_code_session_id = Some(foreign_session_id.to_string());
                    record
                        .correlation_chain
                        .push(foreign_correlation_id.to_string());
                    Ok(record.correlation_chain.len())
                }
                Some(_) => Err("Cross-system correlation already closed"),
                None => Err("Cross-system correlation not found"),
            }
        };

        match outcome {
            Ok(chain_length) => {
                self.state.metrics.record_correlation_link(true);
                self.state.logger.debug(
                    CORRELATION_CATEGORY,
                    "Linked foreign correlation",
                    Some(json!({
                        "claude_code_session_id": foreign_session_id,
                        "foreign_correlation_id": foreign_correlation_id,
                        "chain_length": chain_length,
                    })),
                    Some(correlation_id),
                );
                true
            }
            Err(reason) => {
                self.state.metrics.record_correlation_link(false);
                self.state.logger.warn(
                    CORRELATION_CATEGORY,
                    reason,
                    Some(json!({ "correlation_id": correlation_id })),
                    Some(correlation_id),
                );
                false
            }
        }
    }

    pub fn get_cross_system_correlation(
        &self,
        correlation_id: &str,
    ) -> Option<CrossSystemCorrelation> {
        self.state.correlations.read().get(correlation_id).cloned()
    }

    /// Mark a correlation closed; it is purged once the retention period passes
    pub fn close_cross_system_correlation(&self, correlation_id: &str) -> bool {
        let closed = {
            let mut correlations = self.state.correlations.write();
            match correlations.get_mut(correlation_id) {
                Some(record) if record.status == CorrelationStatus::Active => {
                    record.status = CorrelationStatus::Closed;
                    record.closed_at = Some(Utc::now());
                    true
                }
                _ => false,
            }
        };

        if closed {
            self.state.metrics.record_correlation_closed();
            debug!(correlation_id, "Closed cross-system correlation");
        }
        closed
    }

    pub(super) fn purge_closed_correlations(&self, cutoff: DateTime<Utc>) -> usize {
        let mut correlations = self.state.correlations.write();
        let before = correlations.len();
        correlations.retain(|_, record| {
            record
                .closed_at
                .is_none_or(|closed_at| closed_at > cutoff)
        });
        before - correlations.len()
    }
}
