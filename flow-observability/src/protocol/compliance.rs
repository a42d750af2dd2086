//! JSON-RPC 2.0 envelope checks and error categorisation

use super::{ErrorCategory, TraceError};
use serde_json::Value;
use std::ops::RangeInclusive;

/// Codes reserved for parse and request-shape failures
pub const TRANSPORT_ERROR_CODES: RangeInclusive<i64> = -32700..=-32600;

/// Codes reserved for implementation-defined server errors
pub const PROTOCOL_ERROR_CODES: RangeInclusive<i64> = -32099..=-32000;

/// Why a message failed the envelope check
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ComplianceViolation {
    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("jsonrpc version is not \"2.0\"")]
    WrongVersion,

    #[error("none of method, result or error is present")]
    MissingDiscriminator,

    #[error("more than one of method, result or error is present")]
    AmbiguousDiscriminator,

    #[error("method is not a string")]
    NonStringMethod,

    #[error("id is not a string, number or null")]
    InvalidId,
}

/// Check the envelope of `message`
///
/// Exactly one of `method`, `result` and `error` must be present. A `method`
/// without an `id` is a valid notification.
pub fn check_envelope(message: &Value) -> Result<(), ComplianceViolation> {
    let object = message
        .as_object()
        .ok_or(ComplianceViolation::NotAnObject)?;

    if object.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(ComplianceViolation::WrongVersion);
    }

    let discriminators = ["method", "result", "error"]
        .iter()
        .filter(|key| object.contains_key(**key))
        .count();
    match discriminators {
        0 => return Err(ComplianceViolation::MissingDiscriminator),
        1 => {}
        _ => return Err(ComplianceViolation::AmbiguousDiscriminator),
    }

    if let Some(method) = object.get("method") {
        if !method.is_string() {
            return Err(ComplianceViolation::NonStringMethod);
        }
    }

    match object.get("id") {
        None | Some(Value::Null | Value::String(_) | Value::Number(_)) => Ok(()),
        Some(_) => Err(ComplianceViolation::InvalidId),
    }
}

pub fn is_compliant(message: &Value) -> bool {
    check_envelope(message).is_ok()
}

/// Categorise an error by code range, then by message text
pub fn categorize_error(code: i64, message: &str) -> ErrorCategory {
    if TRANSPORT_ERROR_CODES.contains(&code) {
        ErrorCategory::Transport
    } else if PROTOCOL_ERROR_CODES.contains(&code) {
        ErrorCategory::Protocol
    } else if message.to_lowercase().contains("correlation") {
        ErrorCategory::Correlation
    } else {
        ErrorCategory::Application
    }
}

/// Extract and categorise the `error` member of a message
pub fn extract_error(message: &Value) -> Option<TraceError> {
    let error = message.get("error")?;
    let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
    let text = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Some(TraceError {
        code,
        category: categorize_error(code, &text),
        message: text,
    })
}
