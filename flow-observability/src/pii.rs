//! PII detection and redaction
//!
//! Detection is pattern based: value patterns (email, phone, SSN, card numbers,
//! IP addresses, vendor key prefixes, `key=value` credentials) plus field-name
//! heuristics for structured payloads. Every detection carries a confidence;
//! only detections at or above the configured floor are redacted.
//!
//! Each [`PiiType`] maps to exactly one [`RedactionStrategy`]. Strategy lookup
//! is a pure function of the type and can be overridden per deployment.

use crate::config::SanitizationConfig;
use crate::{LoggingError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

/// Replacement used when sanitization itself fails under the fail-closed policy
pub const REDACTION_FAILED: &str = "[REDACTION_FAILED]";

/// Replacement for subtrees nested deeper than the inspection limit
pub const DEPTH_EXCEEDED: &str = "[MAX_DEPTH_EXCEEDED]";

static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
static PHONE_REGEX: OnceLock<Regex> = OnceLock::new();
static SSN_REGEX: OnceLock<Regex> = OnceLock::new();
static CARD_REGEX: OnceLock<Regex> = OnceLock::new();
static IP_REGEX: OnceLock<Regex> = OnceLock::new();
static PREFIXED_KEY_REGEX: OnceLock<Regex> = OnceLock::new();
static PASSWORD_REGEX: OnceLock<Regex> = OnceLock::new();
static TOKEN_REGEX: OnceLock<Regex> = OnceLock::new();
static API_KEY_REGEX: OnceLock<Regex> = OnceLock::new();
static CREDENTIAL_REGEX: OnceLock<Regex> = OnceLock::new();

fn init_detection_patterns() {
    EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
            .expect("Invalid email regex")
    });

    PHONE_REGEX.get_or_init(|| {
        Regex::new(r"(?:\+?1[-. ]?)?\(?\b\d{3}\)?[-. ]\d{3}[-. ]\d{4}\b")
            .expect("Invalid phone regex")
    });

    SSN_REGEX.get_or_init(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("Invalid SSN regex"));

    CARD_REGEX.get_or_init(|| {
        Regex::new(r"\b(?:\d[ -]?){12,18}\d\b").expect("Invalid card number regex")
    });

    IP_REGEX.get_or_init(|| {
        Regex::new(r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b")
            .expect("Invalid IP regex")
    });

    PREFIXED_KEY_REGEX.get_or_init(|| {
        Regex::new(
            r"\b(?:(?:sk|pk|rk)[-_][A-Za-z0-9_-]{16,}|gh[pousr]_[A-Za-z0-9]{20,}|AKIA[0-9A-Z]{16}|xox[abprs]-[A-Za-z0-9-]{10,})",
        )
        .expect("Invalid prefixed key regex")
    });

    PASSWORD_REGEX.get_or_init(|| {
        Regex::new(
            r#"(?i)(["']?)(password|passwd|pwd|pass)(["']?)[\s]*[=:][\s]*["`']?([^'"`\s,}]+)"#,
        )
        .expect("Invalid password regex")
    });

    TOKEN_REGEX.get_or_init(|| {
        Regex::new(r#"(?i)(?:(["']?)(token)(["']?)[\s]*[=:][\s]*['"]?([a-zA-Z0-9._-]+)|(bearer)[\s]+([a-zA-Z0-9._-]+))"#)
            .expect("Invalid token regex")
    });

    API_KEY_REGEX.get_or_init(|| {
        Regex::new(
            r#"(?i)(["']?)(api[_-]?key|apikey|key)(["']?)[\s]*[=:][\s]*['"]?([a-zA-Z0-9._-]+)"#,
        )
        .expect("Invalid API key regex")
    });

    CREDENTIAL_REGEX.get_or_init(|| {
        Regex::new(r#"(?i)(["']?)(credential|credentials|secret|auth)(["']?)[\s]*[=:][\s]*['"]?([^'"\s,}]+)"#)
            .expect("Invalid credential regex")
    });
}

/// Category of sensitive data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PiiType {
    Email,
    Phone,
    Ssn,
    CreditCard,
    IpAddress,
    ApiKey,
    Password,
    Token,
    Secret,
    Credential,
}

impl PiiType {
    pub const ALL: [PiiType; 10] = [
        PiiType::Email,
        PiiType::Phone,
        PiiType::Ssn,
        PiiType::CreditCard,
        PiiType::IpAddress,
        PiiType::ApiKey,
        PiiType::Password,
        PiiType::Token,
        PiiType::Secret,
        PiiType::Credential,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PiiType::Email => "email",
            PiiType::Phone => "phone",
            PiiType::Ssn => "ssn",
            PiiType::CreditCard => "credit_card",
            PiiType::IpAddress => "ip_address",
            PiiType::ApiKey => "api_key",
            PiiType::Password => "password",
            PiiType::Token => "token",
            PiiType::Secret => "secret",
            PiiType::Credential => "credential",
        }
    }
}

impl fmt::Display for PiiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PiiType {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self> {
        PiiType::ALL
            .into_iter()
            .find(|pii_type| pii_type.as_str() == s)
            .ok_or_else(|| LoggingError::Config(format!("unknown PII type '{s}'")))
    }
}

impl TryFrom<String> for PiiType {
    type Error = LoggingError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PiiType> for String {
    fn from(value: PiiType) -> Self {
        value.as_str().to_string()
    }
}

/// One sensitive substring or field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiDetection {
    pub pii_type: PiiType,
    pub value: String,
    /// Detection confidence in [0, 1]
    pub confidence: f64,
    /// Byte offset of `value` in the inspected string
    pub start_index: usize,
    /// Byte offset one past the end of `value`
    pub end_index: usize,
    /// Path of the field inside a structured payload
    pub context: Option<String>,
}

/// How a detected value is replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedactionKind {
    Mask,
    Hash,
    Remove,
    Partial,
}

/// Redaction applied to one PII type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionStrategy {
    #[serde(rename = "type")]
    pub kind: RedactionKind,
    /// Replacement text for `mask`
    #[serde(default)]
    pub pattern: Option<String>,
    /// Mask with one `*` per character instead of a marker
    #[serde(default)]
    pub preserve_length: bool,
}

impl RedactionStrategy {
    pub fn mask() -> Self {
        Self {
            kind: RedactionKind::Mask,
            pattern: None,
            preserve_length: false,
        }
    }

    pub fn mask_with(pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Self::mask()
        }
    }

    pub fn hash() -> Self {
        Self {
            kind: RedactionKind::Hash,
            ..Self::mask()
        }
    }

    pub fn remove() -> Self {
        Self {
            kind: RedactionKind::Remove,
            ..Self::mask()
        }
    }

    pub fn partial() -> Self {
        Self {
            kind: RedactionKind::Partial,
            ..Self::mask()
        }
    }

    /// Replacement text for `value`
    pub fn apply(&self, value: &str) -> String {
        match self.kind {
            RedactionKind::Mask if self.preserve_length => "*".repeat(value.chars().count()),
            RedactionKind::Mask => self
                .pattern
                .clone()
                .unwrap_or_else(|| "[REDACTED]".to_string()),
            RedactionKind::Hash => {
                let digest = Sha256::digest(value.as_bytes());
                format!("[HASH:{}]", &hex::encode(digest)[..16])
            }
            RedactionKind::Remove => String::new(),
            RedactionKind::Partial => {
                let chars: Vec<char> = value.chars().collect();
                let visible = match chars.len() {
                    n if n > 8 => 4,
                    n if n > 4 => 1,
                    _ => 0,
                };
                let hidden = chars.len() - visible;
                let mut out = "*".repeat(hidden);
                out.extend(&chars[hidden..]);
                out
            }
        }
    }
}

/// Default strategy for each type
pub fn default_strategy(pii_type: PiiType) -> RedactionStrategy {
    match pii_type {
        PiiType::Email => RedactionStrategy::mask_with("[EMAIL_REDACTED]"),
        PiiType::Ssn => RedactionStrategy::mask_with("[SSN_REDACTED]"),
        PiiType::IpAddress => RedactionStrategy::mask_with("[IP_REDACTED]"),
        PiiType::Phone | PiiType::CreditCard => RedactionStrategy::partial(),
        PiiType::ApiKey
        | PiiType::Password
        | PiiType::Token
        | PiiType::Secret
        | PiiType::Credential => RedactionStrategy::mask(),
    }
}

/// What happens when detection or redaction fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Emit the original payload with a warning
    FailOpen,
    /// Replace the payload with a failure marker
    FailClosed,
}

/// Finds sensitive data
pub trait PiiDetector: Send + Sync {
    fn detect_pii(&self, text: &str) -> Vec<PiiDetection>;

    /// Inspect a structured payload; each detection's `context` holds its path
    fn detect_pii_in_object(&self, value: &Value) -> Vec<PiiDetection>;
}

/// Replaces detected data
pub trait PiiRedactor: Send + Sync {
    fn redact(&self, text: &str, detections: &[PiiDetection]) -> String;

    fn redact_object(&self, value: &Value, detections: &[PiiDetection]) -> Value;
}

/// Regex and field-name based detector
pub struct PatternDetector {
    max_depth: usize,
}

impl PatternDetector {
    pub fn new(max_depth: usize) -> Self {
        init_detection_patterns();
        Self { max_depth }
    }

    fn scan(
        regex: &OnceLock<Regex>,
        text: &str,
        pii_type: PiiType,
        confidence: f64,
        detections: &mut Vec<PiiDetection>,
    ) {
        let Some(regex) = regex.get() else {
            return;
        };
        for found in regex.find_iter(text) {
            if is_redaction_marker(found.as_str()) {
                continue;
            }
            detections.push(PiiDetection {
                pii_type,
                value: found.as_str().to_string(),
                confidence,
                start_index: found.start(),
                end_index: found.end(),
                context: None,
            });
        }
    }

    fn scan_assignments(
        regex: &OnceLock<Regex>,
        text: &str,
        value_groups: &[usize],
        classify: fn(&str) -> PiiType,
        detections: &mut Vec<PiiDetection>,
    ) {
        let Some(regex) = regex.get() else {
            return;
        };
        for caps in regex.captures_iter(text) {
            let Some(value) = value_groups.iter().find_map(|group| caps.get(*group)) else {
                continue;
            };
            if is_redaction_marker(value.as_str()) {
                continue;
            }
            let name = caps
                .get(2)
                .or_else(|| caps.get(5))
                .map(|name| name.as_str())
                .unwrap_or_default();
            detections.push(PiiDetection {
                pii_type: classify(name),
                value: value.as_str().to_string(),
                confidence: 0.98,
                start_index: value.start(),
                end_index: value.end(),
                context: None,
            });
        }
    }

    fn walk(&self, value: &Value, path: &str, depth: usize, detections: &mut Vec<PiiDetection>) {
        if depth > self.max_depth {
            return;
        }

        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let child_path = join_path(path, key);
                    if let Some(pii_type) = sensitive_field_type(key) {
                        if child.is_null() {
                            continue;
                        }
                        let text = leaf_text(child);
                        if is_redaction_marker(&text) {
                            continue;
                        }
                        detections.push(PiiDetection {
                            pii_type,
                            end_index: text.len(),
                            value: text,
                            confidence: 1.0,
                            start_index: 0,
                            context: Some(child_path),
                        });
                    } else {
                        self.walk(child, &child_path, depth + 1, detections);
                    }
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    self.walk(child, &format!("{path}[{index}]"), depth + 1, detections);
                }
            }
            Value::String(text) => {
                for mut detection in self.detect_pii(text) {
                    detection.context = Some(path.to_string());
                    detections.push(detection);
                }
            }
            _ => {}
        }
    }
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new(SanitizationConfig::default().max_depth)
    }
}

impl PiiDetector for PatternDetector {
    fn detect_pii(&self, text: &str) -> Vec<PiiDetection> {
        let mut detections = Vec::new();

        Self::scan_assignments(&PASSWORD_REGEX, text, &[4], |_| PiiType::Password, &mut detections);
        Self::scan_assignments(&TOKEN_REGEX, text, &[4, 6], |_| PiiType::Token, &mut detections);
        Self::scan_assignments(&API_KEY_REGEX, text, &[4], |_| PiiType::ApiKey, &mut detections);
        Self::scan_assignments(
            &CREDENTIAL_REGEX,
            text,
            &[4],
            |name| {
                if name.eq_ignore_ascii_case("secret") {
                    PiiType::Secret
                } else {
                    PiiType::Credential
                }
            },
            &mut detections,
        );

        Self::scan(&PREFIXED_KEY_REGEX, text, PiiType::ApiKey, 0.95, &mut detections);
        Self::scan(&EMAIL_REGEX, text, PiiType::Email, 0.95, &mut detections);
        Self::scan(&SSN_REGEX, text, PiiType::Ssn, 0.9, &mut detections);
        Self::scan(&IP_REGEX, text, PiiType::IpAddress, 0.8, &mut detections);
        Self::scan(&PHONE_REGEX, text, PiiType::Phone, 0.75, &mut detections);

        if let Some(regex) = CARD_REGEX.get() {
            for found in regex.find_iter(text) {
                let digits: Vec<u32> = found.as_str().chars().filter_map(|c| c.to_digit(10)).collect();
                if !(13..=19).contains(&digits.len()) {
                    continue;
                }
                // numbers failing the Luhn check are reported but stay below the default floor
                let confidence = if luhn_valid(&digits) { 0.95 } else { 0.45 };
                detections.push(PiiDetection {
                    pii_type: PiiType::CreditCard,
                    value: found.as_str().to_string(),
                    confidence,
                    start_index: found.start(),
                    end_index: found.end(),
                    context: None,
                });
            }
        }

        detections.sort_by_key(|detection| detection.start_index);
        detections
    }

    fn detect_pii_in_object(&self, value: &Value) -> Vec<PiiDetection> {
        let mut detections = Vec::new();
        self.walk(value, "", 0, &mut detections);
        detections
    }
}

/// Redactor applying one strategy per type, gated by confidence
pub struct StrategyRedactor {
    strategies: HashMap<PiiType, RedactionStrategy>,
    confidence_floor: f64,
    max_depth: usize,
}

impl StrategyRedactor {
    pub fn new(config: &SanitizationConfig) -> Self {
        let strategies = PiiType::ALL
            .into_iter()
            .map(|pii_type| {
                let strategy = config
                    .strategies
                    .get(&pii_type)
                    .cloned()
                    .unwrap_or_else(|| default_strategy(pii_type));
                (pii_type, strategy)
            })
            .collect();

        Self {
            strategies,
            confidence_floor: config.confidence_floor,
            max_depth: config.max_depth,
        }
    }

    /// Strategy used for `pii_type`
    pub fn strategy_for(&self, pii_type: PiiType) -> RedactionStrategy {
        self.strategies
            .get(&pii_type)
            .cloned()
            .unwrap_or_else(|| default_strategy(pii_type))
    }

    pub fn confidence_floor(&self) -> f64 {
        self.confidence_floor
    }

    fn redact_at(&self, value: &Value, path: &str, depth: usize, detections: &[PiiDetection]) -> Value {
        if depth > self.max_depth {
            return Value::String(DEPTH_EXCEEDED.to_string());
        }

        let here: Vec<PiiDetection> = detections
            .iter()
            .filter(|detection| detection.context.as_deref() == Some(path))
            .cloned()
            .collect();

        match value {
            Value::Object(map) => {
                if let Some(replacement) = self.whole_value_replacement(value, &here) {
                    return replacement;
                }
                let redacted = map
                    .iter()
                    .map(|(key, child)| {
                        let child_path = join_path(path, key);
                        (key.clone(), self.redact_at(child, &child_path, depth + 1, detections))
                    })
                    .collect();
                Value::Object(redacted)
            }
            Value::Array(items) => {
                if let Some(replacement) = self.whole_value_replacement(value, &here) {
                    return replacement;
                }
                Value::Array(
                    items
                        .iter()
                        .enumerate()
                        .map(|(index, child)| {
                            self.redact_at(child, &format!("{path}[{index}]"), depth + 1, detections)
                        })
                        .collect(),
                )
            }
            Value::String(text) => Value::String(self.redact(text, &here)),
            other => self
                .whole_value_replacement(other, &here)
                .unwrap_or_else(|| other.clone()),
        }
    }

    fn whole_value_replacement(&self, value: &Value, here: &[PiiDetection]) -> Option<Value> {
        let text = leaf_text(value);
        here.iter()
            .find(|detection| detection.confidence >= self.confidence_floor && detection.value == text)
            .map(|detection| Value::String(self.strategy_for(detection.pii_type).apply(&text)))
    }
}

impl Default for StrategyRedactor {
    fn default() -> Self {
        Self::new(&SanitizationConfig::default())
    }
}

impl PiiRedactor for StrategyRedactor {
    fn redact(&self, text: &str, detections: &[PiiDetection]) -> String {
        let mut applicable: Vec<&PiiDetection> = detections
            .iter()
            .filter(|detection| {
                detection.confidence >= self.confidence_floor
                    && detection.start_index < detection.end_index
                    && detection.end_index <= text.len()
                    && text.is_char_boundary(detection.start_index)
                    && text.is_char_boundary(detection.end_index)
                    && text[detection.start_index..detection.end_index] == detection.value
            })
            .collect();

        // earliest first; on equal starts prefer the longer match
        applicable.sort_by(|a, b| {
            a.start_index
                .cmp(&b.start_index)
                .then(b.end_index.cmp(&a.end_index))
        });

        let mut output = String::with_capacity(text.len());
        let mut cursor = 0;
        for detection in applicable {
            if detection.start_index < cursor {
                continue;
            }
            output.push_str(&text[cursor..detection.start_index]);
            output.push_str(&self.strategy_for(detection.pii_type).apply(&detection.value));
            cursor = detection.end_index;
        }
        output.push_str(&text[cursor..]);
        output
    }

    fn redact_object(&self, value: &Value, detections: &[PiiDetection]) -> Value {
        self.redact_at(value, "", 0, detections)
    }
}

/// Result of sanitizing under a failure policy
#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized<T> {
    pub value: T,
    /// Description of the failure, when sanitization did not complete
    pub failure: Option<String>,
}

/// Detector and redactor combined behind a failure policy
#[derive(Clone)]
pub struct LogSanitizer {
    detector: Arc<dyn PiiDetector>,
    redactor: Arc<dyn PiiRedactor>,
    failure_policy: FailurePolicy,
}

impl LogSanitizer {
    /// Pattern detector and strategy redactor built from `config`
    pub fn new(config: &SanitizationConfig) -> Self {
        Self::with_components(
            Arc::new(PatternDetector::new(config.max_depth)),
            Arc::new(StrategyRedactor::new(config)),
            config.failure_policy,
        )
    }

    pub fn with_components(
        detector: Arc<dyn PiiDetector>,
        redactor: Arc<dyn PiiRedactor>,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            detector,
            redactor,
            failure_policy,
        }
    }

    pub fn detector(&self) -> &Arc<dyn PiiDetector> {
        &self.detector
    }

    pub fn redactor(&self) -> &Arc<dyn PiiRedactor> {
        &self.redactor
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Detect and redact `text`
    pub fn sanitize(&self, text: &str) -> Result<String> {
        catch_unwind(AssertUnwindSafe(|| {
            let detections = self.detector.detect_pii(text);
            self.redactor.redact(text, &detections)
        }))
        .map_err(|payload| LoggingError::Redaction(crate::panic_message(payload.as_ref())))
    }

    /// Detect and redact a structured payload
    pub fn sanitize_value(&self, value: &Value) -> Result<Value> {
        catch_unwind(AssertUnwindSafe(|| {
            let detections = self.detector.detect_pii_in_object(value);
            self.redactor.redact_object(value, &detections)
        }))
        .map_err(|payload| LoggingError::Redaction(crate::panic_message(payload.as_ref())))
    }

    /// Sanitize `text`, falling back according to the failure policy
    pub fn sanitize_text_or_fallback(&self, text: &str) -> Sanitized<String> {
        match self.sanitize(text) {
            Ok(value) => Sanitized {
                value,
                failure: None,
            },
            Err(error) => Sanitized {
                value: match self.failure_policy {
                    FailurePolicy::FailOpen => text.to_string(),
                    FailurePolicy::FailClosed => REDACTION_FAILED.to_string(),
                },
                failure: Some(error.to_string()),
            },
        }
    }

    /// Sanitize `value`, falling back according to the failure policy
    pub fn sanitize_value_or_fallback(&self, value: &Value) -> Sanitized<Value> {
        match self.sanitize_value(value) {
            Ok(value) => Sanitized {
                value,
                failure: None,
            },
            Err(error) => Sanitized {
                value: match self.failure_policy {
                    FailurePolicy::FailOpen => value.clone(),
                    FailurePolicy::FailClosed => Value::String(REDACTION_FAILED.to_string()),
                },
                failure: Some(error.to_string()),
            },
        }
    }
}

impl Default for LogSanitizer {
    fn default() -> Self {
        Self::new(&SanitizationConfig::default())
    }
}

/// Type implied by a sensitive field name, if any
pub fn sensitive_field_type(field_name: &str) -> Option<PiiType> {
    let lower_name = field_name.to_lowercase();

    if lower_name.contains("password") || lower_name.contains("passwd") {
        return Some(PiiType::Password);
    }
    if matches!(lower_name.as_str(), "pwd" | "pass") {
        return Some(PiiType::Password);
    }
    if lower_name.contains("api_key")
        || lower_name.contains("apikey")
        || lower_name.contains("api-key")
        || lower_name.contains("private_key")
        || lower_name == "key"
    {
        return Some(PiiType::ApiKey);
    }
    if lower_name.contains("token") || lower_name.contains("bearer") {
        return Some(PiiType::Token);
    }
    if lower_name.contains("secret") {
        return Some(PiiType::Secret);
    }
    if lower_name.contains("credential") || lower_name.contains("auth") {
        return Some(PiiType::Credential);
    }
    None
}

/// Whether a field name indicates sensitive data regardless of its value
pub fn is_sensitive_field(field_name: &str) -> bool {
    sensitive_field_type(field_name).is_some()
}

fn is_redaction_marker(value: &str) -> bool {
    (value.starts_with('[') && value.ends_with(']') && value.len() > 2)
        || (!value.is_empty() && value.chars().all(|c| c == '*'))
}

fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn leaf_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn luhn_valid(digits: &[u32]) -> bool {
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(index, digit)| {
            if index % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                *digit
            }
        })
        .sum();
    sum % 10 == 0
}

#[cfg(test)]
#[path = "pii_tests.rs"]
mod pii_tests;
