//! Shared types, errors, state container, and step outcomes for the Intravert pipeline.
//!
//! This crate provides the foundational types used across the other Intravert crates:
//! - `IntravertError`: unified error taxonomy
//! - `SharedState`: the request-scoped state container threaded through steps
//! - `StepOutcome` / `StepReply`: what a handler produces for one step

pub mod duration_serde;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Unified error type for all Intravert subsystems.
#[derive(Debug, thiserror::Error)]
pub enum IntravertError {
    // === Decode Errors ===
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    // === Registry Errors ===
    #[error("Operation type '{type_name}' is already registered")]
    DuplicateRegistration { type_name: String },

    #[error("Unknown operation type '{type_name}'")]
    UnknownOperationType { type_name: String },

    // === Handler Errors ===
    #[error("Handler '{handler}' failed on step {step}: {message}")]
    HandlerFailure {
        handler: String,
        step: u32,
        message: String,
    },

    #[error("Invalid parameter '{parameter}' for {operation}: {message}")]
    InvalidParameter {
        operation: String,
        parameter: String,
        message: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    // === Request Lifecycle Errors ===
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Duplicate reply for step {step}")]
    DuplicateDelivery { step: u32 },

    // === Generic ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl IntravertError {
    /// Stable taxonomy name, used as the `kind` of a step-level error marker.
    pub fn kind(&self) -> &'static str {
        match self {
            IntravertError::MalformedRequest(_) => "MalformedRequest",
            IntravertError::DuplicateRegistration { .. } => "DuplicateRegistration",
            IntravertError::UnknownOperationType { .. } => "UnknownOperationType",
            IntravertError::HandlerFailure { .. }
            | IntravertError::InvalidParameter { .. }
            | IntravertError::Storage(_) => "HandlerFailure",
            IntravertError::Timeout { .. } => "Timeout",
            IntravertError::DuplicateDelivery { .. } => "DuplicateDelivery",
            IntravertError::Config(_) => "Config",
            IntravertError::Io(_) => "Io",
            IntravertError::Json(_) => "Json",
            IntravertError::Other(_) => "Other",
        }
    }

    /// Returns `true` if the error belongs in a step result rather than
    /// rejecting the whole request.
    pub fn is_step_level(&self) -> bool {
        !matches!(
            self,
            IntravertError::MalformedRequest(_)
                | IntravertError::Timeout { .. }
                | IntravertError::DuplicateDelivery { .. }
                | IntravertError::DuplicateRegistration { .. }
                | IntravertError::Config(_)
        )
    }

    /// Maps the error to an HTTP status code for a network adapter.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            IntravertError::MalformedRequest(_) | IntravertError::InvalidParameter { .. } => {
                Some(400)
            }
            IntravertError::UnknownOperationType { .. } => Some(404),
            IntravertError::Timeout { .. } => Some(504),
            IntravertError::HandlerFailure { .. } | IntravertError::Storage(_) => Some(500),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, IntravertError>`.
pub type Result<T> = std::result::Result<T, IntravertError>;

// ---------------------------------------------------------------------------
// SharedState: the request-scoped state container
// ---------------------------------------------------------------------------

pub const CURRENT_KEYSPACE: &str = "currentKeyspace";
pub const CURRENT_COLUMN_FAMILY: &str = "currentColumnFamily";
pub const COMPONENTS: &str = "components";
pub const CONSISTENCY: &str = "consistency";
pub const AUTO_TIMESTAMP: &str = "autoTimestamp";
pub const META: &str = "meta";

/// Mutable name/value context for one pipeline request.
///
/// Exactly one request owns a `SharedState`. Steps run strictly in sequence,
/// so the last writer wins and no locking is needed: a handler receives the
/// state by mutable loan and the engine takes it back with the reply.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedState {
    values: Map<String, Value>,
}

impl SharedState {
    /// Create a state seeded with the baseline component shape.
    pub fn new() -> Self {
        let mut values = Map::new();
        values.insert(
            COMPONENTS.into(),
            Value::Array(vec![Value::from("name"), Value::from("value")]),
        );
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// String value for `key`, or `None` when absent or not a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Insert or overwrite a key.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn current_keyspace(&self) -> Option<&str> {
        self.get_str(CURRENT_KEYSPACE)
    }

    pub fn current_column_family(&self) -> Option<&str> {
        self.get_str(CURRENT_COLUMN_FAMILY)
    }

    /// Column components selected for reads. Falls back to the baseline
    /// `["name", "value"]` if the entry was removed or is not an array.
    pub fn components(&self) -> Vec<String> {
        match self.values.get(COMPONENTS) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => vec!["name".to_string(), "value".to_string()],
        }
    }

    pub fn auto_timestamp(&self) -> bool {
        self.values
            .get(AUTO_TIMESTAMP)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// JSON object snapshot of the current contents.
    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl Serialize for SharedState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

// ---------------------------------------------------------------------------
// StepOutcome: per-step result stored in the reply
// ---------------------------------------------------------------------------

/// Outcome of a single step, as it appears in the reply body.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Serialized as the literal `"OK"`.
    Ok,
    Value(Value),
    Error { kind: String, message: String },
}

impl StepOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, StepOutcome::Error { .. })
    }

    pub fn to_value(&self) -> Value {
        match self {
            StepOutcome::Ok => Value::from("OK"),
            StepOutcome::Value(v) => v.clone(),
            StepOutcome::Error { kind, message } => serde_json::json!({
                "exception": message,
                "kind": kind,
            }),
        }
    }
}

impl From<&IntravertError> for StepOutcome {
    fn from(err: &IntravertError) -> Self {
        StepOutcome::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

impl Serialize for StepOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

// ---------------------------------------------------------------------------
// StepReply: what a handler hands back to the sequencer
// ---------------------------------------------------------------------------

/// A handler's reply for one step.
///
/// Handlers normally mutate the loaned state in place. When `state` is set,
/// it replaces the request's state wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReply {
    pub outcome: StepOutcome,
    pub state: Option<SharedState>,
}

impl StepReply {
    /// The plain `"OK"` acknowledgement.
    pub fn ok() -> Self {
        Self {
            outcome: StepOutcome::Ok,
            state: None,
        }
    }

    pub fn value(value: Value) -> Self {
        Self {
            outcome: StepOutcome::Value(value),
            state: None,
        }
    }

    /// Attach an explicit replacement state.
    pub fn with_state(mut self, state: SharedState) -> Self {
        self.state = Some(state);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_display_unknown_operation() {
        let err = IntravertError::UnknownOperationType {
            type_name: "frobnicate".into(),
        };
        assert_eq!(err.to_string(), "Unknown operation type 'frobnicate'");
    }

    #[test]
    fn error_display_handler_failure() {
        let err = IntravertError::HandlerFailure {
            handler: "get".into(),
            step: 2,
            message: "no keyspace selected".into(),
        };
        assert_eq!(
            err.to_string(),
            "Handler 'get' failed on step 2: no keyspace selected"
        );
    }

    #[test]
    fn error_display_timeout() {
        let err = IntravertError::Timeout { timeout_ms: 250 };
        assert_eq!(err.to_string(), "request timed out after 250ms");
    }

    #[test]
    fn kinds_collapse_handler_side_errors() {
        assert_eq!(IntravertError::Storage("x".into()).kind(), "HandlerFailure");
        let invalid = IntravertError::InvalidParameter {
            operation: "set".into(),
            parameter: "rowkey".into(),
            message: "missing".into(),
        };
        assert_eq!(invalid.kind(), "HandlerFailure");
        assert_eq!(
            IntravertError::MalformedRequest("empty".into()).kind(),
            "MalformedRequest"
        );
    }

    #[test]
    fn step_level_classification() {
        assert!(IntravertError::UnknownOperationType {
            type_name: "x".into()
        }
        .is_step_level());
        assert!(IntravertError::Storage("x".into()).is_step_level());
        assert!(!IntravertError::MalformedRequest("x".into()).is_step_level());
        assert!(!IntravertError::Timeout { timeout_ms: 1 }.is_step_level());
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(
            IntravertError::MalformedRequest("x".into()).http_status(),
            Some(400)
        );
        assert_eq!(
            IntravertError::UnknownOperationType {
                type_name: "x".into()
            }
            .http_status(),
            Some(404)
        );
        assert_eq!(
            IntravertError::Timeout { timeout_ms: 1 }.http_status(),
            Some(504)
        );
        assert_eq!(IntravertError::Other("x".into()).http_status(), None);
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<Value>("not json").unwrap_err();
        let err: IntravertError = json_err.into();
        assert!(matches!(err, IntravertError::Json(_)));
    }

    // --- SharedState ---

    #[test]
    fn new_state_has_baseline_components() {
        let state = SharedState::new();
        assert_eq!(state.components(), vec!["name", "value"]);
        assert_eq!(state.to_value(), json!({"components": ["name", "value"]}));
        assert!(state.current_keyspace().is_none());
    }

    #[test]
    fn set_and_read_current_keyspace() {
        let mut state = SharedState::new();
        state.set(CURRENT_KEYSPACE, json!("app1"));
        assert_eq!(state.current_keyspace(), Some("app1"));
        state.set(CURRENT_KEYSPACE, json!("app2"));
        assert_eq!(state.current_keyspace(), Some("app2"));
    }

    #[test]
    fn components_fall_back_when_removed() {
        let mut state = SharedState::new();
        state.remove(COMPONENTS);
        assert_eq!(state.components(), vec!["name", "value"]);
    }

    #[test]
    fn auto_timestamp_defaults_off() {
        let mut state = SharedState::new();
        assert!(!state.auto_timestamp());
        state.set(AUTO_TIMESTAMP, json!(true));
        assert!(state.auto_timestamp());
    }

    #[test]
    fn state_serializes_as_plain_object() {
        let mut state = SharedState::new();
        state.set("consistency", json!("QUORUM"));
        let v = serde_json::to_value(&state).unwrap();
        assert_eq!(v["consistency"], json!("QUORUM"));
        assert_eq!(v["components"], json!(["name", "value"]));
    }

    // --- StepOutcome ---

    #[test]
    fn ok_outcome_serializes_to_literal() {
        assert_eq!(serde_json::to_value(StepOutcome::Ok).unwrap(), json!("OK"));
    }

    #[test]
    fn error_outcome_carries_kind_and_message() {
        let err = IntravertError::UnknownOperationType {
            type_name: "nope".into(),
        };
        let outcome = StepOutcome::from(&err);
        assert!(outcome.is_error());
        assert_eq!(
            outcome.to_value(),
            json!({
                "exception": "Unknown operation type 'nope'",
                "kind": "UnknownOperationType",
            })
        );
    }

    #[test]
    fn step_reply_with_state_replaces() {
        let mut replacement = SharedState::new();
        replacement.set("x", json!(1));
        let reply = StepReply::ok().with_state(replacement.clone());
        assert_eq!(reply.outcome, StepOutcome::Ok);
        assert_eq!(reply.state, Some(replacement));
    }
}
