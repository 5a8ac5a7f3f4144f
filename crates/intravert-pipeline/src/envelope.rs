//! Request envelopes and their decoding into an executable step sequence.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use intravert_types::{IntravertError, Result, SharedState};

use crate::config::EngineConfig;

/// Topic prefix for operation handlers.
pub const REQUEST_TOPIC_PREFIX: &str = "request.";

/// Routing key for an operation type: `request.<lowercase type>`.
pub fn topic_for(type_name: &str) -> String {
    format!("{}{}", REQUEST_TOPIC_PREFIX, type_name.to_lowercase())
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// An inbound request as submitted by a caller: an ordered plan of steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(rename = "e", default)]
    pub steps: Vec<RawStep>,
}

/// One step as it appears on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStep {
    /// Operation type. Kept as raw JSON so that a bad type on a later step
    /// fails that step instead of the whole envelope.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<Value>,
    #[serde(default)]
    pub op: Map<String, Value>,
    /// Request deadline in milliseconds. Only read from the first step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl RawStep {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: Some(Value::String(type_name.into())),
            op: Map::new(),
            timeout: None,
        }
    }

    /// Builder-style parameter setter.
    pub fn param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.op.insert(name.into(), value);
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout = Some(ms);
        self
    }

    /// The type name, if it was given as a string.
    pub fn type_str(&self) -> Option<&str> {
        self.type_name.as_ref().and_then(Value::as_str)
    }

    /// Name used for routing. Absent or null types route as `""`; any other
    /// non-string type routes as its JSON text. Neither names a handler.
    fn routing_name(&self) -> String {
        match &self.type_name {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(name)) => name.clone(),
            Some(other) => other.to_string(),
        }
    }
}

impl RequestEnvelope {
    pub fn new(steps: Vec<RawStep>) -> Self {
        Self { steps }
    }

    /// Parse an envelope from JSON. Undecodable input is a malformed request.
    pub fn from_json(source: &str) -> Result<Self> {
        serde_json::from_str(source)
            .map_err(|e| IntravertError::MalformedRequest(format!("invalid envelope JSON: {}", e)))
    }
}

// ---------------------------------------------------------------------------
// Decoded types
// ---------------------------------------------------------------------------

/// A decoded, immutable operation step.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationStep {
    pub id: u32,
    pub type_name: String,
    pub params: Map<String, Value>,
}

impl OperationStep {
    pub fn new(id: u32, type_name: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            params,
        }
    }

    pub fn topic(&self) -> String {
        topic_for(&self.type_name)
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Required string parameter.
    pub fn param_str(&self, name: &str) -> Result<&str> {
        match self.params.get(name) {
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(self.invalid(name, "expected a string")),
            None => Err(self.invalid(name, "missing required parameter")),
        }
    }

    /// Optional string parameter; present-but-not-a-string is an error.
    pub fn opt_param_str(&self, name: &str) -> Result<Option<&str>> {
        match self.params.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(self.invalid(name, "expected a string")),
        }
    }

    pub fn param_i64(&self, name: &str) -> Result<i64> {
        self.params
            .get(name)
            .ok_or_else(|| self.invalid(name, "missing required parameter"))?
            .as_i64()
            .ok_or_else(|| self.invalid(name, "expected an integer"))
    }

    pub fn param_array(&self, name: &str) -> Result<&Vec<Value>> {
        self.params
            .get(name)
            .ok_or_else(|| self.invalid(name, "missing required parameter"))?
            .as_array()
            .ok_or_else(|| self.invalid(name, "expected an array"))
    }

    /// Required parameter of any JSON type.
    pub fn param_value(&self, name: &str) -> Result<&Value> {
        self.params
            .get(name)
            .ok_or_else(|| self.invalid(name, "missing required parameter"))
    }

    pub fn invalid(&self, parameter: &str, message: &str) -> IntravertError {
        IntravertError::InvalidParameter {
            operation: self.type_name.clone(),
            parameter: parameter.to_string(),
            message: message.to_string(),
        }
    }
}

/// The output of decoding: everything a sequencer needs to run the request.
#[derive(Debug, Clone)]
pub struct DecodedRequest {
    pub steps: Vec<OperationStep>,
    pub timeout: Duration,
    pub state: SharedState,
}

/// Decode an envelope into a pipeline request.
///
/// Step ids are assigned 0, 1, 2... in submission order. The deadline comes
/// from the first step's `timeout`, falling back to the configured default and
/// capped at `max_timeout`. Nothing is dispatched here.
pub fn decode(envelope: RequestEnvelope, config: &EngineConfig) -> Result<DecodedRequest> {
    let first = envelope
        .steps
        .first()
        .ok_or_else(|| IntravertError::MalformedRequest("request has no steps".into()))?;

    match first.type_str() {
        Some(t) if !t.trim().is_empty() => {}
        _ => {
            return Err(IntravertError::MalformedRequest(
                "first step has no type and cannot be routed".into(),
            ))
        }
    }

    let timeout = match first.timeout {
        Some(0) => {
            return Err(IntravertError::MalformedRequest(
                "timeout must be greater than zero".into(),
            ))
        }
        Some(ms) => Duration::from_millis(ms).min(config.max_timeout),
        None => config.default_timeout,
    };

    let steps = envelope
        .steps
        .into_iter()
        .enumerate()
        .map(|(idx, raw)| OperationStep {
            id: idx as u32,
            type_name: raw.routing_name(),
            params: raw.op,
        })
        .collect();

    Ok(DecodedRequest {
        steps,
        timeout,
        state: SharedState::new(),
    })
}
