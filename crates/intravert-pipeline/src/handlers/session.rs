//! Session settings that only touch request state.

use async_trait::async_trait;
use serde_json::{Map, Value};

use intravert_types::{
    Result, SharedState, StepReply, AUTO_TIMESTAMP, COMPONENTS, CONSISTENCY, META,
};

use crate::envelope::OperationStep;
use crate::registry::{HandlerRegistry, OperationHandler};

pub const ALLOWED_COMPONENTS: &[&str] = &["name", "value", "timestamp"];

pub const CONSISTENCY_LEVELS: &[&str] = &[
    "ONE",
    "TWO",
    "THREE",
    "QUORUM",
    "LOCAL_QUORUM",
    "EACH_QUORUM",
    "ALL",
    "ANY",
];

const ASSUME_TYPES: &[&str] = &["rowkey", "column", "value"];

// ---------------------------------------------------------------------------
// componentselect
// ---------------------------------------------------------------------------

pub struct ComponentSelectHandler;

#[async_trait]
impl OperationHandler for ComponentSelectHandler {
    fn operation_type(&self) -> &str {
        "componentselect"
    }

    async fn handle(
        &self,
        step: &OperationStep,
        state: &mut SharedState,
        _registry: &HandlerRegistry,
    ) -> Result<StepReply> {
        let requested = step.param_array("components")?;
        let mut selected = Vec::with_capacity(requested.len());
        for item in requested {
            match item.as_str() {
                Some(c) if ALLOWED_COMPONENTS.contains(&c) => selected.push(Value::from(c)),
                _ => {
                    return Err(step.invalid(
                        "components",
                        &format!("unsupported component {}; expected name, value or timestamp", item),
                    ))
                }
            }
        }
        state.set(COMPONENTS, Value::Array(selected));
        Ok(StepReply::ok())
    }
}

// ---------------------------------------------------------------------------
// consistency
// ---------------------------------------------------------------------------

pub struct ConsistencyHandler;

#[async_trait]
impl OperationHandler for ConsistencyHandler {
    fn operation_type(&self) -> &str {
        "consistency"
    }

    async fn handle(
        &self,
        step: &OperationStep,
        state: &mut SharedState,
        _registry: &HandlerRegistry,
    ) -> Result<StepReply> {
        let level = step.param_str("level")?.to_uppercase();
        if !CONSISTENCY_LEVELS.contains(&level.as_str()) {
            return Err(step.invalid("level", &format!("unknown consistency level '{}'", level)));
        }
        state.set(CONSISTENCY, Value::from(level));
        Ok(StepReply::ok())
    }
}

// ---------------------------------------------------------------------------
// autotimestamp
// ---------------------------------------------------------------------------

pub struct AutoTimestampHandler;

#[async_trait]
impl OperationHandler for AutoTimestampHandler {
    fn operation_type(&self) -> &str {
        "autotimestamp"
    }

    async fn handle(
        &self,
        _step: &OperationStep,
        state: &mut SharedState,
        _registry: &HandlerRegistry,
    ) -> Result<StepReply> {
        state.set(AUTO_TIMESTAMP, Value::Bool(true));
        Ok(StepReply::ok())
    }
}

// ---------------------------------------------------------------------------
// assume
// ---------------------------------------------------------------------------

/// Records a type hint for one part of a column family's data, keyed
/// `"<keyspace>.<columnfamily>"` under the state's `meta` entry.
pub struct AssumeHandler;

#[async_trait]
impl OperationHandler for AssumeHandler {
    fn operation_type(&self) -> &str {
        "assume"
    }

    async fn handle(
        &self,
        step: &OperationStep,
        state: &mut SharedState,
        _registry: &HandlerRegistry,
    ) -> Result<StepReply> {
        let keyspace = step.param_str("keyspace")?;
        let column_family = step.param_str("columnfamily")?;
        let kind = step.param_str("type")?;
        let clazz = step.param_str("clazz")?;
        if !ASSUME_TYPES.contains(&kind) {
            return Err(step.invalid("type", "expected rowkey, column or value"));
        }

        let mut meta = match state.remove(META) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        let key = format!("{}.{}", keyspace, column_family);
        let entry = meta.entry(key).or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Some(hints) = entry.as_object_mut() {
            hints.insert(kind.to_string(), Value::from(clazz));
        }
        state.set(META, Value::Object(meta));
        Ok(StepReply::ok())
    }
}
