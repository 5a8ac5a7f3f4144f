//! Column reads and writes against the current keyspace and column family.

use async_trait::async_trait;
use serde_json::Value;

use intravert_types::{Result, SharedState, StepOutcome, StepReply};

use super::{current_target, failure};
use crate::envelope::OperationStep;
use crate::registry::{HandlerRegistry, OperationHandler};
use crate::store::{Column, MemoryStore};

/// Explicit `timestamp` parameter, else the current time in microseconds when
/// auto-timestamping is on, else zero.
fn write_timestamp(step: &OperationStep, state: &SharedState) -> Result<i64> {
    if step.param("timestamp").is_some() {
        return step.param_i64("timestamp");
    }
    if state.auto_timestamp() {
        return Ok(chrono::Utc::now().timestamp_micros());
    }
    Ok(0)
}

fn render(columns: &[Column], state: &SharedState) -> Value {
    let components = state.components();
    Value::Array(columns.iter().map(|c| c.project(&components)).collect())
}

// ---------------------------------------------------------------------------
// set
// ---------------------------------------------------------------------------

pub struct SetHandler {
    store: MemoryStore,
}

impl SetHandler {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OperationHandler for SetHandler {
    fn operation_type(&self) -> &str {
        "set"
    }

    async fn handle(
        &self,
        step: &OperationStep,
        state: &mut SharedState,
        _registry: &HandlerRegistry,
    ) -> Result<StepReply> {
        let target = current_target(step, state)?;
        let rowkey = step.param_str("rowkey")?;
        let name = step.param_str("name")?;
        let value = step.param_value("value")?.clone();
        let timestamp = write_timestamp(step, state)?;

        self.store
            .put(
                &target.keyspace,
                &target.column_family,
                rowkey,
                Column::new(name, value, timestamp),
            )
            .await?;
        tracing::trace!(row = %rowkey, column = %name, "Column written");
        Ok(StepReply::ok())
    }
}

// ---------------------------------------------------------------------------
// batchset
// ---------------------------------------------------------------------------

/// Writes several columns by routing each row through the registered `set`
/// handler.
pub struct BatchSetHandler;

#[async_trait]
impl OperationHandler for BatchSetHandler {
    fn operation_type(&self) -> &str {
        "batchset"
    }

    async fn handle(
        &self,
        step: &OperationStep,
        state: &mut SharedState,
        registry: &HandlerRegistry,
    ) -> Result<StepReply> {
        let rows = step.param_array("rows")?;
        for (idx, row) in rows.iter().enumerate() {
            let params = row
                .as_object()
                .ok_or_else(|| step.invalid("rows", &format!("entry {} is not an object", idx)))?;
            let nested = OperationStep::new(step.id, "set", params.clone());
            let reply = registry.dispatch(&nested, state).await?;
            if let StepOutcome::Error { message, .. } = reply.outcome {
                return Err(failure(step, format!("row {}: {}", idx, message)));
            }
        }
        tracing::debug!(rows = rows.len(), "Batch written");
        Ok(StepReply::ok())
    }
}

// ---------------------------------------------------------------------------
// get
// ---------------------------------------------------------------------------

/// Reads one column. Leaf operation: goes to the store directly rather than
/// through [`HandlerRegistry::dispatch`], which is only used to compose operations.
pub struct GetHandler {
    store: MemoryStore,
}

impl GetHandler {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OperationHandler for GetHandler {
    fn operation_type(&self) -> &str {
        "get"
    }

    async fn handle(
        &self,
        step: &OperationStep,
        state: &mut SharedState,
        _registry: &HandlerRegistry,
    ) -> Result<StepReply> {
        let target = current_target(step, state)?;
        let rowkey = step.param_str("rowkey")?;
        let name = step.param_str("name")?;
        let found = self
            .store
            .get(&target.keyspace, &target.column_family, rowkey, name)
            .await?;
        let columns: Vec<Column> = found.into_iter().collect();
        Ok(StepReply::value(render(&columns, state)))
    }
}

// ---------------------------------------------------------------------------
// slice
// ---------------------------------------------------------------------------

/// Reads an inclusive column range. Leaf operation: goes to the store directly
/// rather than through [`HandlerRegistry::dispatch`].
pub struct SliceHandler {
    store: MemoryStore,
}

impl SliceHandler {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OperationHandler for SliceHandler {
    fn operation_type(&self) -> &str {
        "slice"
    }

    async fn handle(
        &self,
        step: &OperationStep,
        state: &mut SharedState,
        _registry: &HandlerRegistry,
    ) -> Result<StepReply> {
        let target = current_target(step, state)?;
        let rowkey = step.param_str("rowkey")?;
        let start = step.param_str("start")?;
        let end = step.param_str("end")?;
        let columns = self
            .store
            .slice(&target.keyspace, &target.column_family, rowkey, start, end)
            .await?;
        Ok(StepReply::value(render(&columns, state)))
    }
}

// ---------------------------------------------------------------------------
// counter
// ---------------------------------------------------------------------------

pub struct CounterHandler {
    store: MemoryStore,
}

impl CounterHandler {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OperationHandler for CounterHandler {
    fn operation_type(&self) -> &str {
        "counter"
    }

    async fn handle(
        &self,
        step: &OperationStep,
        state: &mut SharedState,
        _registry: &HandlerRegistry,
    ) -> Result<StepReply> {
        let target = current_target(step, state)?;
        let rowkey = step.param_str("rowkey")?;
        let name = step.param_str("name")?;
        let delta = step.param_i64("value")?;
        let timestamp = write_timestamp(step, state)?;
        let count = self
            .store
            .increment(
                &target.keyspace,
                &target.column_family,
                rowkey,
                name,
                delta,
                timestamp,
            )
            .await?;
        tracing::trace!(row = %rowkey, column = %name, count, "Counter incremented");
        Ok(StepReply::ok())
    }
}
