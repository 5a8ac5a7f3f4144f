//! Keyspace and column family management.

use async_trait::async_trait;
use serde_json::Value;

use intravert_types::{Result, SharedState, StepReply, CURRENT_COLUMN_FAMILY, CURRENT_KEYSPACE};

use super::failure;
use crate::envelope::OperationStep;
use crate::registry::{HandlerRegistry, OperationHandler};
use crate::store::MemoryStore;

// ---------------------------------------------------------------------------
// createkeyspace
// ---------------------------------------------------------------------------

pub struct CreateKeyspaceHandler {
    store: MemoryStore,
}

impl CreateKeyspaceHandler {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OperationHandler for CreateKeyspaceHandler {
    fn operation_type(&self) -> &str {
        "createkeyspace"
    }

    async fn handle(
        &self,
        step: &OperationStep,
        _state: &mut SharedState,
        _registry: &HandlerRegistry,
    ) -> Result<StepReply> {
        let name = step.param_str("keyspace")?;
        if name.is_empty() {
            return Err(step.invalid("keyspace", "must not be empty"));
        }
        self.store.create_keyspace(name).await?;
        tracing::info!(keyspace = %name, "Created keyspace");
        Ok(StepReply::ok())
    }
}

// ---------------------------------------------------------------------------
// setkeyspace
// ---------------------------------------------------------------------------

/// Selects the keyspace later steps operate on. Only touches state.
pub struct SetKeyspaceHandler;

#[async_trait]
impl OperationHandler for SetKeyspaceHandler {
    fn operation_type(&self) -> &str {
        "setkeyspace"
    }

    async fn handle(
        &self,
        step: &OperationStep,
        state: &mut SharedState,
        _registry: &HandlerRegistry,
    ) -> Result<StepReply> {
        let name = step.param_str("keyspace")?;
        state.set(CURRENT_KEYSPACE, Value::from(name));
        Ok(StepReply::ok())
    }
}

// ---------------------------------------------------------------------------
// listkeyspaces
// ---------------------------------------------------------------------------

pub struct ListKeyspacesHandler {
    store: MemoryStore,
}

impl ListKeyspacesHandler {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OperationHandler for ListKeyspacesHandler {
    fn operation_type(&self) -> &str {
        "listkeyspaces"
    }

    async fn handle(
        &self,
        _step: &OperationStep,
        _state: &mut SharedState,
        _registry: &HandlerRegistry,
    ) -> Result<StepReply> {
        let names = self.store.non_system_keyspaces().await;
        Ok(StepReply::value(Value::from(names)))
    }
}

// ---------------------------------------------------------------------------
// createcolumnfamily
// ---------------------------------------------------------------------------

pub struct CreateColumnFamilyHandler {
    store: MemoryStore,
}

impl CreateColumnFamilyHandler {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OperationHandler for CreateColumnFamilyHandler {
    fn operation_type(&self) -> &str {
        "createcolumnfamily"
    }

    async fn handle(
        &self,
        step: &OperationStep,
        state: &mut SharedState,
        _registry: &HandlerRegistry,
    ) -> Result<StepReply> {
        let name = step.param_str("name")?;
        if name.is_empty() {
            return Err(step.invalid("name", "must not be empty"));
        }
        let keyspace = state
            .current_keyspace()
            .ok_or_else(|| failure(step, "no keyspace selected; use setkeyspace first"))?;
        self.store.create_column_family(keyspace, name).await?;
        tracing::info!(keyspace = %keyspace, column_family = %name, "Created column family");
        Ok(StepReply::ok())
    }
}

// ---------------------------------------------------------------------------
// setcolumnfamily
// ---------------------------------------------------------------------------

pub struct SetColumnFamilyHandler;

#[async_trait]
impl OperationHandler for SetColumnFamilyHandler {
    fn operation_type(&self) -> &str {
        "setcolumnfamily"
    }

    async fn handle(
        &self,
        step: &OperationStep,
        state: &mut SharedState,
        _registry: &HandlerRegistry,
    ) -> Result<StepReply> {
        let name = step.param_str("columnfamily")?;
        state.set(CURRENT_COLUMN_FAMILY, Value::from(name));
        Ok(StepReply::ok())
    }
}
