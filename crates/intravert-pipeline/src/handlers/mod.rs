//! Built-in operation handlers, all backed by a shared [`MemoryStore`].

pub mod columns;
pub mod keyspace;
pub mod session;

pub use columns::{BatchSetHandler, CounterHandler, GetHandler, SetHandler, SliceHandler};
pub use keyspace::{
    CreateColumnFamilyHandler, CreateKeyspaceHandler, ListKeyspacesHandler,
    SetColumnFamilyHandler, SetKeyspaceHandler,
};
pub use session::{AssumeHandler, AutoTimestampHandler, ComponentSelectHandler, ConsistencyHandler};

use intravert_types::{IntravertError, Result, SharedState};

use crate::envelope::OperationStep;
use crate::registry::HandlerRegistry;
use crate::store::MemoryStore;

/// Build a registry holding the full built-in catalog over `store`.
pub fn default_catalog(store: MemoryStore) -> Result<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();

    registry.register(CreateKeyspaceHandler::new(store.clone()))?;
    registry.register(SetKeyspaceHandler)?;
    registry.register(ListKeyspacesHandler::new(store.clone()))?;
    registry.register(CreateColumnFamilyHandler::new(store.clone()))?;
    registry.register(SetColumnFamilyHandler)?;

    registry.register(SetHandler::new(store.clone()))?;
    registry.register(BatchSetHandler)?;
    registry.register(GetHandler::new(store.clone()))?;
    registry.register(SliceHandler::new(store.clone()))?;
    registry.register(CounterHandler::new(store))?;

    registry.register(ComponentSelectHandler)?;
    registry.register(ConsistencyHandler)?;
    registry.register(AutoTimestampHandler)?;
    registry.register(AssumeHandler)?;

    tracing::debug!(handlers = registry.len(), "Built default handler catalog");
    Ok(registry)
}

/// The keyspace and column family a data operation targets.
pub(crate) struct Target {
    pub keyspace: String,
    pub column_family: String,
}

/// Resolve the current keyspace/column family from state, failing the step
/// if either was never selected.
pub(crate) fn current_target(step: &OperationStep, state: &SharedState) -> Result<Target> {
    let keyspace = state
        .current_keyspace()
        .ok_or_else(|| failure(step, "no keyspace selected; use setkeyspace first"))?;
    let column_family = state
        .current_column_family()
        .ok_or_else(|| failure(step, "no column family selected; use setcolumnfamily first"))?;
    Ok(Target {
        keyspace: keyspace.to_string(),
        column_family: column_family.to_string(),
    })
}

pub(crate) fn failure(step: &OperationStep, message: impl Into<String>) -> IntravertError {
    IntravertError::HandlerFailure {
        handler: step.type_name.clone(),
        step: step.id,
        message: message.into(),
    }
}
