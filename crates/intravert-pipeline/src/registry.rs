//! Operation handler trait and the named-topic handler registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use intravert_types::{IntravertError, Result, SharedState, StepReply};

use crate::envelope::{topic_for, OperationStep};

// ---------------------------------------------------------------------------
// OperationHandler trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// The operation type this handler serves (e.g. "setkeyspace", "get").
    fn operation_type(&self) -> &str;

    /// Handle one step.
    ///
    /// `state` is lent for the duration of the call only. `registry` is the
    /// same dispatch point the engine routes through, so nested
    /// sub-operations go through [`HandlerRegistry::dispatch`] rather than
    /// reaching past it.
    async fn handle(
        &self,
        step: &OperationStep,
        state: &mut SharedState,
        registry: &HandlerRegistry,
    ) -> Result<StepReply>;
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Maps `request.<type>` topics to handlers.
///
/// Populated once at startup and shared read-only (behind an `Arc`) by every
/// in-flight request afterwards.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn OperationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its own operation type.
    pub fn register(&mut self, handler: impl OperationHandler + 'static) -> Result<()> {
        let type_name = handler.operation_type().to_string();
        self.register_as(&type_name, Arc::new(handler))
    }

    /// Register a shared handler under an explicit operation type.
    pub fn register_as(
        &mut self,
        type_name: &str,
        handler: Arc<dyn OperationHandler>,
    ) -> Result<()> {
        let topic = topic_for(type_name);
        if self.handlers.contains_key(&topic) {
            return Err(IntravertError::DuplicateRegistration {
                type_name: type_name.to_string(),
            });
        }
        tracing::debug!(topic = %topic, "Registered operation handler");
        self.handlers.insert(topic, handler);
        Ok(())
    }

    /// Resolve an operation type to its handler.
    pub fn lookup(&self, type_name: &str) -> Result<Arc<dyn OperationHandler>> {
        self.handlers
            .get(&topic_for(type_name))
            .cloned()
            .ok_or_else(|| IntravertError::UnknownOperationType {
                type_name: type_name.to_string(),
            })
    }

    pub fn has(&self, type_name: &str) -> bool {
        self.handlers.contains_key(&topic_for(type_name))
    }

    /// Registered topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.handlers.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Route a nested sub-operation through the same topic table.
    pub async fn dispatch(
        &self,
        step: &OperationStep,
        state: &mut SharedState,
    ) -> Result<StepReply> {
        let handler = self.lookup(&step.type_name)?;
        tracing::trace!(step = step.id, topic = %step.topic(), "Nested dispatch");
        handler.handle(step, state, self).await
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
