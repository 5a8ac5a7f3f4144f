//! Request lifecycle events for observability.
//!
//! Emits [`PipelineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! observers (loggers, test harnesses, adapters) can follow request progress
//! without coupling to the executor internals.

use serde::{Deserialize, Serialize};

/// Events emitted while requests execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineEvent {
    RequestAccepted {
        request_id: String,
        steps: usize,
        timeout_ms: u64,
    },
    StepDispatched {
        request_id: String,
        step: u32,
        topic: String,
    },
    StepCompleted {
        request_id: String,
        step: u32,
    },
    StepFailed {
        request_id: String,
        step: u32,
        error: String,
    },
    RequestCompleted {
        request_id: String,
        steps: usize,
        duration_ms: u64,
    },
    RequestFailed {
        request_id: String,
        step: u32,
    },
    RequestTimedOut {
        request_id: String,
        timeout_ms: u64,
    },
    ReplyDropped {
        request_id: String,
        step: u32,
        reason: String,
    },
}

impl PipelineEvent {
    pub fn request_id(&self) -> &str {
        match self {
            PipelineEvent::RequestAccepted { request_id, .. }
            | PipelineEvent::StepDispatched { request_id, .. }
            | PipelineEvent::StepCompleted { request_id, .. }
            | PipelineEvent::StepFailed { request_id, .. }
            | PipelineEvent::RequestCompleted { request_id, .. }
            | PipelineEvent::RequestFailed { request_id, .. }
            | PipelineEvent::RequestTimedOut { request_id, .. }
            | PipelineEvent::ReplyDropped { request_id, .. } => request_id,
        }
    }
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
