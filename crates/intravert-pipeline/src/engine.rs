//! Pipeline executor: decodes envelopes and drives each request to a
//! terminal outcome.
//!
//! Every submitted request gets its own task running a [`Sequencer`]. Handlers
//! run on tasks of their own and report back through the request's inbox, so
//! the sequencer only ever suspends on that inbox. A reply and the deadline
//! race on the same channel; whichever is received first decides the outcome.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use intravert_types::{IntravertError, Result, SharedState, StepReply};

use crate::aggregator::{CallerHandle, PipelineResponse};
use crate::config::EngineConfig;
use crate::envelope::{decode, OperationStep, RequestEnvelope};
use crate::events::{EventEmitter, PipelineEvent};
use crate::handlers::default_catalog;
use crate::registry::HandlerRegistry;
use crate::sequencer::{Action, Sequencer};
use crate::store::MemoryStore;
use crate::timeout::{Deadline, TimerHandle};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// The pipeline executor. Owns the handler registry and spawns one sequencer
/// task per request.
pub struct PipelineExecutor {
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,
    events: EventEmitter,
}

/// A submitted request whose terminal response has not been awaited yet.
#[derive(Debug)]
pub struct PendingResponse {
    request_id: Uuid,
    receiver: oneshot::Receiver<PipelineResponse>,
}

impl PendingResponse {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Wait for the request's single terminal response.
    pub async fn wait(self) -> Result<PipelineResponse> {
        self.receiver.await.map_err(|_| {
            IntravertError::Other(format!(
                "request {} ended without a response",
                self.request_id
            ))
        })
    }
}

/// Messages received by a request's sequencer task.
#[derive(Debug)]
enum SequencerEvent {
    Reply {
        step_id: u32,
        result: Result<StepReply>,
        state: SharedState,
    },
    Deadline,
}

impl From<Deadline> for SequencerEvent {
    fn from(_: Deadline) -> Self {
        SequencerEvent::Deadline
    }
}

// ---------------------------------------------------------------------------
// PipelineExecutor
// ---------------------------------------------------------------------------

impl PipelineExecutor {
    /// Create an executor over an already-populated registry.
    pub fn new(registry: HandlerRegistry, config: EngineConfig) -> Self {
        let events = EventEmitter::new(config.event_capacity);
        Self {
            registry: Arc::new(registry),
            config,
            events,
        }
    }

    /// Create an executor with the built-in handler catalog over `store`.
    pub fn with_store(store: MemoryStore, config: EngineConfig) -> Result<Self> {
        let registry = default_catalog(store)?;
        Ok(Self::new(registry, config))
    }

    /// Create an executor with the built-in catalog over a fresh in-memory store.
    pub fn with_default_catalog(config: EngineConfig) -> Result<Self> {
        let store = MemoryStore::new(&config.system_keyspaces);
        Self::with_store(store, config)
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to lifecycle events for all requests.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Decode `envelope` and start executing it.
    ///
    /// Malformed envelopes are rejected here, before anything is dispatched.
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, envelope: RequestEnvelope) -> Result<PendingResponse> {
        let decoded = decode(envelope, &self.config)?;
        let request_id = Uuid::new_v4();
        let timeout = decoded.timeout;
        let steps = decoded.steps.len();

        let (reply_tx, reply_rx) = oneshot::channel();
        let caller = Arc::new(CallerHandle::new(reply_tx));
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let timer = TimerHandle::arm(timeout, caller.clone(), inbox_tx.clone());

        tracing::info!(
            request = %request_id,
            steps,
            timeout_ms = timeout.as_millis() as u64,
            "Request accepted"
        );
        self.events.emit(PipelineEvent::RequestAccepted {
            request_id: request_id.to_string(),
            steps,
            timeout_ms: timeout.as_millis() as u64,
        });

        let run = RequestRun {
            id: request_id,
            registry: self.registry.clone(),
            events: self.events.clone(),
            caller,
            timer,
            inbox: inbox_tx,
            started: Instant::now(),
        };
        tokio::spawn(run.drive(Sequencer::new(decoded), inbox_rx));

        Ok(PendingResponse {
            request_id,
            receiver: reply_rx,
        })
    }

    /// Submit and wait for the terminal response.
    pub async fn execute(&self, envelope: RequestEnvelope) -> Result<PipelineResponse> {
        self.submit(envelope)?.wait().await
    }

    /// Parse a JSON envelope, then [`execute`](Self::execute) it.
    pub async fn execute_json(&self, source: &str) -> Result<PipelineResponse> {
        let envelope = RequestEnvelope::from_json(source)?;
        self.execute(envelope).await
    }
}

// ---------------------------------------------------------------------------
// RequestRun: one request's sequencer task
// ---------------------------------------------------------------------------

struct RequestRun {
    id: Uuid,
    registry: Arc<HandlerRegistry>,
    events: EventEmitter,
    caller: Arc<CallerHandle>,
    timer: TimerHandle,
    inbox: mpsc::UnboundedSender<SequencerEvent>,
    started: Instant,
}

impl RequestRun {
    async fn drive(
        mut self,
        mut sequencer: Sequencer,
        mut inbox: mpsc::UnboundedReceiver<SequencerEvent>,
    ) {
        let mut action = sequencer.start();
        loop {
            match action {
                Action::Dispatch { step, state } => self.dispatch(step, state),
                Action::Deliver(response) => {
                    self.finish(response, sequencer.step_count());
                    return;
                }
                Action::Ignore => {}
            }

            // `self.inbox` keeps the channel open, so this only ends on delivery.
            let Some(event) = inbox.recv().await else {
                return;
            };
            action = match event {
                SequencerEvent::Reply {
                    step_id,
                    result,
                    state,
                } => {
                    if sequencer.expects(step_id) {
                        self.note_step(step_id, &result);
                    } else {
                        let dropped = IntravertError::DuplicateDelivery { step: step_id };
                        tracing::debug!(request = %self.id, error = %dropped, "Reply ignored");
                        self.events.emit(PipelineEvent::ReplyDropped {
                            request_id: self.id.to_string(),
                            step: step_id,
                            reason: dropped.to_string(),
                        });
                    }
                    sequencer.on_reply(step_id, result, state)
                }
                SequencerEvent::Deadline => sequencer.on_deadline(),
            };
        }
    }

    fn dispatch(&self, step: OperationStep, state: SharedState) {
        let topic = step.topic();
        tracing::debug!(request = %self.id, step = step.id, topic = %topic, "Dispatching step");
        self.events.emit(PipelineEvent::StepDispatched {
            request_id: self.id.to_string(),
            step: step.id,
            topic,
        });

        let handler = match self.registry.lookup(&step.type_name) {
            Ok(handler) => handler,
            Err(err) => {
                // The state never left; hand it straight back with the failure.
                let _ = self.inbox.send(SequencerEvent::Reply {
                    step_id: step.id,
                    result: Err(err),
                    state,
                });
                return;
            }
        };

        let registry = self.registry.clone();
        let inbox = self.inbox.clone();
        let events = self.events.clone();
        let request_id = self.id;
        tokio::spawn(async move {
            let mut state = state;
            let result = handler.handle(&step, &mut state, &registry).await;
            let reply = SequencerEvent::Reply {
                step_id: step.id,
                result,
                state,
            };
            if inbox.send(reply).is_err() {
                tracing::debug!(
                    request = %request_id,
                    step = step.id,
                    "Late reply dropped; request already terminated"
                );
                events.emit(PipelineEvent::ReplyDropped {
                    request_id: request_id.to_string(),
                    step: step.id,
                    reason: "request terminated".into(),
                });
            }
        });
    }

    fn note_step(&self, step_id: u32, result: &Result<StepReply>) {
        let error = match result {
            Ok(reply) if !reply.outcome.is_error() => None,
            Ok(reply) => Some(format!("{:?}", reply.outcome)),
            Err(err) => Some(err.to_string()),
        };
        let request_id = self.id.to_string();
        match error {
            None => self.events.emit(PipelineEvent::StepCompleted {
                request_id,
                step: step_id,
            }),
            Some(error) => self.events.emit(PipelineEvent::StepFailed {
                request_id,
                step: step_id,
                error,
            }),
        }
    }

    fn finish(&mut self, response: PipelineResponse, steps: usize) {
        self.timer.disarm();
        let request_id = self.id.to_string();
        match &response {
            PipelineResponse::Completed(_) => {
                let duration_ms = self.started.elapsed().as_millis() as u64;
                tracing::info!(request = %self.id, steps, duration_ms, "Request completed");
                self.events.emit(PipelineEvent::RequestCompleted {
                    request_id,
                    steps,
                    duration_ms,
                });
            }
            PipelineResponse::Failed { failed_step, .. } => {
                tracing::warn!(request = %self.id, step = failed_step, "Request aborted after failed step");
                self.events.emit(PipelineEvent::RequestFailed {
                    request_id,
                    step: *failed_step,
                });
            }
            PipelineResponse::TimedOut { timeout_ms, .. } => {
                tracing::warn!(request = %self.id, timeout_ms, "Request timed out");
                self.events.emit(PipelineEvent::RequestTimedOut {
                    request_id,
                    timeout_ms: *timeout_ms,
                });
            }
        }
        if !self.caller.deliver(response) {
            tracing::debug!(request = %self.id, "Request already terminated; response discarded");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
