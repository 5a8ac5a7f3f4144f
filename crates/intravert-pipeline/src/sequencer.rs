//! Per-request step sequencer.
//!
//! A [`Sequencer`] is a plain state machine. It never awaits anything itself:
//! the executor feeds it reply and deadline events and carries out the
//! [`Action`] each one returns. That keeps the fail-fast and duplicate-reply
//! rules testable without a runtime.
//!
//! ```text
//! Created -> Dispatched(0) -> Dispatched(1) -> ... -> Completed
//!                  |                 |
//!                  +-----------------+--> Failed | TimedOut
//! ```

use std::time::Duration;

use intravert_types::{Result, SharedState, StepOutcome, StepReply};

use crate::aggregator::{PipelineResponse, ResponseAggregator};
use crate::envelope::{DecodedRequest, OperationStep};

/// Lifecycle phase of one pipeline request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Dispatched(u32),
    Completed,
    TimedOut,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::TimedOut | Phase::Failed)
    }
}

/// What the executor must do next.
#[derive(Debug)]
pub enum Action {
    /// Route `step` to its handler, lending it `state`.
    Dispatch {
        step: OperationStep,
        state: SharedState,
    },
    /// Hand the terminal response to the caller and release the request.
    Deliver(PipelineResponse),
    /// The event was stale or duplicated; nothing to do.
    Ignore,
}

pub struct Sequencer {
    steps: Vec<OperationStep>,
    phase: Phase,
    aggregator: ResponseAggregator,
    /// `None` while the state is on loan to a handler.
    state: Option<SharedState>,
    timeout: Duration,
}

impl Sequencer {
    pub fn new(request: DecodedRequest) -> Self {
        Self {
            steps: request.steps,
            phase: Phase::Created,
            aggregator: ResponseAggregator::new(),
            state: Some(request.state),
            timeout: request.timeout,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Whether a reply for `step_id` would be accepted right now.
    pub fn expects(&self, step_id: u32) -> bool {
        self.phase == Phase::Dispatched(step_id)
    }

    /// Leave `Created` by dispatching step 0.
    pub fn start(&mut self) -> Action {
        if self.phase != Phase::Created {
            return Action::Ignore;
        }
        self.dispatch(0)
    }

    /// Merge a handler's reply for `step_id`.
    ///
    /// `state` is the loaned state coming back with the reply; an explicit
    /// replacement inside the reply takes precedence over it.
    pub fn on_reply(
        &mut self,
        step_id: u32,
        result: Result<StepReply>,
        state: SharedState,
    ) -> Action {
        if !self.expects(step_id) {
            tracing::debug!(
                step = step_id,
                phase = ?self.phase,
                "Dropping reply that is duplicate or arrived after termination"
            );
            return Action::Ignore;
        }

        let (outcome, state) = match result {
            Ok(reply) => (reply.outcome, reply.state.unwrap_or(state)),
            Err(err) => {
                tracing::warn!(step = step_id, error = %err, "Step failed");
                (StepOutcome::from(&err), state)
            }
        };
        let failed = outcome.is_error();
        self.aggregator.record(step_id, outcome);

        if failed {
            self.phase = Phase::Failed;
            let reply = self.aggregator.assemble(&state);
            self.state = Some(state);
            return Action::Deliver(PipelineResponse::Failed {
                failed_step: step_id,
                reply,
            });
        }

        self.state = Some(state);
        let next = step_id as usize + 1;
        if next < self.steps.len() {
            return self.dispatch(next);
        }

        self.phase = Phase::Completed;
        let reply = match self.state.as_ref() {
            Some(state) => self.aggregator.assemble(state),
            None => self.aggregator.assemble(&SharedState::new()),
        };
        Action::Deliver(PipelineResponse::Completed(reply))
    }

    /// The deadline passed. Wins unless the request already terminated.
    pub fn on_deadline(&mut self) -> Action {
        if self.phase.is_terminal() {
            return Action::Ignore;
        }
        let pending_step = match self.phase {
            Phase::Dispatched(id) => Some(id),
            _ => None,
        };
        self.phase = Phase::TimedOut;
        Action::Deliver(PipelineResponse::TimedOut {
            timeout_ms: self.timeout.as_millis() as u64,
            pending_step,
        })
    }

    fn dispatch(&mut self, index: usize) -> Action {
        let Some(state) = self.state.take() else {
            return Action::Ignore;
        };
        let step = self.steps[index].clone();
        self.phase = Phase::Dispatched(step.id);
        Action::Dispatch { step, state }
    }
}
