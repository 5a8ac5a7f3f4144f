//! Response assembly and exactly-once delivery back to the caller.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tokio::sync::oneshot;

use intravert_types::{IntravertError, SharedState, StepOutcome};

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// Final reply body: per-step outcomes keyed by step id plus the state snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub results: BTreeMap<u32, StepOutcome>,
    pub state: SharedState,
}

impl Reply {
    pub fn get(&self, step_id: u32) -> Option<&StepOutcome> {
        self.results.get(&step_id)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for Reply {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.results.len() + 1))?;
        for (id, outcome) in &self.results {
            map.serialize_entry(&id.to_string(), outcome)?;
        }
        map.serialize_entry("state", &self.state)?;
        map.end()
    }
}

/// Terminal outcome of one pipeline request.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineResponse {
    /// Every step replied successfully.
    Completed(Reply),
    /// A step failed and the remaining steps were abandoned.
    Failed { failed_step: u32, reply: Reply },
    /// The deadline passed before the last step replied.
    TimedOut {
        timeout_ms: u64,
        pending_step: Option<u32>,
    },
}

impl PipelineResponse {
    pub fn is_completed(&self) -> bool {
        matches!(self, PipelineResponse::Completed(_))
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, PipelineResponse::TimedOut { .. })
    }

    /// The reply body, if the request produced one.
    pub fn reply(&self) -> Option<&Reply> {
        match self {
            PipelineResponse::Completed(reply) | PipelineResponse::Failed { reply, .. } => {
                Some(reply)
            }
            PipelineResponse::TimedOut { .. } => None,
        }
    }

    /// Wire shape of the response.
    pub fn to_json(&self) -> Value {
        match self {
            PipelineResponse::Completed(reply) => reply.to_json(),
            PipelineResponse::Failed { failed_step, reply } => {
                let mut body = reply.to_json();
                if let Value::Object(ref mut map) = body {
                    map.insert("exceptionId".into(), Value::from(*failed_step));
                }
                body
            }
            PipelineResponse::TimedOut {
                timeout_ms,
                pending_step,
            } => serde_json::json!({
                "exception": IntravertError::Timeout { timeout_ms: *timeout_ms }.to_string(),
                "exceptionId": pending_step,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// ResponseAggregator
// ---------------------------------------------------------------------------

/// Accumulates step outcomes in step-id order.
#[derive(Debug, Default)]
pub struct ResponseAggregator {
    results: BTreeMap<u32, StepOutcome>,
}

impl ResponseAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step outcome. Returns `false` (and keeps the first outcome)
    /// if the step already has one.
    pub fn record(&mut self, step_id: u32, outcome: StepOutcome) -> bool {
        if self.results.contains_key(&step_id) {
            return false;
        }
        self.results.insert(step_id, outcome);
        true
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Build the reply from the outcomes gathered so far and the final state.
    pub fn assemble(&self, state: &SharedState) -> Reply {
        Reply {
            results: self.results.clone(),
            state: state.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// CallerHandle
// ---------------------------------------------------------------------------

/// The originating caller's reply slot.
///
/// `terminated` is the single source of truth for whether the request has
/// reached a terminal outcome. Both the completion path and the timer check
/// it; only the first [`deliver`](CallerHandle::deliver) reaches the caller.
#[derive(Debug)]
pub struct CallerHandle {
    terminated: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<PipelineResponse>>>,
}

impl CallerHandle {
    pub fn new(sender: oneshot::Sender<PipelineResponse>) -> Self {
        Self {
            terminated: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Deliver the terminal response. Returns `false` if another path already
    /// terminated the request, in which case `response` is discarded.
    pub fn deliver(&self, response: PipelineResponse) -> bool {
        if self
            .terminated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match sender {
            Some(tx) => {
                if tx.send(response).is_err() {
                    tracing::debug!("Caller went away before the response was delivered");
                }
                true
            }
            None => false,
        }
    }
}
