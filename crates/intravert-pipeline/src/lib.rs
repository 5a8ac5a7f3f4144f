//! Operation pipeline engine, handler registry, and built-in handlers.
//!
//! This crate implements the Intravert request pipeline: envelope decoding,
//! named-topic dispatch, strictly sequential step execution with a shared
//! state, per-request deadlines, and reply aggregation.

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod events;
pub mod handlers;
pub mod registry;
pub mod sequencer;
pub mod store;
pub mod timeout;

pub use aggregator::{CallerHandle, PipelineResponse, Reply, ResponseAggregator};
pub use config::{EngineConfig, DEFAULT_TIMEOUT_ENV};
pub use engine::{PendingResponse, PipelineExecutor};
pub use envelope::{decode, topic_for, DecodedRequest, OperationStep, RawStep, RequestEnvelope};
pub use events::{EventEmitter, PipelineEvent};
pub use handlers::default_catalog;
pub use registry::{HandlerRegistry, OperationHandler};
pub use sequencer::{Action, Phase, Sequencer};
pub use store::{Column, MemoryStore};
pub use timeout::{Deadline, TimerHandle};
