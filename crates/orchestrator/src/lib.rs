//! Saga orchestration engine for the retail sale transaction.
//!
//! Coordinates verify stock → reserve stock → process payment → confirm
//! order across autonomous services that communicate only through
//! asynchronous messages. On any step failure, previously completed steps
//! are undone via compensating commands in strict reverse order.
//!
//! The pieces:
//! - [`machine`] — the pure state machine: (saga, event) → transition or
//!   discard. No I/O.
//! - [`engine`] — drives the machine: persists each transition atomically
//!   with its step log, emits commands only after the commit.
//! - [`timeout`] — one deadline per outstanding command; an elapsed
//!   deadline is handled exactly like a failure reply.
//! - [`compensation`] — reverse-order sequencing of compensating steps.
//! - [`recorder`] — audit-only step logging.
//! - [`services`] — in-memory downstream services for tests and the worker.

pub mod compensation;
pub mod engine;
pub mod error;
pub mod machine;
pub mod messages;
pub mod recorder;
pub mod retry;
pub mod services;
pub mod timeout;

pub use engine::{EngineConfig, OrchestratorEngine};
pub use error::{OrchestratorError, Result};
pub use machine::{Effect, Lifecycle, RetryLimits, SagaEvent, Transition, TransitionOutcome};
pub use messages::{
    CommandPayload, LifecycleEvent, ReplyOutcome, SagaCommand, StepReply, build_command,
    command_routing_key, reply_routing_key,
};
pub use recorder::StepLogRecorder;
pub use retry::RetryConfig;
pub use services::{InMemoryOrderService, InMemoryPaymentService, InMemoryStockService};
pub use timeout::{TimeoutNotice, TimeoutSupervisor};
