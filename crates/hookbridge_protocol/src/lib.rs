//! Shared wire vocabulary for the hookbridge workspace: typed hook events,
//! worker/breaker/plan state, the error taxonomy, and fingerprint helpers.
//!
//! Every other crate in this workspace depends on this one and on nothing
//! above it; it has no knowledge of transports, storage, or orchestration
//! policy.

pub mod error;
pub mod idempotency;
pub mod types;

pub use error::{ProtocolError, Result};
pub use idempotency::{cache_fingerprint, context_digest, result_digest};
pub use types::{
    BreakerState, Connection, Context, ErrorPayload, FailoverPolicy, HookEvent, HookKind,
    HookResponse, MergeStrategy, PerformanceMeta, Phase, PhaseStatus, Plan, PlanKind, PlanStatus,
    RequestId, WorkerBudget, WorkerDef, WorkerState, WorkerStatus,
};
