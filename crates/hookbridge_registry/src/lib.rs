//! Worker Registry and Circuit Breaker pool (§4.2, §4.3).

pub mod breaker;
pub mod worker;

pub use breaker::{BreakerConfig, BreakerPool};
pub use worker::{ProbeSupervisor, RegisterError, WorkerHandle, WorkerRegistry};
