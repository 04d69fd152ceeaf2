use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("phase {phase_id} failed on worker {worker}: {message}")]
    PhaseFailed {
        phase_id: String,
        worker: String,
        message: String,
    },

    #[error("phase graph has a dependency cycle")]
    CyclicDependencies,

    #[error("phase {0} declares unknown dependency {1}")]
    UnknownDependency(String, String),

    #[error("no workers available for delegation")]
    NoWorkersAvailable,

    #[error("loop exceeded iteration cap of {0} without converging")]
    IterationCapExceeded(u32),

    #[error("loop exceeded its time budget of {0}ms without converging")]
    TimeBudgetExceeded(u64),

    #[error("chain step {step} ({worker}) failed: {message}")]
    ChainStepFailed {
        step: usize,
        worker: String,
        message: String,
    },

    #[error("delegated task {task} exhausted its retries: {message}")]
    DelegationFailed { task: String, message: String },
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
