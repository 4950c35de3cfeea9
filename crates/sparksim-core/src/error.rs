//! Domain error taxonomy for the simulator core.
//!
//! Every variant here corresponds to one of the error kinds the spec names:
//! `NoWorkersAvailable`, `WorkerOverloaded`, `TaskFailed`, `UnknownTaskId`,
//! `Cancelled`, `Timeout`, `StageFailed`. `InvalidConfig` covers
//! constructor-time validation that isn't part of the simulated domain
//! itself but still needs a typed failure.

use thiserror::Error;

/// Errors produced by the simulator core.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// A task was submitted with zero registered workers.
    #[error("no workers available for task {task_id} (stage {stage_id})")]
    NoWorkersAvailable {
        /// Task that could not be assigned.
        task_id: u64,
        /// Stage the task belongs to.
        stage_id: u64,
    },

    /// A worker's queue was full at delivery time.
    #[error("worker {worker_id} is overloaded; rejected task {task_id}")]
    WorkerOverloaded {
        /// Worker that rejected the task.
        worker_id: u64,
        /// Task that was rejected.
        task_id: u64,
    },

    /// A task body's promise rejected.
    #[error("task {task_id} failed: {cause}")]
    TaskFailed {
        /// Failed task.
        task_id: u64,
        /// Underlying failure description.
        cause: String,
    },

    /// A `TaskResult` arrived for a task_id the scheduler no longer knows
    /// about. Logged and swallowed, never surfaced to a caller — kept here
    /// only so internal plumbing has a typed value to log.
    #[error("unknown task id {task_id}; result ignored")]
    UnknownTaskId {
        /// The unrecognized task id.
        task_id: u64,
    },

    /// The governing promise was cancelled before resolution.
    #[error("promise {promise_id} was cancelled")]
    Cancelled {
        /// Identity of the cancelled promise, for tracing.
        promise_id: u64,
    },

    /// `SimulationRunner::run_until` exceeded its tick budget.
    #[error("run_until exceeded tick budget of {tick_budget} ticks")]
    Timeout {
        /// Ticks actually consumed before giving up.
        ticks_elapsed: u64,
        /// The configured budget.
        tick_budget: u64,
    },

    /// Aggregate failure of a stage: the first task failure by task_id
    /// order, wrapped so stage and job promises can carry a cause chain.
    #[error("stage {stage_id} failed: {cause}")]
    StageFailed {
        /// Failing stage.
        stage_id: u64,
        /// First failure observed, by task_id order.
        cause: Box<SimError>,
    },

    /// Constructor-time configuration validation failure.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Human-readable reason.
        reason: String,
    },
}

impl SimError {
    /// Short machine-stable kind label, useful for log fields and tests
    /// that want to assert on the error category without matching the
    /// full `Display` string.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NoWorkersAvailable { .. } => "no_workers_available",
            Self::WorkerOverloaded { .. } => "worker_overloaded",
            Self::TaskFailed { .. } => "task_failed",
            Self::UnknownTaskId { .. } => "unknown_task_id",
            Self::Cancelled { .. } => "cancelled",
            Self::Timeout { .. } => "timeout",
            Self::StageFailed { .. } => "stage_failed",
            Self::InvalidConfig { .. } => "invalid_config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_labels() {
        let err = SimError::WorkerOverloaded {
            worker_id: 1,
            task_id: 2,
        };
        assert_eq!(err.kind(), "worker_overloaded");
        assert!(err.to_string().contains("worker 1"));
    }

    #[test]
    fn stage_failed_wraps_cause() {
        let cause = SimError::TaskFailed {
            task_id: 5,
            cause: "boom".into(),
        };
        let err = SimError::StageFailed {
            stage_id: 9,
            cause: Box::new(cause),
        };
        assert!(err.to_string().contains("boom"));
        assert_eq!(err.kind(), "stage_failed");
    }
}
