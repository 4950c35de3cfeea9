//! Stages: groups of tasks that become eligible for submission once every
//! parent stage has settled.

use std::rc::Rc;

use crate::error::SimError;
use crate::message::TaskValue;
use crate::promise::Promise;
use crate::task::{MiniRdd, Task};

/// Whether a stage writes shuffle output for a downstream stage to read, or
/// is the terminal stage of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Produces shuffle output consumed by a dependent stage.
    ShuffleMap,
    /// Terminal stage of a job; its results are the job's output.
    Result,
}

/// A group of tasks, one per partition of `rdd`, that can run once every
/// stage in `parent_stage_ids` has completed.
///
/// Constructed once by [`crate::dag_scheduler::DAGScheduler`] and driven
/// through `submitted`/`complete`/`failed` by its `on_pre_tick` loop. Not
/// constructible outside this crate — callers only ever see a `&Stage` via
/// [`crate::dag_scheduler::DAGScheduler::stage`].
pub struct Stage {
    pub(crate) stage_id: u64,
    pub(crate) kind: StageKind,
    #[allow(dead_code)]
    pub(crate) rdd: Rc<dyn MiniRdd>,
    pub(crate) num_partitions: usize,
    pub(crate) parent_stage_ids: Vec<u64>,
    pub(crate) tasks: Option<Vec<Task>>,
    pub(crate) task_promises: Vec<Promise<TaskValue, SimError>>,
    pub(crate) submitted: bool,
    pub(crate) complete: bool,
    pub(crate) failed: Option<SimError>,
}

impl Stage {
    pub(crate) fn new(
        stage_id: u64,
        kind: StageKind,
        rdd: Rc<dyn MiniRdd>,
        num_partitions: usize,
        parent_stage_ids: Vec<u64>,
        tasks: Vec<Task>,
    ) -> Self {
        Self {
            stage_id,
            kind,
            rdd,
            num_partitions,
            parent_stage_ids,
            tasks: Some(tasks),
            task_promises: Vec::new(),
            submitted: false,
            complete: false,
            failed: None,
        }
    }

    /// Stable identifier.
    #[must_use]
    pub fn stage_id(&self) -> u64 {
        self.stage_id
    }

    /// `ShuffleMap` or `Result`.
    #[must_use]
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Number of tasks (one per partition) this stage was built with.
    #[must_use]
    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    /// Stages that must complete before this one may be submitted.
    #[must_use]
    pub fn parent_stage_ids(&self) -> &[u64] {
        &self.parent_stage_ids
    }

    /// Whether this stage's tasks have been handed to the task scheduler.
    #[must_use]
    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    /// Whether this stage has reached a terminal state (succeeded or
    /// failed). A complete stage never un-completes.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// The first task failure observed, if this stage failed. `None` while
    /// pending and `None` on success.
    #[must_use]
    pub fn failure(&self) -> Option<&SimError> {
        self.failed.as_ref()
    }
}
