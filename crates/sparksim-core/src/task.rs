//! Task bodies and the minimal RDD-shaped interface the scheduler depends on.
//!
//! `MiniRdd` is deliberately not a transformation algebra — no `map`,
//! `filter`, or `shuffle` combinators ship here. It exists only so the DAG
//! scheduler has something uniform to build stages from: a source of
//! partitions, a per-partition compute closure, and a list of parent RDDs to
//! derive stage dependencies from.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::message::TaskValue;

/// One partition of an RDD's data, identified by index.
///
/// `compute` on the owning [`MiniRdd`] is what turns this into a
/// [`TaskValue`]; the partition itself carries no payload beyond its index
/// because real partition data lives in whatever closure environment the
/// demo RDD was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    index: usize,
}

impl Partition {
    /// Construct a partition handle for the given index.
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self { index }
    }

    /// Zero-based partition index.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

/// How one RDD depends on another, for stage-boundary construction.
///
/// `Narrow` dependencies (each child partition reads exactly one parent
/// partition) never force a stage boundary; `Shuffle` dependencies always
/// do, per the component design's stage-construction algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    /// One-to-one or otherwise local read; no shuffle boundary required.
    Narrow,
    /// Requires a shuffle; introduces a stage boundary between parent and
    /// child.
    Shuffle,
}

/// A reference to a parent RDD plus how the child depends on it.
pub struct RddDependency {
    /// The parent RDD.
    pub rdd: Rc<dyn MiniRdd>,
    /// Narrow or shuffle.
    pub kind: DependencyKind,
}

impl fmt::Debug for RddDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RddDependency")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// The minimal outbound interface the DAG scheduler needs from a
/// distributed-collection abstraction.
///
/// This is intentionally not a transformation algebra: there is no `map`,
/// `filter`, or `reduce_by_key` here. A real RDD hierarchy would build those
/// on top of `MiniRdd`; this crate ships only the seam the scheduler
/// compiles against, plus [`VecRdd`] as a concrete fixture for tests and the
/// demo binary.
pub trait MiniRdd {
    /// Number of partitions this RDD is split into.
    fn num_partitions(&self) -> usize;

    /// Compute the value for one partition. Called once per task by the
    /// worker executing that task; must be deterministic given the same
    /// partition index and parent values.
    fn compute(&self, partition: Partition) -> TaskValue;

    /// Parent RDDs this one depends on, in order. Empty for a source RDD.
    fn dependencies(&self) -> Vec<RddDependency>;

    /// Advisory placement hint for a partition (worker endpoints that would
    /// have the data local). Unused by the round-robin scheduler shipped in
    /// this crate, but part of the interface collaborators compile against.
    fn preferred_locations(&self, _partition: Partition) -> Vec<String> {
        Vec::new()
    }
}

/// A source RDD backed by an in-memory vector, one element per partition.
///
/// Used as the fixture RDD for tests and the demo binary. Has no
/// dependencies — it is always the root of a stage graph.
pub struct VecRdd {
    values: Vec<TaskValue>,
}

impl VecRdd {
    /// Build a source RDD with one partition per element of `values`.
    #[must_use]
    pub fn new(values: Vec<TaskValue>) -> Self {
        Self { values }
    }
}

impl MiniRdd for VecRdd {
    fn num_partitions(&self) -> usize {
        self.values.len()
    }

    fn compute(&self, partition: Partition) -> TaskValue {
        self.values[partition.index()].clone()
    }

    fn dependencies(&self) -> Vec<RddDependency> {
        Vec::new()
    }
}

/// A derived RDD computed from a single parent via a pure transformation
/// closure, without introducing a shuffle boundary.
///
/// Grounds the `Narrow` half of [`DependencyKind`] in a concrete fixture,
/// the way [`VecRdd`] grounds source RDDs.
pub struct MappedRdd {
    parent: Rc<dyn MiniRdd>,
    transform: Box<dyn Fn(TaskValue) -> TaskValue>,
}

impl MappedRdd {
    /// Build an RDD that applies `transform` to each of `parent`'s
    /// partitions, one-to-one.
    #[must_use]
    pub fn new(parent: Rc<dyn MiniRdd>, transform: impl Fn(TaskValue) -> TaskValue + 'static) -> Self {
        Self {
            parent,
            transform: Box::new(transform),
        }
    }
}

impl MiniRdd for MappedRdd {
    fn num_partitions(&self) -> usize {
        self.parent.num_partitions()
    }

    fn compute(&self, partition: Partition) -> TaskValue {
        (self.transform)(self.parent.compute(partition))
    }

    fn dependencies(&self) -> Vec<RddDependency> {
        vec![RddDependency {
            rdd: Rc::clone(&self.parent),
            kind: DependencyKind::Narrow,
        }]
    }
}

/// A derived RDD that depends on its parent through a shuffle boundary.
///
/// `compute` re-reads every parent partition to simulate a shuffle read;
/// this is a fixture for exercising multi-stage DAGs, not a real
/// partitioner.
pub struct ShuffledRdd {
    parent: Rc<dyn MiniRdd>,
    num_partitions: usize,
    combine: Box<dyn Fn(Vec<TaskValue>) -> TaskValue>,
}

impl ShuffledRdd {
    /// Build an RDD with `num_partitions` partitions, each computed by
    /// `combine` over every value produced by `parent`.
    #[must_use]
    pub fn new(
        parent: Rc<dyn MiniRdd>,
        num_partitions: usize,
        combine: impl Fn(Vec<TaskValue>) -> TaskValue + 'static,
    ) -> Self {
        Self {
            parent,
            num_partitions,
            combine: Box::new(combine),
        }
    }
}

impl MiniRdd for ShuffledRdd {
    fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    fn compute(&self, _partition: Partition) -> TaskValue {
        let inputs = (0..self.parent.num_partitions())
            .map(|index| self.parent.compute(Partition::new(index)))
            .collect();
        (self.combine)(inputs)
    }

    fn dependencies(&self) -> Vec<RddDependency> {
        vec![RddDependency {
            rdd: Rc::clone(&self.parent),
            kind: DependencyKind::Shuffle,
        }]
    }
}

/// A scheduled unit of work: a partition to compute, on behalf of a stage.
///
/// Holds the RDD directly rather than a serialized closure — in a
/// single-process simulation there is no wire boundary between scheduler
/// and worker to cross, so the [`crate::message::Message::SubmitTask`]
/// envelope carries only bookkeeping fields and the worker looks the real
/// `Task` up in the [`SharedTaskRegistry`] by `task_id`.
pub struct Task {
    /// Unique task identifier.
    pub task_id: u64,
    /// Owning stage.
    pub stage_id: u64,
    /// Partition this task computes.
    pub partition_id: usize,
    /// The RDD whose partition is being computed.
    pub rdd: Rc<dyn MiniRdd>,
}

impl Task {
    /// Run this task's computation.
    #[must_use]
    pub fn execute(&self) -> TaskValue {
        self.rdd.compute(Partition::new(self.partition_id))
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("task_id", &self.task_id)
            .field("stage_id", &self.stage_id)
            .field("partition_id", &self.partition_id)
            .finish_non_exhaustive()
    }
}

/// Registry shared between a scheduler and the workers it dispatches to,
/// keyed by `task_id`. Populated by the scheduler before a `SubmitTask`
/// message is sent; entries are removed once a worker reports a result.
pub type SharedTaskRegistry = Rc<RefCell<HashMap<u64, Task>>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_rdd_computes_each_partition_independently() {
        let rdd = VecRdd::new(vec![TaskValue::from(1), TaskValue::from(2), TaskValue::from(3)]);
        assert_eq!(rdd.num_partitions(), 3);
        assert_eq!(rdd.compute(Partition::new(1)), TaskValue::from(2));
        assert!(rdd.dependencies().is_empty());
    }

    #[test]
    fn mapped_rdd_is_narrow_and_applies_transform() {
        let parent: Rc<dyn MiniRdd> = Rc::new(VecRdd::new(vec![TaskValue::from(1), TaskValue::from(2)]));
        let mapped = MappedRdd::new(Rc::clone(&parent), |v| {
            TaskValue::from(v.as_i64().unwrap() * 10)
        });
        assert_eq!(mapped.compute(Partition::new(1)), TaskValue::from(20));
        let deps = mapped.dependencies();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].kind, DependencyKind::Narrow);
    }

    #[test]
    fn shuffled_rdd_is_shuffle_and_combines_all_parent_partitions() {
        let parent: Rc<dyn MiniRdd> =
            Rc::new(VecRdd::new(vec![TaskValue::from(1), TaskValue::from(2), TaskValue::from(3)]));
        let shuffled = ShuffledRdd::new(Rc::clone(&parent), 1, |values| {
            let sum: i64 = values.iter().map(|v| v.as_i64().unwrap()).sum();
            TaskValue::from(sum)
        });
        assert_eq!(shuffled.compute(Partition::new(0)), TaskValue::from(6));
        let deps = shuffled.dependencies();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].kind, DependencyKind::Shuffle);
    }
}
