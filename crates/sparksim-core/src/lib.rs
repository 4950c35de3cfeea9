#![forbid(unsafe_code)]
//! Deterministic, tick-driven simulation of a distributed task scheduler.
//!
//! Everything here runs on a single thread, advanced one tick at a time by
//! [`SimulationRunner::run_until`] — no OS threads, no async runtime, no
//! wall-clock timeouts. A [`MessageBus`] carries [`Message`]s between
//! registered [`Handler`]s over a [`SimulatedNetwork`] that injects seeded
//! latency, reordering, and drops. A [`DAGScheduler`] turns an RDD's
//! dependency graph into [`Stage`]s, submits their tasks to a
//! [`TaskScheduler`], which round-robins them across registered
//! [`Worker`]s.

pub mod bus;
pub mod dag_scheduler;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod network;
pub mod promise;
pub mod rng;
pub mod runner;
pub mod stage;
pub mod task;
pub mod task_scheduler;
pub mod worker;

pub use bus::{BusContext, Handler, MessageBus};
pub use dag_scheduler::{DAGScheduler, DAGSchedulerHandle};
pub use endpoint::Endpoint;
pub use error::SimError;
pub use message::{Envelope, EnvelopeStatus, Message, TaskPayload, TaskValue};
pub use network::{NetworkConfig, SimulatedNetwork};
pub use promise::Promise;
pub use rng::DeterministicRng;
pub use runner::{RunnerConfig, SimulationRunner};
pub use stage::{Stage, StageKind};
pub use task::{DependencyKind, MappedRdd, MiniRdd, Partition, RddDependency, SharedTaskRegistry, ShuffledRdd, Task, VecRdd};
pub use task_scheduler::TaskScheduler;
pub use worker::{Worker, WorkerConfig, WorkerStats};
