//! Round-robin dispatch of tasks across registered workers.

use std::collections::HashMap;

use crate::bus::{BusContext, Handler};
use crate::endpoint::Endpoint;
use crate::error::SimError;
use crate::message::{Envelope, Message, TaskValue};
use crate::promise::Promise;
use crate::task::{SharedTaskRegistry, Task};

struct WorkerRecord {
    worker_id: u64,
    endpoint: Endpoint,
}

/// Assigns submitted tasks to registered workers in round-robin order and
/// resolves the caller-facing promise when a result comes back.
///
/// Workers register themselves by sending [`Message::WorkerRegistration`];
/// the scheduler does not discover them any other way. Duplicate
/// `TaskResult`s (a worker that answers twice, or a result for a task the
/// scheduler has already resolved and forgotten) are logged and dropped —
/// resolution is idempotent by construction, since a settled [`Promise`]
/// ignores a second `resolve`/`reject`.
pub struct TaskScheduler {
    endpoint: Endpoint,
    registry: SharedTaskRegistry,
    workers: Vec<WorkerRecord>,
    next_worker: usize,
    pending: HashMap<u64, Promise<TaskValue, SimError>>,
}

impl TaskScheduler {
    /// Construct a scheduler listening on `endpoint`, sharing `registry`
    /// with the workers it will dispatch to.
    #[must_use]
    pub fn new(endpoint: Endpoint, registry: SharedTaskRegistry) -> Self {
        Self {
            endpoint,
            registry,
            workers: Vec::new(),
            next_worker: 0,
            pending: HashMap::new(),
        }
    }

    /// Number of workers currently registered.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop dispatching to a worker.
    ///
    /// Tasks already assigned to it are not retried or reassigned — their
    /// promises simply never resolve unless the worker still answers (a
    /// stale registration, not a live crash, in this simulator). Automatic
    /// retry on worker removal is a known extension point, not implemented
    /// here.
    pub fn remove_worker(&mut self, worker_id: u64) {
        self.workers.retain(|w| w.worker_id != worker_id);
    }

    /// Submit a batch of tasks for execution, one promise per task in
    /// input order.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::NoWorkersAvailable`] without sending anything if
    /// no worker has registered yet.
    pub fn submit(
        &mut self,
        tasks: Vec<Task>,
        ctx: &mut BusContext<'_>,
    ) -> Result<Vec<Promise<TaskValue, SimError>>, SimError> {
        if self.workers.is_empty() {
            let first = tasks.first();
            return Err(SimError::NoWorkersAvailable {
                task_id: first.map_or(0, |t| t.task_id),
                stage_id: first.map_or(0, |t| t.stage_id),
            });
        }

        let mut promises = Vec::with_capacity(tasks.len());
        for task in tasks {
            let worker = &self.workers[self.next_worker % self.workers.len()];
            self.next_worker = (self.next_worker + 1) % self.workers.len();

            let task_id = task.task_id;
            let stage_id = task.stage_id;
            let partition_id = task.partition_id;
            let worker_endpoint = worker.endpoint.clone();

            let promise = Promise::pending();
            self.pending.insert(task_id, promise.clone());
            self.registry.borrow_mut().insert(task_id, task);

            ctx.send(
                Message::SubmitTask {
                    task_id,
                    stage_id,
                    partition_id,
                    task_payload: TaskValue::Null,
                },
                self.endpoint.clone(),
                worker_endpoint,
            );

            promises.push(promise);
        }
        Ok(promises)
    }
}

impl Handler for TaskScheduler {
    fn handle(&mut self, envelope: &Envelope, _ctx: &mut BusContext<'_>) {
        match &envelope.message {
            Message::WorkerRegistration {
                worker_id,
                endpoint,
                num_cores,
            } => {
                tracing::debug!(
                    target: "sparksim::task_scheduler",
                    worker_id, %endpoint, num_cores, "worker registered"
                );
                if let Some(existing) = self.workers.iter_mut().find(|w| w.worker_id == *worker_id) {
                    existing.endpoint = endpoint.clone();
                } else {
                    self.workers.push(WorkerRecord {
                        worker_id: *worker_id,
                        endpoint: endpoint.clone(),
                    });
                }
            }
            Message::TaskResult {
                task_id,
                result,
                error,
                ..
            } => {
                let Some(promise) = self.pending.remove(task_id) else {
                    tracing::debug!(
                        target: "sparksim::task_scheduler",
                        task_id, "result for unknown or already-settled task; dropped"
                    );
                    return;
                };
                self.registry.borrow_mut().remove(task_id);
                match error {
                    Some(cause) => promise.reject(SimError::TaskFailed {
                        task_id: *task_id,
                        cause: cause.clone(),
                    }),
                    None => promise.resolve(result.clone().unwrap_or(TaskValue::Null)),
                }
            }
            other => {
                tracing::warn!(
                    target: "sparksim::task_scheduler",
                    kind = other.kind(),
                    "scheduler received a message it doesn't handle"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::bus::MessageBus;
    use crate::network::NetworkConfig;
    use crate::task::{MiniRdd, VecRdd};
    use crate::worker::{Worker, WorkerConfig};

    fn no_fault_network() -> NetworkConfig {
        NetworkConfig {
            seed: 1,
            min_latency_ticks: 0,
            max_latency_ticks: 0,
            drop_probability: 0.0,
            reorder: false,
            partitioned_pairs: Default::default(),
        }
    }

    fn task(task_id: u64, value: i64, rdd: &Rc<dyn MiniRdd>) -> Task {
        Task {
            task_id,
            stage_id: 1,
            partition_id: usize::try_from(value).unwrap_or(0) % rdd.num_partitions().max(1),
            rdd: Rc::clone(rdd),
        }
    }

    #[test]
    fn submit_without_workers_is_rejected() {
        let mut bus = MessageBus::new(no_fault_network()).unwrap();
        let registry = SharedTaskRegistry::default();
        let scheduler_ep = Endpoint::new("scheduler", 1);
        let mut scheduler = TaskScheduler::new(scheduler_ep, Rc::clone(&registry));
        let rdd: Rc<dyn MiniRdd> = Rc::new(VecRdd::new(vec![1.into()]));
        let err = scheduler
            .submit(vec![task(1, 0, &rdd)], &mut bus.context_for_test())
            .unwrap_err();
        assert_eq!(err.kind(), "no_workers_available");
    }

    /// Wires a [`TaskScheduler`] onto the bus as a `Handler` while keeping a
    /// second handle the test can call `submit` on directly, the same shared
    /// ownership shape [`crate::dag_scheduler::DAGSchedulerHandle`] uses.
    struct SchedulerRelay(Rc<RefCell<TaskScheduler>>);

    impl Handler for SchedulerRelay {
        fn handle(&mut self, envelope: &Envelope, ctx: &mut BusContext<'_>) {
            self.0.borrow_mut().handle(envelope, ctx);
        }
    }

    #[test]
    fn round_robin_across_three_workers_and_results_resolve_promises() {
        let mut bus = MessageBus::new(no_fault_network()).unwrap();
        let registry = SharedTaskRegistry::default();
        let scheduler_ep = Endpoint::new("scheduler", 1);
        let scheduler = Rc::new(RefCell::new(TaskScheduler::new(scheduler_ep.clone(), Rc::clone(&registry))));
        bus.register(scheduler_ep.clone(), SchedulerRelay(Rc::clone(&scheduler)));

        for worker_id in 1..=3u64 {
            let worker_ep = Endpoint::new(format!("worker-{worker_id}"), 1);
            let worker = Worker::new(
                worker_id,
                worker_ep.clone(),
                scheduler_ep.clone(),
                WorkerConfig {
                    max_queue_size: 4,
                    num_cores: 1,
                    task_duration_ticks: 1,
                },
                Rc::clone(&registry),
            );
            bus.register(worker_ep.clone(), worker);
            bus.send(
                Message::WorkerRegistration {
                    worker_id,
                    endpoint: worker_ep.clone(),
                    num_cores: 1,
                },
                worker_ep,
                scheduler_ep.clone(),
            );
        }

        // Registrations are only delivered on the next tick.
        bus.tick();
        assert_eq!(scheduler.borrow().worker_count(), 3);

        let rdd: Rc<dyn MiniRdd> = Rc::new(VecRdd::new(vec![10.into(), 20.into(), 30.into()]));
        let tasks = vec![task(1, 0, &rdd), task(2, 1, &rdd), task(3, 2, &rdd)];
        let promises = scheduler
            .borrow_mut()
            .submit(tasks, &mut bus.context_for_test())
            .unwrap();

        for _ in 0..2 {
            bus.tick();
        }

        assert_eq!(promises[0].peek(), Some(Ok(TaskValue::from(10))));
        assert_eq!(promises[1].peek(), Some(Ok(TaskValue::from(20))));
        assert_eq!(promises[2].peek(), Some(Ok(TaskValue::from(30))));
    }
}
