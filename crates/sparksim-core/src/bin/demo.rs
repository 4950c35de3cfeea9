#![forbid(unsafe_code)]

use std::rc::Rc;

use anyhow::Result;
use sparksim_core::{
    DAGSchedulerHandle, Endpoint, MappedRdd, MessageBus, MiniRdd, NetworkConfig, SharedTaskRegistry, ShuffledRdd,
    SimulationRunner, TaskValue, VecRdd, Worker, WorkerConfig,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sparksim=debug")))
        .init();

    let network = NetworkConfig {
        seed: 7,
        min_latency_ticks: 0,
        max_latency_ticks: 2,
        drop_probability: 0.0,
        reorder: false,
        partitioned_pairs: Default::default(),
    };
    let mut bus = MessageBus::new(network)?;

    let scheduler_ep = Endpoint::new("scheduler", 7000);
    let registry = SharedTaskRegistry::default();
    let dag = DAGSchedulerHandle::new(scheduler_ep.clone(), Rc::clone(&registry));
    dag.register_on(&mut bus, scheduler_ep.clone());

    for worker_id in 1..=3u64 {
        let worker_ep = Endpoint::new(format!("worker-{worker_id}"), 7000 + worker_id as u16);
        let worker = Worker::new(
            worker_id,
            worker_ep.clone(),
            scheduler_ep.clone(),
            WorkerConfig {
                max_queue_size: 8,
                num_cores: 1,
                task_duration_ticks: 1,
            },
            Rc::clone(&registry),
        );
        bus.register(worker_ep, worker);
    }
    // Workers announce themselves on their own first tick, via `on_pre_tick`
    // in a real deployment; the demo just sends the registration directly
    // since `Worker::start` needs a live `BusContext` this binary has no
    // other reason to construct.
    for worker_id in 1..=3u64 {
        let worker_ep = Endpoint::new(format!("worker-{worker_id}"), 7000 + worker_id as u16);
        bus.send(
            sparksim_core::Message::WorkerRegistration {
                worker_id,
                endpoint: worker_ep.clone(),
                num_cores: 1,
            },
            worker_ep,
            scheduler_ep.clone(),
        );
    }

    // Land the worker registrations before any job is submitted: the
    // scheduler's pre-tick stage-submission phase runs before delivery
    // within a tick, so a job submitted this same tick would race ahead of
    // the registrations.
    bus.tick();

    let source: Rc<dyn MiniRdd> = Rc::new(VecRdd::new(vec![
        TaskValue::from(1),
        TaskValue::from(2),
        TaskValue::from(3),
        TaskValue::from(4),
    ]));
    let shuffled: Rc<dyn MiniRdd> = Rc::new(ShuffledRdd::new(Rc::clone(&source), 2, |values| {
        TaskValue::from(values.iter().filter_map(serde_json::Value::as_i64).sum::<i64>())
    }));
    let root: Rc<dyn MiniRdd> = Rc::new(MappedRdd::new(Rc::clone(&shuffled), |v| v));

    let futures = dag.submit_job(root, 2);
    let job_done = dag.job_done(0).expect("job 0 just submitted");

    let ticks = SimulationRunner::run_until(&mut bus, 50, |_| job_done.is_resolved())?;

    println!("job settled after {ticks} ticks");
    for (partition, future) in futures.iter().enumerate() {
        println!("partition {partition}: {:?}", future.peek());
    }

    Ok(())
}
