//! The only legal way to advance simulated time: drive the bus tick by
//! tick until a predicate is satisfied or a tick budget runs out.

use serde::{Deserialize, Serialize};

use crate::bus::MessageBus;
use crate::error::SimError;

/// Tunables for a [`SimulationRunner`] run.
///
/// Mirrors [`crate::network::NetworkConfig`] and
/// [`crate::worker::WorkerConfig`] in being a plain serializable struct with
/// no file loader or env var binding — embedding applications decide how to
/// produce one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Ticks to drive before giving up with [`SimError::Timeout`].
    pub tick_budget: u64,
}

/// Drives a [`MessageBus`] forward, one tick at a time, checking a
/// caller-supplied predicate after each tick.
///
/// There is no other entry point for advancing time in this crate: no
/// wall-clock sleeps, no monotonic-clock timeouts, nothing scheduled off an
/// OS callback. A `tick_budget` of `0` makes no progress and immediately
/// reports [`SimError::Timeout`] unless the predicate is already true.
pub struct SimulationRunner;

impl SimulationRunner {
    /// Tick `bus` until `predicate(bus)` returns `true`, using the budget
    /// carried by `config`. Thin wrapper over [`Self::run_until`] for
    /// callers that already have a [`RunnerConfig`] in hand.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Timeout`] if the configured budget elapses
    /// without the predicate becoming true.
    pub fn run_with_config(
        bus: &mut MessageBus,
        config: RunnerConfig,
        predicate: impl FnMut(&MessageBus) -> bool,
    ) -> Result<u64, SimError> {
        Self::run_until(bus, config.tick_budget, predicate)
    }

    /// Tick `bus` until `predicate(bus)` returns `true`, returning the
    /// number of ticks consumed.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Timeout`] if `tick_budget` ticks elapse without
    /// the predicate becoming true.
    pub fn run_until(
        bus: &mut MessageBus,
        tick_budget: u64,
        mut predicate: impl FnMut(&MessageBus) -> bool,
    ) -> Result<u64, SimError> {
        if predicate(bus) {
            return Ok(0);
        }

        for ticks_elapsed in 0..tick_budget {
            bus.tick();
            if predicate(bus) {
                return Ok(ticks_elapsed + 1);
            }
        }

        tracing::warn!(
            target: "sparksim::runner",
            tick_budget, "run_until exhausted its tick budget"
        );
        Err(SimError::Timeout {
            ticks_elapsed: tick_budget,
            tick_budget,
        })
    }
}
