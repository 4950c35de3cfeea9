//! Seeded, fault-injecting network model underneath the [`crate::bus::MessageBus`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::error::SimError;
use crate::message::{Envelope, EnvelopeStatus, Message};
use crate::rng::DeterministicRng;

/// Configuration for the simulated network's latency, loss, and reordering
/// behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// RNG seed controlling all nondeterminism. Required for reproducibility.
    pub seed: u64,
    /// Inclusive minimum delivery delay, in ticks.
    pub min_latency_ticks: u64,
    /// Inclusive maximum delivery delay, in ticks.
    pub max_latency_ticks: u64,
    /// Probability in `[0.0, 1.0]` that an envelope is dropped at send time.
    pub drop_probability: f64,
    /// If `true`, delivery order is determined purely by `deliver_tick` (then
    /// a `(source, destination, sequence_no)` tiebreak). If `false`, FIFO
    /// per `(source, destination)` pair is preserved regardless of latency
    /// sampling.
    pub reorder: bool,
    /// Endpoint pairs whose envelopes are dropped unconditionally,
    /// independent of `drop_probability`. Order within a pair does not
    /// matter; `(a, b)` also blocks `b -> a` traffic.
    pub partitioned_pairs: BTreeSet<(Endpoint, Endpoint)>,
}

impl NetworkConfig {
    /// Validate configuration invariants.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidConfig`] if the latency range is inverted
    /// or the drop probability is out of range.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.min_latency_ticks > self.max_latency_ticks {
            return Err(SimError::InvalidConfig {
                reason: format!(
                    "min_latency_ticks ({}) > max_latency_ticks ({})",
                    self.min_latency_ticks, self.max_latency_ticks
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.drop_probability) {
            return Err(SimError::InvalidConfig {
                reason: format!(
                    "drop_probability {} not in [0.0, 1.0]",
                    self.drop_probability
                ),
            });
        }
        Ok(())
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            min_latency_ticks: 0,
            max_latency_ticks: 0,
            drop_probability: 0.0,
            reorder: false,
            partitioned_pairs: BTreeSet::new(),
        }
    }
}

/// Seeded, fault-injecting network underneath the bus.
///
/// Owns the delivery queue; the bus owns the single [`DeterministicRng`] and
/// passes it in explicitly so every nondeterministic draw in the whole
/// simulator comes from one stream in one fixed order.
#[derive(Debug, Clone)]
pub struct SimulatedNetwork {
    config: NetworkConfig,
    pending: Vec<Envelope>,
}

impl SimulatedNetwork {
    /// Create a network from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: NetworkConfig) -> Result<Self, SimError> {
        config.validate()?;
        Ok(Self {
            config,
            pending: Vec::new(),
        })
    }

    /// Configured network options.
    #[must_use]
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Number of envelopes currently in flight (pending delivery).
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Partition (isolate) traffic between two endpoints in both directions.
    pub fn set_partitioned(&mut self, a: Endpoint, b: Endpoint) {
        let pair = Self::canonical_pair(a, b);
        self.config.partitioned_pairs.insert(pair);
    }

    /// Remove a partition previously set with [`Self::set_partitioned`].
    pub fn clear_partitioned(&mut self, a: Endpoint, b: Endpoint) {
        let pair = Self::canonical_pair(a, b);
        self.config.partitioned_pairs.remove(&pair);
    }

    fn canonical_pair(a: Endpoint, b: Endpoint) -> (Endpoint, Endpoint) {
        if a <= b { (a, b) } else { (b, a) }
    }

    fn is_partitioned(&self, source: &Endpoint, destination: &Endpoint) -> bool {
        let pair = Self::canonical_pair(source.clone(), destination.clone());
        self.config.partitioned_pairs.contains(&pair)
    }

    /// Enqueue an envelope for future delivery.
    ///
    /// Draws from `rng` exactly twice, in order: a latency sample, then a
    /// drop decision. This order is fixed so the RNG stream stays
    /// reproducible regardless of partition state (partition drops are
    /// deterministic set membership, not an RNG draw).
    pub fn enqueue(
        &mut self,
        message: Message,
        source: Endpoint,
        destination: Endpoint,
        sequence_no: u64,
        send_tick: u64,
        correlation_id: Option<String>,
        rng: &mut DeterministicRng,
    ) {
        let span = self
            .config
            .max_latency_ticks
            .saturating_sub(self.config.min_latency_ticks)
            .saturating_add(1);
        let latency = self.config.min_latency_ticks.saturating_add(rng.next_bounded(span));
        let dropped_by_chance = rng.hit_probability(self.config.drop_probability);
        let dropped_by_partition = self.is_partitioned(&source, &destination);

        let status = if dropped_by_chance || dropped_by_partition {
            EnvelopeStatus::Dropped
        } else {
            EnvelopeStatus::Pending
        };

        if status == EnvelopeStatus::Dropped {
            tracing::debug!(
                target: "sparksim::network",
                %source, %destination, kind = message.kind(), sequence_no,
                "envelope dropped at send time"
            );
        }

        let envelope = Envelope {
            message,
            source,
            destination,
            sequence_no,
            send_tick,
            deliver_tick: send_tick.saturating_add(latency),
            status,
            correlation_id,
        };

        // Dropped envelopes are recorded transiently then discarded; they
        // never occupy the delivery queue.
        if envelope.status != EnvelopeStatus::Dropped {
            self.pending.push(envelope);
        }
    }

    /// Return every envelope due at `current_tick` in canonical order,
    /// removing them from the queue.
    ///
    /// Canonical order: `(deliver_tick, source, destination, sequence_no)`.
    /// When `reorder` is `false`, envelopes sharing a `(source,
    /// destination)` pair are additionally constrained to leave the queue
    /// in send order — a later envelope for the same pair is held back
    /// until every earlier one for that pair has been delivered, even if
    /// its own `deliver_tick` has already passed.
    pub fn drain_due(&mut self, current_tick: u64) -> Vec<Envelope> {
        let mut ready = Vec::new();

        if self.config.reorder {
            let mut remaining = Vec::with_capacity(self.pending.len());
            for envelope in self.pending.drain(..) {
                if envelope.deliver_tick <= current_tick {
                    ready.push(envelope);
                } else {
                    remaining.push(envelope);
                }
            }
            self.pending = remaining;
        } else {
            let mut by_pair: BTreeMap<(Endpoint, Endpoint), Vec<Envelope>> = BTreeMap::new();
            for envelope in self.pending.drain(..) {
                by_pair
                    .entry((envelope.source.clone(), envelope.destination.clone()))
                    .or_default()
                    .push(envelope);
            }

            let mut remaining = Vec::new();
            for (_pair, queue) in by_pair {
                let mut split_at = 0;
                while split_at < queue.len() && queue[split_at].deliver_tick <= current_tick {
                    split_at += 1;
                }
                let (due, rest) = queue.split_at(split_at);
                ready.extend_from_slice(due);
                remaining.extend_from_slice(rest);
            }
            self.pending = remaining;
        }

        ready.sort_by(|a, b| {
            (a.deliver_tick, &a.source, &a.destination, a.sequence_no).cmp(&(
                b.deliver_tick,
                &b.source,
                &b.destination,
                b.sequence_no,
            ))
        });

        for envelope in &mut ready {
            envelope.status = EnvelopeStatus::Delivered;
        }

        ready
    }
}
