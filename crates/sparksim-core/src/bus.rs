//! Handler registry and the tick loop that is the only source of temporal
//! progress in the simulator.

use std::collections::HashMap;

use crate::endpoint::Endpoint;
use crate::error::SimError;
use crate::message::{Envelope, Message};
use crate::network::{NetworkConfig, SimulatedNetwork};
use crate::rng::DeterministicRng;

/// A peer that can receive messages delivered by the bus.
///
/// `on_pre_tick` is the bus's phase 1 hook — handlers with scheduled
/// follow-up work (a worker polling a task promise that didn't resolve
/// synchronously, say) do it here, before any delivery happens this tick.
/// The default implementation does nothing.
pub trait Handler {
    /// Handle one delivered envelope. Must return without blocking on
    /// wall-clock time; the only legal suspension is producing a promise
    /// resolved by a future tick.
    fn handle(&mut self, envelope: &Envelope, ctx: &mut BusContext<'_>);

    /// Run once per tick, before delivery, in registration order.
    fn on_pre_tick(&mut self, _ctx: &mut BusContext<'_>) {}
}

/// Restricted view of the bus handed to a [`Handler`] during dispatch.
///
/// Exposes only `send`/`current_tick` — not the handler registry itself —
/// so a handler being invoked cannot reenter the registry it is currently
/// being taken out of.
pub struct BusContext<'a> {
    network: &'a mut SimulatedNetwork,
    rng: &'a mut DeterministicRng,
    current_tick: u64,
    next_sequence: &'a mut u64,
}

impl BusContext<'_> {
    /// Stamp and enqueue a message for delivery to `destination`.
    ///
    /// Returns the assigned `sequence_no`. The earliest tick at which this
    /// envelope can be observed is `current_tick + min_latency_ticks`.
    pub fn send(&mut self, message: Message, source: Endpoint, destination: Endpoint) -> u64 {
        self.send_correlated(message, source, destination, None)
    }

    /// Like [`Self::send`], but records an explicit correlation id on the
    /// envelope (used by request/response collaborator traffic).
    pub fn send_correlated(
        &mut self,
        message: Message,
        source: Endpoint,
        destination: Endpoint,
        correlation_id: Option<String>,
    ) -> u64 {
        let sequence_no = *self.next_sequence;
        *self.next_sequence += 1;
        self.network.enqueue(
            message,
            source,
            destination,
            sequence_no,
            self.current_tick,
            correlation_id,
            self.rng,
        );
        sequence_no
    }

    /// The tick currently being processed.
    #[must_use]
    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    /// Mutable access to the network, for operations the bus itself doesn't
    /// wrap (partitioning, inspection in tests).
    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        self.network
    }
}

/// Insertion-ordered `Endpoint -> Handler` registry.
///
/// Re-registration replaces the handler in place without moving its
/// position in iteration order; unregistration removes the entry.
struct HandlerRegistry {
    order: Vec<Endpoint>,
    slots: HashMap<Endpoint, Option<Box<dyn Handler>>>,
}

impl HandlerRegistry {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            slots: HashMap::new(),
        }
    }

    fn register(&mut self, endpoint: Endpoint, handler: Box<dyn Handler>) {
        if !self.slots.contains_key(&endpoint) {
            self.order.push(endpoint.clone());
        }
        self.slots.insert(endpoint, Some(handler));
    }

    fn unregister(&mut self, endpoint: &Endpoint) {
        self.slots.remove(endpoint);
        self.order.retain(|ep| ep != endpoint);
    }

    fn order_snapshot(&self) -> Vec<Endpoint> {
        self.order.clone()
    }

    fn take(&mut self, endpoint: &Endpoint) -> Option<Box<dyn Handler>> {
        self.slots.get_mut(endpoint).and_then(Option::take)
    }

    fn put_back(&mut self, endpoint: &Endpoint, handler: Box<dyn Handler>) {
        if let Some(slot) = self.slots.get_mut(endpoint) {
            *slot = Some(handler);
        }
    }

    fn contains(&self, endpoint: &Endpoint) -> bool {
        self.slots.contains_key(endpoint)
    }
}

/// The in-process message bus: handler registry plus the network, advanced
/// one tick at a time.
pub struct MessageBus {
    handlers: HandlerRegistry,
    network: SimulatedNetwork,
    rng: DeterministicRng,
    current_tick: u64,
    next_sequence: u64,
}

impl MessageBus {
    /// Create a bus from validated network configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: NetworkConfig) -> Result<Self, SimError> {
        let seed = config.seed;
        let network = SimulatedNetwork::new(config)?;
        Ok(Self {
            handlers: HandlerRegistry::new(),
            network,
            rng: DeterministicRng::new(seed),
            current_tick: 0,
            next_sequence: 0,
        })
    }

    /// Register a handler for `endpoint`. Replaces any existing handler for
    /// the same endpoint without changing its position in dispatch order.
    pub fn register(&mut self, endpoint: Endpoint, handler: impl Handler + 'static) {
        self.handlers.register(endpoint, Box::new(handler));
    }

    /// Remove the handler registered for `endpoint`, if any.
    pub fn unregister(&mut self, endpoint: &Endpoint) {
        self.handlers.unregister(endpoint);
    }

    /// Whether a handler is currently registered for `endpoint`.
    #[must_use]
    pub fn has_handler(&self, endpoint: &Endpoint) -> bool {
        self.handlers.contains(endpoint)
    }

    /// Current simulated tick.
    #[must_use]
    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    /// Number of envelopes in flight.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.network.pending_len()
    }

    /// Direct access to the network, mainly for tests and fault injection
    /// set up before a run starts.
    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }

    fn context(&mut self) -> BusContext<'_> {
        BusContext {
            network: &mut self.network,
            rng: &mut self.rng,
            current_tick: self.current_tick,
            next_sequence: &mut self.next_sequence,
        }
    }

    /// Expose the private [`BusContext`] builder to tests that need to call
    /// a `Handler` or scheduler method directly without driving a full tick.
    #[cfg(test)]
    pub(crate) fn context_for_test(&mut self) -> BusContext<'_> {
        self.context()
    }

    /// Send a message from outside any handler (e.g. a client kicking off
    /// a job). Stamps `sequence_no` and `send_tick` exactly as a handler's
    /// `ctx.send` would.
    pub fn send(&mut self, message: Message, source: Endpoint, destination: Endpoint) -> u64 {
        self.context().send(message, source, destination)
    }

    /// Execute exactly one round of progress:
    ///
    /// 1. Pre-tick callbacks, in handler registration order.
    /// 2. Delivery of every envelope due at `current_tick`, in canonical
    ///    order, each handler run to completion before the next envelope.
    /// 3. Promise resolution — collapsed into phase 2 in this
    ///    implementation, since `Promise::resolve`/`reject` drain their
    ///    continuations synchronously the moment they're called, which for
    ///    every promise this crate resolves happens while a handler is
    ///    running in phase 2 (see DESIGN.md).
    /// 4. Increment `current_tick`.
    ///
    /// Returns the number of envelopes dispatched this tick.
    pub fn tick(&mut self) -> usize {
        for endpoint in self.handlers.order_snapshot() {
            if let Some(mut handler) = self.handlers.take(&endpoint) {
                let mut ctx = self.context();
                handler.on_pre_tick(&mut ctx);
                self.handlers.put_back(&endpoint, handler);
            }
        }

        let due = self.network.drain_due(self.current_tick);
        let mut dispatched = 0usize;

        for envelope in due {
            tracing::debug!(
                target: "sparksim::bus",
                tick = self.current_tick,
                kind = envelope.kind(),
                source = %envelope.source,
                destination = %envelope.destination,
                sequence_no = envelope.sequence_no,
                "dispatching envelope"
            );

            if let Some(mut handler) = self.handlers.take(&envelope.destination) {
                let mut ctx = self.context();
                handler.handle(&envelope, &mut ctx);
                self.handlers.put_back(&envelope.destination, handler);
                dispatched += 1;
            } else {
                tracing::warn!(
                    target: "sparksim::bus",
                    destination = %envelope.destination,
                    kind = envelope.kind(),
                    "no handler registered; envelope dropped"
                );
            }
        }

        self.current_tick += 1;
        dispatched
    }
}
