//! Single seeded deterministic RNG shared by every nondeterministic decision
//! in the simulator.
//!
//! Hand-rolled rather than built on the `rand` crate: the simulator needs a
//! PRNG whose call order and output are stable across platforms and crate
//! versions for as long as this crate exists, and a small constant-formula
//! generator is easier to pin down than a dependency's internal algorithm
//! (see DESIGN.md).

use serde::{Deserialize, Serialize};

/// Tiny deterministic RNG used by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    /// Create a new deterministic RNG from a seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed ^ 0x9E37_79B9_7F4A_7C15,
        }
    }

    /// Next pseudo-random `u64`.
    #[must_use]
    pub fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.state
    }

    /// Next value in `[0, upper_exclusive)`.
    #[must_use]
    pub fn next_bounded(&mut self, upper_exclusive: u64) -> u64 {
        if upper_exclusive == 0 {
            return 0;
        }
        self.next_u64() % upper_exclusive
    }

    /// Bernoulli trial with probability expressed as `[0.0, 1.0]`.
    ///
    /// Always consumes exactly one draw from the generator, even when
    /// `probability` is `0.0` or `1.0` — the decision is never
    /// short-circuited before the draw, so the RNG stream stays identical
    /// regardless of the configured probability (spec §4.1/invariant 6).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn hit_probability(&mut self, probability: f64) -> bool {
        // Scale to a fixed-point integer draw so the decision is reproducible
        // independent of floating point rounding across platforms. Clamped
        // before the cast, so the truncation/sign-loss the cast could
        // otherwise cause never happens in practice.
        let scaled = (probability.clamp(0.0, 1.0) * 1_000_000.0).round() as u64;
        self.next_bounded(1_000_000) < scaled
    }
}
