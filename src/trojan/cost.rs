//! Estimate the number of gates a Trojan adds to a design
//!
//! ```
//! use rand::rngs::SmallRng;
//! use rand::SeedableRng;
//! use trowel::trojan::{PayloadKind, TriggerKind, TrojanCost};
//!
//! let mut rng = SmallRng::seed_from_u64(42);
//! let gates = TrojanCost::default().estimate(TriggerKind::Counter, PayloadKind::Leakage, &mut rng);
//! assert!((23..=30).contains(&gates));
//! ```

use std::fmt;

use rand::Rng;

use crate::trojan::{PayloadKind, TriggerKind};

/// Gate-count estimation parameters
///
/// Each trigger and payload kind has a base cost. A small random jitter is added so
/// that generated datasets do not have a handful of exact sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrojanCost {
    /// Cost of a combinational trigger
    pub combinational: usize,
    /// Cost of a sequential trigger
    pub sequential: usize,
    /// Cost of a counter trigger
    pub counter: usize,
    /// Cost of a leakage payload
    pub leakage: usize,
    /// Cost of a denial of service payload
    pub dos: usize,
    /// Cost of a corruption payload
    pub corruption: usize,
    /// Smallest jitter
    pub min_jitter: i64,
    /// Largest jitter
    pub max_jitter: i64,
    /// Smallest estimate ever returned
    pub min_gates: usize,
}

impl Default for TrojanCost {
    fn default() -> Self {
        TrojanCost {
            combinational: 5,
            sequential: 15,
            counter: 20,
            leakage: 5,
            dos: 5,
            corruption: 5,
            min_jitter: -2,
            max_jitter: 5,
            min_gates: 3,
        }
    }
}

impl TrojanCost {
    /// Base cost of a trigger
    pub fn trigger_cost(&self, kind: TriggerKind) -> usize {
        match kind {
            TriggerKind::Combinational => self.combinational,
            TriggerKind::Sequential => self.sequential,
            TriggerKind::Counter => self.counter,
        }
    }

    /// Base cost of a payload
    pub fn payload_cost(&self, kind: PayloadKind) -> usize {
        match kind {
            PayloadKind::Leakage => self.leakage,
            PayloadKind::DenialOfService => self.dos,
            PayloadKind::Corruption => self.corruption,
        }
    }

    /// Estimate without jitter
    pub fn base(&self, trigger: TriggerKind, payload: PayloadKind) -> usize {
        self.trigger_cost(trigger) + self.payload_cost(payload)
    }

    /// Estimate with a jitter drawn from rng
    pub fn estimate<R: Rng + ?Sized>(
        &self,
        trigger: TriggerKind,
        payload: PayloadKind,
        rng: &mut R,
    ) -> usize {
        let jitter = rng.gen_range(self.min_jitter..=self.max_jitter);
        let size = self.base(trigger, payload) as i64 + jitter;
        size.max(self.min_gates as i64) as usize
    }

    /// Perform a consistency check to verify that the parameters are consistent
    pub fn check(&self) {
        assert!(self.min_jitter <= self.max_jitter);
        assert!(self.min_gates >= 1);
        assert!(self.combinational <= self.sequential);
    }
}

impl fmt::Display for TrojanCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Trigger costs:")?;
        for kind in TriggerKind::ALL {
            writeln!(f, "\t{}: {}", kind, self.trigger_cost(kind))?;
        }
        writeln!(f, "Payload costs:")?;
        for kind in PayloadKind::ALL {
            writeln!(f, "\t{}: {}", kind, self.payload_cost(kind))?;
        }
        writeln!(
            f,
            "Jitter: {} to {}, at least {} gates",
            self.min_jitter, self.max_jitter, self.min_gates
        )
    }
}
