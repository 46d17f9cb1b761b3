//! Structural features of candidate insertion sites
//!
//! Every internal net gets a [`FeatureRecord`] summarizing its connectivity and its
//! testability measures, normalized so that downstream rankers work on bounded values.

use serde::{Deserialize, Serialize};

use crate::testability::Testability;
use crate::Netlist;

/// Normalization parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureConfig {
    /// Costs are clamped to this value, then divided by it
    pub ceiling: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig { ceiling: 100.0 }
    }
}

impl FeatureConfig {
    /// Clamp a cost to the ceiling and bring it to [0, 1]
    ///
    /// Unreached nets have an infinite cost, and normalize to 1.
    pub fn normalize(&self, cost: f64) -> f64 {
        cost.min(self.ceiling) / self.ceiling
    }

    /// Perform a consistency check on the parameters
    pub fn check(&self) {
        assert!(self.ceiling > 0.0 && self.ceiling.is_finite());
    }
}

/// Features of one internal net
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Name of the net
    pub net_name: String,
    /// Number of gates driving the net
    pub fanin: usize,
    /// Number of gates reading the net
    pub fanout: usize,
    /// Number of gates from the closest primary input
    pub logic_depth: usize,
    /// Normalized cost of setting the net to 0
    pub controllability_0: f64,
    /// Normalized cost of setting the net to 1
    pub controllability_1: f64,
    /// Normalized cost of observing the net
    pub observability: f64,
    /// Mean of the two normalized controllabilities
    pub avg_controllability: f64,
    /// Average controllability plus observability; higher is harder to test
    pub testability: f64,
    /// Suitability score, left at 0 here and written by a site ranker
    pub stealth_score: f64,
}

/// Compile the feature records of all internal nets, in net order
///
/// Primary inputs and outputs are not candidate sites and get no record.
pub fn compile_features(
    netlist: &Netlist,
    testability: &Testability,
    config: &FeatureConfig,
) -> Vec<FeatureRecord> {
    config.check();
    assert_eq!(netlist.nb_nets(), testability.nb_nets());
    let mut ret = Vec::new();
    for (i, net) in netlist.nets().iter().enumerate() {
        if !net.is_internal() {
            continue;
        }
        let c0 = config.normalize(testability.c0[i]);
        let c1 = config.normalize(testability.c1[i]);
        let obs = config.normalize(testability.observability[i]);
        let avg = (c0 + c1) / 2.0;
        ret.push(FeatureRecord {
            net_name: net.name.clone(),
            fanin: netlist.fanin(i),
            fanout: netlist.fanout(i),
            logic_depth: testability.depth[i],
            controllability_0: c0,
            controllability_1: c1,
            observability: obs,
            avg_controllability: avg,
            testability: avg + obs,
            stealth_score: 0.0,
        });
    }
    ret
}
