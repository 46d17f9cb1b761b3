//! Testability analysis of a netlist
//!
//! Computes SCOAP-style controllability and observability costs for every net, with
//! fixed-point iterations that tolerate feedback loops through flip-flops, and the
//! logic depth of every net from the primary inputs.

mod depth;
mod scoap;

use std::fmt;

pub use depth::{backward_order, forward_order, logic_depth};
pub use scoap::{
    controllability, gate_controllability, gate_observability, observability,
    FLIP_FLOP_PENALTY, INPUT_CONTROLLABILITY, MUX_PENALTY, OUTPUT_OBSERVABILITY, UNKNOWN_PENALTY,
};

use crate::Netlist;

/// Parameters of the fixed-point passes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisConfig {
    /// Maximum number of full sweeps over the gates
    pub max_passes: usize,
    /// Smallest change that counts as progress
    pub epsilon: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            max_passes: 10,
            epsilon: 0.01,
        }
    }
}

impl AnalysisConfig {
    /// Perform a consistency check on the parameters
    pub fn check(&self) {
        assert!(self.max_passes >= 1);
        assert!(self.epsilon >= 0.0);
    }
}

/// Outcome of a fixed-point pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Number of passes performed, the initial propagation included
    pub passes: usize,
    /// Whether the last sweep made no progress; false if the pass was capped
    pub converged: bool,
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.converged {
            write!(f, "converged in {} passes", self.passes)
        } else {
            write!(f, "capped after {} passes", self.passes)
        }
    }
}

/// Testability measures of every net, by net index
#[derive(Debug, Clone, PartialEq)]
pub struct Testability {
    /// Cost of setting each net to 0
    pub c0: Vec<f64>,
    /// Cost of setting each net to 1
    pub c1: Vec<f64>,
    /// Cost of observing each net at a primary output
    pub observability: Vec<f64>,
    /// Number of gates between each net and the closest primary input
    pub depth: Vec<usize>,
    /// Outcome of the controllability pass
    pub controllability_pass: PassReport,
    /// Outcome of the observability pass
    pub observability_pass: PassReport,
}

impl Testability {
    /// Return whether both passes reached a fixed point
    pub fn converged(&self) -> bool {
        self.controllability_pass.converged && self.observability_pass.converged
    }

    /// Return the number of nets
    pub fn nb_nets(&self) -> usize {
        self.c0.len()
    }
}

/// Run the full analysis on a netlist
pub fn analyze(netlist: &Netlist, config: &AnalysisConfig) -> Testability {
    config.check();
    let (c0, c1, controllability_pass) = controllability(netlist, config);
    let (observability, observability_pass) = observability(netlist, config);
    let depth = logic_depth(netlist);
    Testability {
        c0,
        c1,
        observability,
        depth,
        controllability_pass,
        observability_pass,
    }
}
