//! Compute netlist statistics
//!
//! ```
//! # use trowel::Netlist;
//! # let netlist = Netlist::new("top");
//! use trowel::netlist::stats::stats;
//! let stats = stats(&netlist);
//!
//! // Check that there is no flip-flop
//! assert_eq!(stats.nb_flip_flops(), 0);
//!
//! // Show the statistics
//! println!("{}", stats);
//! ```

use std::fmt;

use crate::{GateKind, Netlist};

/// Number of ports, nets, edges and gates in a netlist
#[derive(Clone, Debug)]
pub struct NetlistStats {
    /// Module name
    pub name: String,
    /// Number of primary inputs
    pub nb_inputs: usize,
    /// Number of primary outputs
    pub nb_outputs: usize,
    /// Number of nets, including ports
    pub nb_nets: usize,
    /// Number of graph edges
    pub nb_edges: usize,
    /// Number of gates of each kind, in the order of `GateKind::ALL`
    pub gates_by_kind: [usize; GateKind::ALL.len()],
}

impl NetlistStats {
    /// Total number of gates, including flip-flops
    pub fn nb_gates(&self) -> usize {
        self.gates_by_kind.iter().sum()
    }

    /// Number of gates of a given kind
    pub fn nb_of_kind(&self, kind: GateKind) -> usize {
        self.gates_by_kind[kind.index()]
    }

    /// Number of flip-flops
    pub fn nb_flip_flops(&self) -> usize {
        self.nb_of_kind(GateKind::FlipFlop)
    }
}

impl fmt::Display for NetlistStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Stats for {}:", self.name)?;
        writeln!(f, "  Inputs: {}", self.nb_inputs)?;
        writeln!(f, "  Outputs: {}", self.nb_outputs)?;
        writeln!(f, "  Nets: {}", self.nb_nets)?;
        writeln!(f, "  Edges: {}", self.nb_edges)?;
        writeln!(f, "  Gates: {}", self.nb_gates())?;
        for (kind, nb) in GateKind::ALL.iter().zip(self.gates_by_kind.iter()) {
            if *nb != 0 {
                writeln!(f, "      {}: {}", kind, nb)?;
            }
        }
        fmt::Result::Ok(())
    }
}

/// Compute the statistics of the netlist
pub fn stats(netlist: &Netlist) -> NetlistStats {
    let mut gates_by_kind = [0; GateKind::ALL.len()];
    for g in netlist.gates() {
        gates_by_kind[g.kind.index()] += 1;
    }
    NetlistStats {
        name: netlist.name().to_owned(),
        nb_inputs: netlist.primary_inputs().count(),
        nb_outputs: netlist.primary_outputs().count(),
        nb_nets: netlist.nb_nets(),
        nb_edges: netlist.nb_edges(),
        gates_by_kind,
    }
}
