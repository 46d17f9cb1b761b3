//! Representation of gate-level netlists as a graph

mod gates;
#[allow(clippy::module_inception)]
mod netlist;
pub mod stats;

pub use gates::{GateKind, PortDirection, OUTPUT_PORTS};
pub use netlist::{Edge, GateInstance, Net, Netlist};
