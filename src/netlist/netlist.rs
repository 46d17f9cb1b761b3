use fxhash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::io::ParsedModule;
use crate::netlist::gates::GateKind;

/// A named signal of the netlist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Net {
    /// Name, unique in the module
    pub name: String,
    /// Declared as a primary input
    pub is_input: bool,
    /// Declared as a primary output
    pub is_output: bool,
}

impl Net {
    /// Return whether the net is neither a primary input nor a primary output
    pub fn is_internal(&self) -> bool {
        !self.is_input && !self.is_output
    }
}

/// An instantiated cell, with its connections resolved to net indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateInstance {
    /// Instance name, unique in the module
    pub name: String,
    /// Classified gate kind
    pub kind: GateKind,
    /// Cell type, as written in the source
    pub cell: String,
    /// Nets read by the gate, in connection order; may contain the same net twice
    pub inputs: Vec<usize>,
    /// Nets driven by the gate, in connection order
    pub outputs: Vec<usize>,
}

/// A directed edge of the netlist graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    /// The gate reads the net
    NetToGate {
        /// Net index
        net: usize,
        /// Gate index
        gate: usize,
    },
    /// The gate drives the net
    GateToNet {
        /// Gate index
        gate: usize,
        /// Net index
        net: usize,
    },
}

/// Directed graph over nets and gate instances
///
/// Nodes are referenced by index: nets and gates live in separate arenas, and names are
/// resolved once when the graph is built. Edges run from a net to the gates reading it,
/// and from a gate to the nets it drives. Flip-flops may close cycles, so no topological
/// order is assumed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Netlist {
    name: String,
    nets: Vec<Net>,
    gates: Vec<GateInstance>,
    edges: Vec<Edge>,
    drivers: Vec<Vec<usize>>,
    loads: Vec<Vec<usize>>,
    net_index: FxHashMap<String, usize>,
    nb_skipped_edges: usize,
}

impl Netlist {
    /// Create an empty netlist
    pub fn new(name: &str) -> Self {
        Netlist {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    /// Build the graph from a parsed module
    ///
    /// Nets are created in the order the parser recorded them, gates and edges in source
    /// order, so that identical sources always give identical graphs.
    /// Connections to unknown nets are dropped.
    pub fn from_module(module: &ParsedModule) -> Netlist {
        let mut ret = Netlist::new(&module.name);
        let inputs: FxHashSet<&str> = module.inputs.iter().map(|s| s.as_str()).collect();
        let outputs: FxHashSet<&str> = module.outputs.iter().map(|s| s.as_str()).collect();
        for name in &module.nets {
            ret.add_net(
                name,
                inputs.contains(name.as_str()),
                outputs.contains(name.as_str()),
            );
        }
        for g in &module.gates {
            let inputs = g.inputs().map(|n| n.to_owned()).collect::<Vec<_>>();
            let outputs = g.outputs().map(|n| n.to_owned()).collect::<Vec<_>>();
            ret.add_gate(&g.instance, g.kind, &g.cell, &inputs, &outputs);
        }
        debug!(
            "Built graph for {}: {} nets, {} gates, {} edges",
            ret.name,
            ret.nb_nets(),
            ret.nb_gates(),
            ret.nb_edges()
        );
        if ret.nb_skipped_edges != 0 {
            debug!(
                "{} connections reference undeclared nets",
                ret.nb_skipped_edges
            );
        }
        ret
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the number of nets
    pub fn nb_nets(&self) -> usize {
        self.nets.len()
    }

    /// Return the number of gates
    pub fn nb_gates(&self) -> usize {
        self.gates.len()
    }

    /// Return the number of edges
    pub fn nb_edges(&self) -> usize {
        self.edges.len()
    }

    /// Return the number of connections that were dropped because their net was unknown
    pub fn nb_skipped_edges(&self) -> usize {
        self.nb_skipped_edges
    }

    /// Get the net at index i
    pub fn net(&self, i: usize) -> &Net {
        &self.nets[i]
    }

    /// Get the gate at index i
    pub fn gate(&self, i: usize) -> &GateInstance {
        &self.gates[i]
    }

    /// All nets, by index
    pub fn nets(&self) -> &[Net] {
        &self.nets
    }

    /// All gates, by index
    pub fn gates(&self) -> &[GateInstance] {
        &self.gates
    }

    /// All edges, in creation order
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Index of the net with this name
    pub fn find_net(&self, name: &str) -> Option<usize> {
        self.net_index.get(name).copied()
    }

    /// Gates driving net i
    pub fn drivers(&self, i: usize) -> &[usize] {
        &self.drivers[i]
    }

    /// Gates reading net i
    pub fn loads(&self, i: usize) -> &[usize] {
        &self.loads[i]
    }

    /// Number of incoming edges of net i
    pub fn fanin(&self, i: usize) -> usize {
        self.drivers[i].len()
    }

    /// Number of outgoing edges of net i
    pub fn fanout(&self, i: usize) -> usize {
        self.loads[i].len()
    }

    /// Indices of the primary inputs
    pub fn primary_inputs(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nb_nets()).filter(|i| self.nets[*i].is_input)
    }

    /// Indices of the primary outputs
    pub fn primary_outputs(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nb_nets()).filter(|i| self.nets[*i].is_output)
    }

    /// Return whether the netlist contains sequential elements
    pub fn is_comb(&self) -> bool {
        self.gates.iter().all(|g| !g.kind.is_sequential())
    }

    /// Add a net, or update the roles of an existing one; returns its index
    pub fn add_net(&mut self, name: &str, is_input: bool, is_output: bool) -> usize {
        if let Some(&i) = self.net_index.get(name) {
            self.nets[i].is_input |= is_input;
            self.nets[i].is_output |= is_output;
            return i;
        }
        let i = self.nets.len();
        self.nets.push(Net {
            name: name.to_owned(),
            is_input,
            is_output,
        });
        self.drivers.push(Vec::new());
        self.loads.push(Vec::new());
        self.net_index.insert(name.to_owned(), i);
        i
    }

    /// Add a gate connected to existing nets; returns its index
    ///
    /// Connections to nets that do not exist are skipped. A net connected twice to the
    /// same gate gives a single edge.
    pub fn add_gate(
        &mut self,
        name: &str,
        kind: GateKind,
        cell: &str,
        inputs: &[String],
        outputs: &[String],
    ) -> usize {
        let gate = self.gates.len();
        let mut input_ids = Vec::new();
        for n in inputs {
            match self.find_net(n) {
                Some(net) => {
                    if self.loads[net].last() != Some(&gate) {
                        self.loads[net].push(gate);
                        self.edges.push(Edge::NetToGate { net, gate });
                    }
                    input_ids.push(net);
                }
                None => self.nb_skipped_edges += 1,
            }
        }
        let mut output_ids = Vec::new();
        for n in outputs {
            match self.find_net(n) {
                Some(net) => {
                    if self.drivers[net].last() != Some(&gate) {
                        self.drivers[net].push(gate);
                        self.edges.push(Edge::GateToNet { gate, net });
                    }
                    output_ids.push(net);
                }
                None => self.nb_skipped_edges += 1,
            }
        }
        self.gates.push(GateInstance {
            name: name.to_owned(),
            kind,
            cell: cell.to_owned(),
            inputs: input_ids,
            outputs: output_ids,
        });
        gate
    }

    /// Names of the nets read by gate i
    pub fn input_names(&self, i: usize) -> Vec<&str> {
        self.gates[i]
            .inputs
            .iter()
            .map(|n| self.nets[*n].name.as_str())
            .collect()
    }

    /// Names of the nets driven by gate i
    pub fn output_names(&self, i: usize) -> Vec<&str> {
        self.gates[i]
            .outputs
            .iter()
            .map(|n| self.nets[*n].name.as_str())
            .collect()
    }

    /// Perform a consistency check on the graph
    pub fn check(&self) {
        assert_eq!(self.drivers.len(), self.nb_nets());
        assert_eq!(self.loads.len(), self.nb_nets());
        assert_eq!(self.net_index.len(), self.nb_nets());
        for (i, n) in self.nets.iter().enumerate() {
            assert_eq!(self.net_index[&n.name], i);
        }
        let mut nb_edges = 0;
        for (i, g) in self.gates.iter().enumerate() {
            for n in &g.inputs {
                assert!(self.loads[*n].contains(&i));
            }
            for n in &g.outputs {
                assert!(self.drivers[*n].contains(&i));
            }
            nb_edges += g.inputs.iter().collect::<FxHashSet<_>>().len();
            nb_edges += g.outputs.iter().collect::<FxHashSet<_>>().len();
        }
        assert_eq!(nb_edges, self.nb_edges());
    }
}

#[cfg(test)]
mod tests {
    use super::{Edge, Netlist};
    use crate::io::parse_verilog;
    use crate::netlist::GateKind;

    const EXAMPLE: &str = "
module m (a, b, c, y);
  input a, b, c;
  output y;
  wire n1, n2;
  AND2X1 g1 (.A(a), .B(b), .Y(n1));
  OR2X1 g2 (.A(n1), .B(c), .Y(n2));
  XOR2X1 g3 (.A(n2), .B(n2), .Y(y));
  BUFX1 g4 (.A(n1), .Y(floating));
endmodule
";

    #[test]
    fn test_build() {
        let parsed = parse_verilog(EXAMPLE);
        let netlist = Netlist::from_module(parsed.top());
        netlist.check();
        assert_eq!(netlist.name(), "m");
        assert_eq!(netlist.nb_gates(), 4);
        // 6 declared nets and one auto-declared
        assert_eq!(netlist.nb_nets(), 7);
        assert_eq!(netlist.primary_inputs().count(), 3);
        assert_eq!(netlist.primary_outputs().count(), 1);
        assert!(netlist.is_comb());

        let n1 = netlist.find_net("n1").unwrap();
        assert_eq!(netlist.fanin(n1), 1);
        assert_eq!(netlist.fanout(n1), 2);
        let n2 = netlist.find_net("n2").unwrap();
        // Connected twice to the same gate: one edge, but two inputs
        assert_eq!(netlist.fanout(n2), 1);
        assert_eq!(netlist.gate(2).inputs, vec![n2, n2]);
        assert_eq!(netlist.nb_edges(), 3 + 3 + 2 + 2);
        assert_eq!(netlist.gate(1).kind, GateKind::Or);
        assert_eq!(netlist.input_names(1), vec!["n1", "c"]);
        assert_eq!(netlist.output_names(3), vec!["floating"]);
    }

    #[test]
    fn test_edge_order() {
        let parsed = parse_verilog(EXAMPLE);
        let netlist = Netlist::from_module(parsed.top());
        let a = netlist.find_net("a").unwrap();
        let b = netlist.find_net("b").unwrap();
        let n1 = netlist.find_net("n1").unwrap();
        assert_eq!(
            &netlist.edges()[..3],
            &[
                Edge::NetToGate { net: a, gate: 0 },
                Edge::NetToGate { net: b, gate: 0 },
                Edge::GateToNet { gate: 0, net: n1 },
            ]
        );
    }

    #[test]
    fn test_deterministic() {
        let first = Netlist::from_module(parse_verilog(EXAMPLE).top());
        let second = Netlist::from_module(parse_verilog(EXAMPLE).top());
        assert_eq!(first, second);
    }

    #[test]
    fn test_skip_unknown_nets() {
        let mut netlist = Netlist::new("m");
        let a = netlist.add_net("a", true, false);
        let y = netlist.add_net("y", false, true);
        netlist.add_gate(
            "g",
            GateKind::And,
            "AND2",
            &["a".to_owned(), "ghost".to_owned()],
            &["y".to_owned()],
        );
        netlist.check();
        assert_eq!(netlist.nb_skipped_edges(), 1);
        assert_eq!(netlist.gate(0).inputs, vec![a]);
        assert_eq!(netlist.drivers(y), &[0]);
    }

    #[test]
    fn test_gate_and_net_counts() {
        let mut source = String::from("module big (i0, o0);\n  input i0;\n  output o0;\n");
        for i in 0..50 {
            source += &format!("  INVX1 g{} (.A(w{}), .Y(w{}));\n", i, i, i + 1);
        }
        source += "endmodule\n";
        let parsed = parse_verilog(&source);
        let netlist = Netlist::from_module(parsed.top());
        assert_eq!(netlist.nb_gates(), 50);
        // Two declared ports plus 51 auto-declared wires
        assert_eq!(netlist.nb_nets(), 53);
    }
}
