use std::collections::VecDeque;

use crate::Netlist;

/// Breadth-first traversal of the netlist graph from a set of nets
///
/// Returns the distance of each net to the seeds, in gate hops, and the order in which
/// gates were reached. Forward traversal follows net → reading gate → driven net;
/// backward traversal follows net → driving gate → read net.
fn traverse(netlist: &Netlist, seeds: &[usize], forward: bool) -> (Vec<Option<usize>>, Vec<usize>) {
    let mut depth = vec![None; netlist.nb_nets()];
    let mut gate_seen = vec![false; netlist.nb_gates()];
    let mut gate_order = Vec::new();
    let mut queue = VecDeque::new();
    for &s in seeds {
        if depth[s].is_none() {
            depth[s] = Some(0);
            queue.push_back(s);
        }
    }
    while let Some(n) = queue.pop_front() {
        let d = depth[n].unwrap_or(0);
        let gates = if forward {
            netlist.loads(n)
        } else {
            netlist.drivers(n)
        };
        for &g in gates {
            if gate_seen[g] {
                continue;
            }
            gate_seen[g] = true;
            gate_order.push(g);
            let gate = netlist.gate(g);
            let next = if forward { &gate.outputs } else { &gate.inputs };
            for &m in next {
                if depth[m].is_none() {
                    depth[m] = Some(d + 1);
                    queue.push_back(m);
                }
            }
        }
    }
    // Gates that cannot be reached keep their source order
    for (g, seen) in gate_seen.iter().enumerate() {
        if !seen {
            gate_order.push(g);
        }
    }
    (depth, gate_order)
}

/// Logic depth of each net: the number of gates on the shortest path from a primary input
///
/// Primary inputs have depth 0. Nets that no primary input reaches also get depth 0.
pub fn logic_depth(netlist: &Netlist) -> Vec<usize> {
    let inputs: Vec<usize> = netlist.primary_inputs().collect();
    let (depth, _) = traverse(netlist, &inputs, true);
    depth.into_iter().map(|d| d.unwrap_or(0)).collect()
}

/// Order in which to visit gates for forward propagation, starting from the primary inputs
pub fn forward_order(netlist: &Netlist) -> Vec<usize> {
    let inputs: Vec<usize> = netlist.primary_inputs().collect();
    traverse(netlist, &inputs, true).1
}

/// Order in which to visit gates for backward propagation, starting from the primary outputs
pub fn backward_order(netlist: &Netlist) -> Vec<usize> {
    let outputs: Vec<usize> = netlist.primary_outputs().collect();
    traverse(netlist, &outputs, false).1
}

#[cfg(test)]
mod tests {
    use super::{backward_order, forward_order, logic_depth};
    use crate::io::parse_verilog;
    use crate::Netlist;

    #[test]
    fn test_depth() {
        let source = "
module m (a, b, y);
  input a, b;
  output y;
  INVX1 g2 (.A(n1), .Y(y));
  AND2X1 g1 (.A(n0), .B(b), .Y(n1));
  INVX1 g0 (.A(a), .Y(n0));
  INVX1 g3 (.A(island), .Y(island2));
endmodule
";
        let netlist = Netlist::from_module(parse_verilog(source).top());
        let depth = logic_depth(&netlist);
        let d = |name: &str| depth[netlist.find_net(name).unwrap()];
        assert_eq!(d("a"), 0);
        assert_eq!(d("b"), 0);
        assert_eq!(d("n0"), 1);
        // Shortest path goes through b
        assert_eq!(d("n1"), 1);
        assert_eq!(d("y"), 2);
        assert_eq!(d("island"), 0);
        assert_eq!(d("island2"), 0);

        assert_eq!(forward_order(&netlist), vec![2, 1, 0, 3]);
        assert_eq!(backward_order(&netlist), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_cycle() {
        let source = "
module m (clk, a, y);
  input clk, a;
  output y;
  XOR2X1 g0 (.A(a), .B(q), .Y(d));
  DFFX1 r0 (.D(d), .CLK(clk), .Q(q));
  BUFX1 g1 (.A(q), .Y(y));
endmodule
";
        let netlist = Netlist::from_module(parse_verilog(source).top());
        let depth = logic_depth(&netlist);
        let d = |name: &str| depth[netlist.find_net(name).unwrap()];
        assert_eq!(d("d"), 1);
        // The clock reaches the flip-flop directly
        assert_eq!(d("q"), 1);
        assert_eq!(d("y"), 2);
    }
}
