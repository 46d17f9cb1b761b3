use std::collections::VecDeque;

use itertools::Itertools;
use tracing::{debug, warn};

use crate::testability::depth::{backward_order, forward_order};
use crate::testability::{AnalysisConfig, PassReport};
use crate::{GateKind, Netlist};

/// Controllability of a primary input, for both polarities
pub const INPUT_CONTROLLABILITY: f64 = 1.0;

/// Observability of a primary output
pub const OUTPUT_OBSERVABILITY: f64 = 0.0;

/// Additional cost of going through a flip-flop
pub const FLIP_FLOP_PENALTY: f64 = 5.0;

/// Additional cost of going through a multiplexer, on top of the mean input cost
pub const MUX_PENALTY: f64 = 2.0;

/// Additional cost of going through a gate of unknown function, on top of the mean input cost
pub const UNKNOWN_PENALTY: f64 = 1.0;

fn min(v: &[f64]) -> f64 {
    v.iter().copied().fold(f64::INFINITY, f64::min)
}

fn sum(v: &[f64]) -> f64 {
    v.iter().sum()
}

fn mean(v: &[f64]) -> f64 {
    sum(v) / v.len() as f64
}

/// Controllability of a gate output, from the controllability of its inputs
///
/// Returns (cost of setting the output to 0, cost of setting the output to 1).
/// Both slices must have the same non-zero length.
///
/// ```
/// # use trowel::GateKind;
/// # use trowel::testability::gate_controllability;
/// // And2 with inputs of controllability-1 2 and 3
/// let (c0, c1) = gate_controllability(GateKind::And, &[2.0, 3.0], &[2.0, 3.0]);
/// assert_eq!(c0, 3.0);
/// assert_eq!(c1, 6.0);
/// ```
pub fn gate_controllability(kind: GateKind, c0: &[f64], c1: &[f64]) -> (f64, f64) {
    assert_eq!(c0.len(), c1.len());
    assert!(!c0.is_empty());
    use GateKind::*;
    match kind {
        And => (min(c0) + 1.0, sum(c1) + 1.0),
        Nand => (sum(c1) + 1.0, min(c0) + 1.0),
        Or => (sum(c0) + 1.0, min(c1) + 1.0),
        Nor => (min(c1) + 1.0, sum(c0) + 1.0),
        Xor | Xnor => {
            let c = sum(c0).min(sum(c1)) + 1.0;
            (c, c)
        }
        Not => (c1[0] + 1.0, c0[0] + 1.0),
        Buffer => (c0[0] + 1.0, c1[0] + 1.0),
        FlipFlop => (c0[0] + FLIP_FLOP_PENALTY, c1[0] + FLIP_FLOP_PENALTY),
        Mux => (mean(c0) + MUX_PENALTY, mean(c1) + MUX_PENALTY),
        Unknown => (mean(c0) + UNKNOWN_PENALTY, mean(c1) + UNKNOWN_PENALTY),
    }
}

/// Observability of the inputs of a gate, from the best observability among its outputs
///
/// Every input pays the fan-in of the gate on top of the output observability.
pub fn gate_observability(fanin: usize, output_observability: f64) -> f64 {
    output_observability + fanin as f64
}

/// Lower a value to a candidate; returns whether it improved by more than epsilon
fn relax(value: &mut f64, candidate: f64, epsilon: f64) -> bool {
    if candidate < *value {
        let improved = *value - candidate > epsilon;
        *value = candidate;
        improved
    } else {
        false
    }
}

/// Inputs that a gate's controllability rule reads
///
/// Inverters, buffers and flip-flops only depend on their first input, the data input of a
/// flip-flop; other gates depend on all of them.
fn rule_inputs(kind: GateKind, inputs: &[usize]) -> &[usize] {
    match kind {
        GateKind::Not | GateKind::Buffer | GateKind::FlipFlop => &inputs[..inputs.len().min(1)],
        _ => inputs,
    }
}

/// Evaluate a gate over its reached rule inputs and lower its outputs
///
/// Returns whether an output improved by more than epsilon; outputs reached for the first
/// time are pushed to `reached`.
fn update_gate(
    netlist: &Netlist,
    g: usize,
    c0: &mut [f64],
    c1: &mut [f64],
    epsilon: f64,
    reached: &mut Vec<usize>,
) -> bool {
    let gate = netlist.gate(g);
    let (in0, in1): (Vec<f64>, Vec<f64>) = rule_inputs(gate.kind, &gate.inputs)
        .iter()
        .filter(|i| c0[**i].is_finite() && c1[**i].is_finite())
        .map(|i| (c0[*i], c1[*i]))
        .unzip();
    if in0.is_empty() {
        return false;
    }
    let (out0, out1) = gate_controllability(gate.kind, &in0, &in1);
    let mut changed = false;
    for &o in &gate.outputs {
        // Primary inputs keep their baseline, even when something drives them
        if netlist.net(o).is_input {
            continue;
        }
        if c0[o].is_infinite() {
            reached.push(o);
        }
        changed |= relax(&mut c0[o], out0, epsilon);
        changed |= relax(&mut c1[o], out1, epsilon);
    }
    changed
}

/// Forward computation of controllability
///
/// The first pass propagates costs from the primary inputs with a worklist: a gate is
/// evaluated once all the inputs its rule reads have a cost, which gives exact values on
/// combinational logic. When only gates blocked by a feedback loop remain, the first of them
/// with a reached input is evaluated over the inputs reached so far, which opens the loop.
/// The following passes sweep all gates whose inputs are reached until no value decreases by
/// more than epsilon, or the pass limit is hit.
///
/// Values only decrease, and each net keeps the best value proposed by any of its drivers.
/// Nets that are never reached keep an infinite cost.
pub fn controllability(netlist: &Netlist, config: &AnalysisConfig) -> (Vec<f64>, Vec<f64>, PassReport) {
    let mut c0 = vec![f64::INFINITY; netlist.nb_nets()];
    let mut c1 = vec![f64::INFINITY; netlist.nb_nets()];
    for i in netlist.primary_inputs() {
        c0[i] = INPUT_CONTROLLABILITY;
        c1[i] = INPUT_CONTROLLABILITY;
    }
    let order = forward_order(netlist);

    // Number of distinct rule inputs without a cost yet
    let mut missing: Vec<usize> = netlist
        .gates()
        .iter()
        .map(|g| {
            rule_inputs(g.kind, &g.inputs)
                .iter()
                .unique()
                .filter(|i| c0[**i].is_infinite())
                .count()
        })
        .collect();
    let mut done: Vec<bool> = netlist
        .gates()
        .iter()
        .map(|g| g.inputs.is_empty())
        .collect();
    let mut queue: VecDeque<usize> = order
        .iter()
        .copied()
        .filter(|g| !done[*g] && missing[*g] == 0)
        .collect();
    let mut reached = Vec::new();
    let mut nb_forced = 0;
    loop {
        while let Some(g) = queue.pop_front() {
            if done[g] {
                continue;
            }
            done[g] = true;
            update_gate(netlist, g, &mut c0, &mut c1, config.epsilon, &mut reached);
            for n in reached.drain(..) {
                for &r in netlist.loads(n) {
                    let gate = netlist.gate(r);
                    if !done[r] && rule_inputs(gate.kind, &gate.inputs).contains(&n) {
                        missing[r] -= 1;
                        if missing[r] == 0 {
                            queue.push_back(r);
                        }
                    }
                }
            }
        }
        // Only gates on or behind a feedback loop are left
        let blocked = order.iter().copied().find(|g| {
            let gate = netlist.gate(*g);
            !done[*g]
                && rule_inputs(gate.kind, &gate.inputs)
                    .iter()
                    .any(|i| c0[*i].is_finite())
        });
        match blocked {
            Some(g) => {
                nb_forced += 1;
                queue.push_back(g);
            }
            None => break,
        }
    }
    if nb_forced != 0 {
        debug!(
            "Opened {} feedback loops in {} with partial inputs",
            nb_forced,
            netlist.name()
        );
    }

    let mut report = PassReport {
        passes: 1,
        converged: false,
    };
    while report.passes < config.max_passes {
        report.passes += 1;
        let mut changed = false;
        for &g in &order {
            let gate = netlist.gate(g);
            let inputs = rule_inputs(gate.kind, &gate.inputs);
            if inputs.is_empty() || inputs.iter().any(|i| c0[*i].is_infinite()) {
                continue;
            }
            changed |= update_gate(netlist, g, &mut c0, &mut c1, config.epsilon, &mut reached);
        }
        reached.clear();
        if !changed {
            report.converged = true;
            break;
        }
    }
    log_report("Controllability", netlist, &report);
    (c0, c1, report)
}

/// Backward fixed-point computation of observability
///
/// Values only decrease. Nets from which no primary output can be reached keep an infinite cost.
pub fn observability(netlist: &Netlist, config: &AnalysisConfig) -> (Vec<f64>, PassReport) {
    let mut obs = vec![f64::INFINITY; netlist.nb_nets()];
    for i in netlist.primary_outputs() {
        obs[i] = OUTPUT_OBSERVABILITY;
    }
    let order = backward_order(netlist);
    let mut report = PassReport::default();
    while report.passes < config.max_passes {
        report.passes += 1;
        let mut changed = false;
        for &g in &order {
            let gate = netlist.gate(g);
            if gate.outputs.is_empty() {
                continue;
            }
            let best_output = gate
                .outputs
                .iter()
                .map(|o| obs[*o])
                .fold(f64::INFINITY, f64::min);
            if best_output.is_infinite() {
                continue;
            }
            let candidate = gate_observability(gate.inputs.len(), best_output);
            for &i in &gate.inputs {
                if netlist.net(i).is_output {
                    continue;
                }
                changed |= relax(&mut obs[i], candidate, config.epsilon);
            }
        }
        if !changed {
            report.converged = true;
            break;
        }
    }
    log_report("Observability", netlist, &report);
    (obs, report)
}

fn log_report(pass: &str, netlist: &Netlist, report: &PassReport) {
    if report.converged {
        debug!(
            "{} of {} converged after {} passes",
            pass,
            netlist.name(),
            report.passes
        );
    } else {
        warn!(
            "{} of {} did not converge after {} passes; keeping approximate values",
            pass,
            netlist.name(),
            report.passes
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{controllability, gate_controllability, gate_observability, observability};
    use crate::io::parse_verilog;
    use crate::testability::AnalysisConfig;
    use crate::{GateKind, Netlist};

    fn netlist(source: &str) -> Netlist {
        Netlist::from_module(parse_verilog(source).top())
    }

    #[test]
    fn test_gate_rules() {
        use GateKind::*;
        let c0 = [2.0, 4.0];
        let c1 = [3.0, 5.0];
        assert_eq!(gate_controllability(And, &c0, &c1), (3.0, 9.0));
        assert_eq!(gate_controllability(Nand, &c0, &c1), (9.0, 3.0));
        assert_eq!(gate_controllability(Or, &c0, &c1), (7.0, 4.0));
        assert_eq!(gate_controllability(Nor, &c0, &c1), (4.0, 7.0));
        assert_eq!(gate_controllability(Xor, &c0, &c1), (7.0, 7.0));
        assert_eq!(gate_controllability(Xnor, &c0, &c1), (7.0, 7.0));
        assert_eq!(gate_controllability(Not, &[2.0], &[3.0]), (4.0, 3.0));
        assert_eq!(gate_controllability(Buffer, &[2.0], &[3.0]), (3.0, 4.0));
        assert_eq!(gate_controllability(FlipFlop, &[2.0], &[3.0]), (7.0, 8.0));
        assert_eq!(gate_controllability(Mux, &c0, &c1), (5.0, 6.0));
        assert_eq!(gate_controllability(Unknown, &c0, &c1), (4.0, 5.0));
        assert_eq!(gate_observability(3, 2.0), 5.0);
    }

    #[test]
    fn test_and_gate() {
        // Inputs with controllability-1 of 2 and 3, behind buffers and an inverter chain
        let n = netlist(
            "
module m (a, b, y);
  input a, b;
  output y;
  BUFX1 g0 (.A(a), .Y(x0));
  BUFX1 g1 (.A(b), .Y(t));
  BUFX1 g2 (.A(t), .Y(x1));
  AND2X1 g3 (.A(x0), .B(x1), .Y(y));
endmodule
",
        );
        let (c0, c1, report) = controllability(&n, &AnalysisConfig::default());
        assert!(report.converged);
        let x0 = n.find_net("x0").unwrap();
        let x1 = n.find_net("x1").unwrap();
        let y = n.find_net("y").unwrap();
        assert_eq!(c1[x0], 2.0);
        assert_eq!(c1[x1], 3.0);
        assert_eq!(c1[y], 6.0);
        assert_eq!(c0[y], 3.0);
    }

    #[test]
    fn test_unbalanced_depths() {
        // w arrives three gates after a
        let n = netlist(
            "
module m (a, b, y, z);
  input a, b;
  output y, z;
  XOR2X1 g0 (.A(a), .B(w), .Y(y));
  OR2X1 g1 (.A(a), .B(w), .Y(z));
  INVX1 g2 (.A(b), .Y(t0));
  INVX1 g3 (.A(t0), .Y(t1));
  INVX1 g4 (.A(t1), .Y(w));
endmodule
",
        );
        let (c0, c1, report) = controllability(&n, &AnalysisConfig::default());
        assert!(report.converged);
        let w = n.find_net("w").unwrap();
        let y = n.find_net("y").unwrap();
        let z = n.find_net("z").unwrap();
        assert_eq!((c0[w], c1[w]), (4.0, 4.0));
        assert_eq!((c0[y], c1[y]), (6.0, 6.0));
        assert_eq!((c0[z], c1[z]), (6.0, 2.0));
    }

    #[test]
    fn test_flip_flop_data_input() {
        // The clock reaches the flip-flop long before its data input
        let n = netlist(
            "
module m (a, clk, q);
  input a, clk;
  output q;
  DFFX1 r0 (.D(d), .CLK(clk), .Q(q));
  BUFX1 g0 (.A(a), .Y(t0));
  BUFX1 g1 (.A(t0), .Y(t1));
  BUFX1 g2 (.A(t1), .Y(d));
endmodule
",
        );
        let (c0, c1, report) = controllability(&n, &AnalysisConfig::default());
        assert!(report.converged);
        let d = n.find_net("d").unwrap();
        let q = n.find_net("q").unwrap();
        assert_eq!(c0[d], 4.0);
        assert_eq!(c0[q], 9.0);
        assert_eq!(c1[q], 9.0);
    }

    #[test]
    fn test_primary_ports() {
        let n = netlist(
            "
module m (a, b, y, z);
  input a, b;
  output y, z;
  NOR2X1 g0 (.A(a), .B(b), .Y(n0));
  XOR2X1 g1 (.A(n0), .B(a), .Y(y));
  INVX1 g2 (.A(y), .Y(z));
  BUFX1 g3 (.A(z), .Y(a));
endmodule
",
        );
        let config = AnalysisConfig::default();
        let (c0, c1, _) = controllability(&n, &config);
        let (obs, _) = observability(&n, &config);
        for i in n.primary_inputs() {
            assert_eq!(c0[i], 1.0);
            assert_eq!(c1[i], 1.0);
        }
        for i in n.primary_outputs() {
            assert_eq!(obs[i], 0.0);
        }
        let n0 = n.find_net("n0").unwrap();
        assert_eq!(obs[n0], 2.0);
        let a = n.find_net("a").unwrap();
        assert_eq!(obs[a], 2.0);
    }

    #[test]
    fn test_flip_flop_cycle() {
        let n = netlist(
            "
module counter (clk, en, y);
  input clk, en;
  output y;
  XOR2X1 g0 (.A(en), .B(q), .Y(d));
  DFFX1 r0 (.D(d), .CLK(clk), .Q(q));
  AND2X1 g1 (.A(q), .B(en), .Y(y));
  BUFX1 g2 (.A(orphan), .Y(orphan2));
endmodule
",
        );
        let config = AnalysisConfig::default();
        let (c0, c1, report) = controllability(&n, &config);
        assert!(report.passes <= config.max_passes);
        for name in ["d", "q", "y"] {
            let i = n.find_net(name).unwrap();
            assert!(c0[i].is_finite(), "{name}");
            assert!(c1[i].is_finite(), "{name}");
        }
        let orphan2 = n.find_net("orphan2").unwrap();
        assert!(c0[orphan2].is_infinite());
        // The loop is opened at the xor, from en alone
        let d = n.find_net("d").unwrap();
        let q = n.find_net("q").unwrap();
        let y = n.find_net("y").unwrap();
        assert_eq!(c0[d], 2.0);
        assert_eq!(c0[q], 7.0);
        assert_eq!(c1[y], 9.0);

        let (obs, report) = observability(&n, &config);
        assert!(report.converged);
        assert_eq!(obs[q], 2.0);
        assert_eq!(obs[d], 4.0);
        assert!(obs[orphan2].is_infinite());
    }

    #[test]
    fn test_iteration_cap() {
        // Gates are declared in reverse, but the first pass settles the chain
        let mut source = String::from("module chain (i, o);\n  input i;\n  output o;\n");
        for k in (0..40).rev() {
            source += &format!("  BUFX1 g{k} (.A(w{k}), .Y(w{}));\n", k + 1);
        }
        source += "  BUFX1 first (.A(i), .Y(w0));\n  BUFX1 last (.A(w40), .Y(o));\nendmodule\n";
        let n = netlist(&source);
        let config = AnalysisConfig {
            max_passes: 2,
            ..Default::default()
        };
        let (c0, _, report) = controllability(&n, &config);
        assert!(report.converged);
        assert_eq!(report.passes, 2);
        let o = n.find_net("o").unwrap();
        assert_eq!(c0[o], 43.0);

        // A single pass cannot prove convergence
        let config = AnalysisConfig {
            max_passes: 1,
            ..Default::default()
        };
        let (_, _, report) = controllability(&n, &config);
        assert!(!report.converged);
        assert_eq!(report.passes, 1);
    }
}
