//! Cycle-level model of the generated triggers
//!
//! Mirrors the behaviour of the Verilog emitted for each trigger kind, so that firing
//! conditions can be checked without a simulator.

use crate::trojan::TriggerKind;

/// Behavioural model of a trigger
///
/// Each call to [`TriggerMonitor::step`] is one clock edge with the given values of the
/// trigger nets, and returns the trigger output after the edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerMonitor {
    kind: TriggerKind,
    nb_nets: usize,
    counter_width: u32,
    state: u64,
}

impl TriggerMonitor {
    /// Create a monitor for a trigger on `nb_nets` nets
    pub fn new(kind: TriggerKind, nb_nets: usize, counter_width: u32) -> TriggerMonitor {
        assert!(nb_nets >= 1);
        assert!((1..=32).contains(&counter_width));
        TriggerMonitor {
            kind,
            nb_nets,
            counter_width,
            state: 0,
        }
    }

    /// Value of the state or counter register
    pub fn state(&self) -> u64 {
        self.state
    }

    /// Return the number of trigger nets
    pub fn nb_nets(&self) -> usize {
        self.nb_nets
    }

    /// Assert the reset
    pub fn reset(&mut self) {
        self.state = 0;
    }

    fn counter_max(&self) -> u64 {
        (1u64 << self.counter_width) - 1
    }

    /// Trigger output for the current state; combinational triggers need the net values
    pub fn fires(&self, nets: &[bool]) -> bool {
        assert_eq!(nets.len(), self.nb_nets);
        match self.kind {
            TriggerKind::Combinational => nets.iter().all(|b| *b),
            TriggerKind::Sequential => self.state == self.nb_nets as u64,
            TriggerKind::Counter => self.state == self.counter_max(),
        }
    }

    /// Apply one clock edge and return the trigger output
    pub fn step(&mut self, nets: &[bool]) -> bool {
        assert_eq!(nets.len(), self.nb_nets);
        match self.kind {
            TriggerKind::Combinational => (),
            TriggerKind::Sequential => {
                let s = self.state as usize;
                if s < self.nb_nets {
                    if nets[s] {
                        self.state += 1;
                    }
                } else {
                    self.state = 0;
                }
            }
            TriggerKind::Counter => {
                if nets[0] {
                    self.state = (self.state + 1) & self.counter_max();
                }
            }
        }
        self.fires(nets)
    }
}
