use std::fmt;

use serde::Serialize;

/// Port identifiers that are treated as gate outputs, in matching order
///
/// Any other port identifier is an input.
pub const OUTPUT_PORTS: [&str; 6] = ["Y", "Q", "QN", "Z", "ZN", "OUT"];

/// Gate kinds recognized by the analysis
///
/// Cells are classified from their cell-type string. Anything that does not match
/// a known pattern is `Unknown`, and is analyzed with a conservative approximation.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateKind {
    /// N-input And gate
    And,
    /// N-input Or gate
    Or,
    /// N-input Xor gate
    Xor,
    /// N-input Nand gate
    Nand,
    /// N-input Nor gate
    Nor,
    /// N-input Xnor gate
    Xnor,
    /// Inverter
    Not,
    /// Buffer
    Buffer,
    /// Flip-flop of any flavour (enable, reset, scan...)
    FlipFlop,
    /// Multiplexer
    Mux,
    /// Any other cell
    Unknown,
}

/// Substring rules for classification: (kind, required, forbidden)
///
/// Rules are tried in order and the first match wins, so that a Nand is never an And,
/// and a Xnor is never a Nor or a Xor.
const CLASSIFICATION_RULES: [(GateKind, &[&str], &[&str]); 10] = [
    (GateKind::And, &["AND"], &["NAND"]),
    (GateKind::Nand, &["NAND"], &[]),
    (GateKind::Or, &["OR"], &["NOR", "XOR"]),
    (GateKind::Nor, &["NOR"], &["XNOR"]),
    (GateKind::Xor, &["XOR"], &["XNOR"]),
    (GateKind::Xnor, &["XNOR"], &[]),
    (GateKind::Not, &["NOT", "INV"], &[]),
    (GateKind::Buffer, &["BUF"], &[]),
    (GateKind::FlipFlop, &["DFF"], &[]),
    (GateKind::Mux, &["MUX"], &[]),
];

impl GateKind {
    /// All gate kinds, in display order
    pub const ALL: [GateKind; 11] = [
        GateKind::And,
        GateKind::Or,
        GateKind::Xor,
        GateKind::Nand,
        GateKind::Nor,
        GateKind::Xnor,
        GateKind::Not,
        GateKind::Buffer,
        GateKind::FlipFlop,
        GateKind::Mux,
        GateKind::Unknown,
    ];

    /// Classify a cell-type string
    ///
    /// ```
    /// # use trowel::GateKind;
    /// assert_eq!(GateKind::classify("NAND2X1"), GateKind::Nand);
    /// assert_eq!(GateKind::classify("sky130_fd_sc_hd__xnor2_1"), GateKind::Xnor);
    /// assert_eq!(GateKind::classify("DFFRX1"), GateKind::FlipFlop);
    /// assert_eq!(GateKind::classify("FILLER"), GateKind::Unknown);
    /// ```
    pub fn classify(cell: &str) -> GateKind {
        let upper = cell.to_uppercase();
        for (kind, required, forbidden) in CLASSIFICATION_RULES {
            let has_required = required.iter().any(|s| upper.contains(s));
            let has_forbidden = forbidden.iter().any(|s| upper.contains(s));
            if has_required && !has_forbidden {
                return kind;
            }
        }
        GateKind::Unknown
    }

    /// Position of the kind in [`GateKind::ALL`]
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Return whether the gate holds state
    pub fn is_sequential(&self) -> bool {
        matches!(self, GateKind::FlipFlop)
    }

    /// Name of the gate kind, as used in reports
    pub fn name(&self) -> &'static str {
        use GateKind::*;
        match self {
            And => "AND",
            Or => "OR",
            Xor => "XOR",
            Nand => "NAND",
            Nor => "NOR",
            Xnor => "XNOR",
            Not => "NOT",
            Buffer => "BUF",
            FlipFlop => "DFF",
            Mux => "MUX",
            Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Direction of a gate port
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize)]
pub enum PortDirection {
    /// The gate reads the net
    Input,
    /// The gate drives the net
    Output,
}

impl PortDirection {
    /// Infer the direction of a named port from its identifier
    pub fn from_port_name(port: &str) -> PortDirection {
        if OUTPUT_PORTS.contains(&port) {
            PortDirection::Output
        } else {
            PortDirection::Input
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{GateKind, PortDirection};

    #[test]
    fn test_classify_precedence() {
        assert_eq!(GateKind::classify("AND2"), GateKind::And);
        assert_eq!(GateKind::classify("NAND3X2"), GateKind::Nand);
        assert_eq!(GateKind::classify("OR4"), GateKind::Or);
        assert_eq!(GateKind::classify("NOR2"), GateKind::Nor);
        assert_eq!(GateKind::classify("XOR2"), GateKind::Xor);
        assert_eq!(GateKind::classify("XNOR2"), GateKind::Xnor);
        assert_eq!(GateKind::classify("INVX1"), GateKind::Not);
        assert_eq!(GateKind::classify("not"), GateKind::Not);
        assert_eq!(GateKind::classify("BUFX4"), GateKind::Buffer);
        assert_eq!(GateKind::classify("DFFSR"), GateKind::FlipFlop);
        assert_eq!(GateKind::classify("MUX2X1"), GateKind::Mux);
        assert_eq!(GateKind::classify("AOI21"), GateKind::Unknown);
        assert_eq!(GateKind::classify(""), GateKind::Unknown);
    }

    #[test]
    fn test_classify_case_insensitive() {
        assert_eq!(GateKind::classify("sky130_fd_sc_hd__nand2_1"), GateKind::Nand);
        assert_eq!(GateKind::classify("sky130_fd_sc_hd__nor2_1"), GateKind::Nor);
        assert_eq!(GateKind::classify("xor"), GateKind::Xor);
    }

    #[test]
    fn test_index() {
        for (i, k) in GateKind::ALL.iter().enumerate() {
            assert_eq!(k.index(), i);
        }
    }

    #[test]
    fn test_port_direction() {
        for p in ["Y", "Q", "QN", "Z", "ZN", "OUT"] {
            assert_eq!(PortDirection::from_port_name(p), PortDirection::Output);
        }
        for p in ["A", "B", "D", "CLK", "y", "S0"] {
            assert_eq!(PortDirection::from_port_name(p), PortDirection::Input);
        }
    }
}
