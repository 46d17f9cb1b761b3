//! Check Trojan-inserted netlists for well-formed insertion markers

use std::fmt;

use serde::Serialize;

use crate::trojan::synth::{END_MARKER, START_MARKER};
use crate::trojan::{PayloadKind, TriggerKind};

/// A Trojan found between a start and an end marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FoundTrojan {
    /// Identifier from the start marker
    pub id: u32,
    /// Trigger kind from the start marker
    pub trigger: TriggerKind,
    /// Payload kind from the start marker
    pub payload: PayloadKind,
    /// Line of the start marker, starting at 1
    pub start_line: usize,
    /// Line of the end marker, starting at 1
    pub end_line: usize,
}

impl FoundTrojan {
    /// Return the number of lines between the markers
    pub fn nb_lines(&self) -> usize {
        self.end_line - self.start_line - 1
    }
}

/// Marker problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MarkerProblem {
    /// A start marker whose fields cannot be read
    Malformed {
        /// Line of the marker
        line: usize,
    },
    /// A start marker inside another Trojan
    Nested {
        /// Line of the marker
        line: usize,
    },
    /// An end marker outside any Trojan
    UnmatchedEnd {
        /// Line of the marker
        line: usize,
    },
    /// An end marker that does not close the open Trojan
    MismatchedId {
        /// Line of the marker
        line: usize,
        /// Identifier of the open Trojan
        expected: u32,
    },
    /// A Trojan that is never closed
    Unterminated {
        /// Line of the start marker
        line: usize,
    },
}

impl fmt::Display for MarkerProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerProblem::Malformed { line } => write!(f, "line {line}: malformed start marker"),
            MarkerProblem::Nested { line } => {
                write!(f, "line {line}: start marker inside another Trojan")
            }
            MarkerProblem::UnmatchedEnd { line } => {
                write!(f, "line {line}: end marker without start marker")
            }
            MarkerProblem::MismatchedId { line, expected } => {
                write!(f, "line {line}: end marker does not close Trojan {expected}")
            }
            MarkerProblem::Unterminated { line } => {
                write!(f, "line {line}: Trojan is never closed")
            }
        }
    }
}

/// Result of scanning a netlist for markers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Complete Trojans, in order of appearance
    pub trojans: Vec<FoundTrojan>,
    /// Problems found
    pub problems: Vec<MarkerProblem>,
    /// Number of lines of the text
    pub total_lines: usize,
    /// Number of lines strictly inside markers
    pub trojan_lines: usize,
}

impl VerifyReport {
    /// Return whether at least one complete Trojan is present
    pub fn has_trojan(&self) -> bool {
        !self.trojans.is_empty()
    }

    /// Return whether all markers are balanced, properly paired and readable
    pub fn is_well_formed(&self) -> bool {
        self.problems.is_empty()
    }

    /// Share of the lines that belong to Trojans, in percent
    pub fn trojan_percentage(&self) -> f64 {
        if self.total_lines == 0 {
            0.0
        } else {
            100.0 * self.trojan_lines as f64 / self.total_lines as f64
        }
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} Trojans found", self.trojans.len())?;
        for t in &self.trojans {
            writeln!(
                f,
                "\tTrojan {}: {} trigger, {} payload, lines {}-{}",
                t.id, t.trigger, t.payload, t.start_line, t.end_line
            )?;
        }
        writeln!(
            f,
            "{}/{} lines inserted ({:.1}%)",
            self.trojan_lines,
            self.total_lines,
            self.trojan_percentage()
        )?;
        for p in &self.problems {
            writeln!(f, "Problem at {}", p)?;
        }
        Ok(())
    }
}

/// Read the fields of a start marker: id, trigger and payload
fn parse_start(fields: &str) -> Option<(u32, TriggerKind, PayloadKind)> {
    let mut id = None;
    let mut trigger = None;
    let mut payload = None;
    for field in fields.split_whitespace() {
        let (key, value) = field.split_once('=')?;
        match key {
            "id" => id = value.parse().ok(),
            "trigger" => trigger = TriggerKind::from_name(value),
            "payload" => payload = PayloadKind::from_name(value),
            _ => (),
        }
    }
    Some((id?, trigger?, payload?))
}

fn parse_end(fields: &str) -> Option<u32> {
    fields.trim().strip_prefix("id=")?.parse().ok()
}

/// Scan a netlist for Trojan markers
pub fn verify(text: &str) -> VerifyReport {
    let mut report = VerifyReport::default();
    // Open Trojan: (id, trigger, payload, line)
    let mut open: Option<(u32, TriggerKind, PayloadKind, usize)> = None;
    let mut open_lines = 0;
    for (i, line) in text.lines().enumerate() {
        let line_nb = i + 1;
        report.total_lines += 1;
        let content = line.trim();
        if let Some(fields) = content.strip_prefix(START_MARKER) {
            if let Some((_, _, _, start_line)) = open.take() {
                report.problems.push(MarkerProblem::Nested { line: line_nb });
                report
                    .problems
                    .push(MarkerProblem::Unterminated { line: start_line });
            }
            match parse_start(fields) {
                Some((id, trigger, payload)) => {
                    open = Some((id, trigger, payload, line_nb));
                    open_lines = 0;
                }
                None => report.problems.push(MarkerProblem::Malformed { line: line_nb }),
            }
        } else if let Some(fields) = content.strip_prefix(END_MARKER) {
            match open.take() {
                Some((id, trigger, payload, start_line)) => {
                    if parse_end(fields) == Some(id) {
                        report.trojan_lines += open_lines;
                        report.trojans.push(FoundTrojan {
                            id,
                            trigger,
                            payload,
                            start_line,
                            end_line: line_nb,
                        });
                    } else {
                        report.problems.push(MarkerProblem::MismatchedId {
                            line: line_nb,
                            expected: id,
                        });
                    }
                }
                None => report
                    .problems
                    .push(MarkerProblem::UnmatchedEnd { line: line_nb }),
            }
        } else if open.is_some() {
            open_lines += 1;
        }
    }
    if let Some((_, _, _, line)) = open {
        report.problems.push(MarkerProblem::Unterminated { line });
    }
    report
}
