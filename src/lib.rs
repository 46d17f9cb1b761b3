//! Testability analysis and Trojan insertion for gate-level netlists
//!
//! This crate reads gate-level Verilog netlists, finds the nets that are structurally hard to
//! control and observe, and inserts hardware Trojans at those nets. It is meant to generate
//! datasets for hardware Trojan detection research.
//!
//! # Usage
//!
//! Trowel computes [SCOAP](https://en.wikipedia.org/wiki/Design_for_testing)-style
//! testability measures, ranks candidate nets, and weaves Trojan logic into the original source
//! with machine-readable markers.
//!
//! ```bash
//! # Show statistics about a netlist
//! trowel show mydesign.v
//! # Compute the features of every internal net
//! trowel analyze mydesign.v -o features.json
//! # Rank the best insertion sites
//! trowel rank mydesign.v -k 50 -o sites.json
//! # Insert 10 Trojans, each in its own copy of the netlist
//! trowel insert mydesign.v --sites sites.json -n 10 -o trojans/
//! # Check the inserted netlists
//! trowel verify trojans/*.v
//! ```
//!
//! # Development
//!
//! ## Datastructures
//!
//! [`Netlist`] is a directed graph over nets and gate instances, stored in two arenas and
//! referenced by index. Edges go from a net to the gates reading it, and from a gate to the nets
//! it drives. Flip-flops may create cycles: no analysis assumes a topological order.
//!
//! Analyses produce plain vectors indexed like the nets of the netlist.
//!
//! ```
//! use trowel::features::{compile_features, FeatureConfig};
//! use trowel::io::parse_verilog;
//! use trowel::rank::{SiteRanker, TestabilityRanker};
//! use trowel::testability::{analyze, AnalysisConfig};
//! use trowel::Netlist;
//!
//! let source = "
//! module full_adder (a, b, c, s, co);
//!   input a, b, c;
//!   output s, co;
//!   XOR2X1 x0 (.A(a), .B(b), .Y(p));
//!   XOR2X1 x1 (.A(p), .B(c), .Y(s));
//!   AND2X1 a0 (.A(a), .B(b), .Y(g));
//!   AND2X1 a1 (.A(p), .B(c), .Y(t));
//!   OR2X1 o0 (.A(g), .B(t), .Y(co));
//! endmodule
//! ";
//! let netlist = Netlist::from_module(parse_verilog(source).top());
//! let testability = analyze(&netlist, &AnalysisConfig::default());
//! let features = compile_features(&netlist, &testability, &FeatureConfig::default());
//! let sites = TestabilityRanker.rank(&features, 2);
//! assert_eq!(sites.len(), 2);
//! ```

#![warn(missing_docs)]

pub mod features;
pub mod io;
pub mod netlist;
pub mod rank;
pub mod testability;
pub mod trojan;

pub use netlist::{stats, GateKind, Netlist};
