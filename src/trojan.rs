//! Synthesis and insertion of hardware Trojans
//!
//! A Trojan is made of a trigger, watching rarely-active nets, and a payload acting on a
//! net once triggered. The generated Verilog is woven into the original source between
//! machine-readable markers, so that insertions can be verified later.
//!
//! ```
//! use rand::rngs::SmallRng;
//! use rand::SeedableRng;
//! use trowel::rank::Site;
//! use trowel::trojan::{weave, verify, PayloadKind, TriggerKind, TrojanSynthesizer};
//!
//! let source = "module m (a, y);\n  input a;\n  output y;\n  BUFX1 g (.A(a), .Y(n));\n  INVX1 h (.A(n), .Y(y));\nendmodule\n";
//! let sites = vec![Site { net: "n".to_owned(), score: 0.8 }];
//! let mut rng = SmallRng::seed_from_u64(1);
//! let trojan = TrojanSynthesizer::default()
//!     .synthesize(&sites, TriggerKind::Combinational, PayloadKind::Corruption, &mut rng)
//!     .unwrap();
//! let woven = weave(source, &trojan.fragment);
//! assert!(woven.is_complete());
//! assert_eq!(verify(&woven.text).trojans.len(), 1);
//! ```

pub mod cost;
pub mod insert;
pub mod monitor;
mod synth;
mod verify;
mod weave;

pub use cost::TrojanCost;
pub use insert::{
    insert_trojans, output_file_name, random_requests, site_window, Insertion, InsertionConfig,
    InsertionFailure, InsertionReport, Manifest, ManifestEntry, TrojanRequest,
};
pub use monitor::TriggerMonitor;
pub use synth::{
    end_marker, net_ref, start_marker, PayloadKind, SynthesisConfig, SynthesisError, TriggerKind,
    TrojanDescriptor, TrojanSynthesizer, END_MARKER, START_MARKER,
};
pub use verify::{verify, FoundTrojan, MarkerProblem, VerifyReport};
pub use weave::{splice, weave, weave_into, Weave, WeaveDiagnostic};
