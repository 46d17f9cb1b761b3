//! Insertion of many Trojans in a design, each in its own copy of the source

use std::path::Path;

use chrono::{DateTime, Local};
use kdam::{tqdm, BarExt};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::rank::Site;
use crate::trojan::weave::{weave_into, WeaveDiagnostic};
use crate::trojan::{PayloadKind, SynthesisError, TriggerKind, TrojanDescriptor, TrojanSynthesizer};

/// Kind of Trojan to insert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrojanRequest {
    /// Trigger kind
    pub trigger: TriggerKind,
    /// Payload kind
    pub payload: PayloadKind,
}

/// Draw trigger and payload kinds uniformly
pub fn random_requests<R: Rng + ?Sized>(nb: usize, rng: &mut R) -> Vec<TrojanRequest> {
    (0..nb)
        .map(|_| TrojanRequest {
            trigger: *TriggerKind::ALL.choose(rng).unwrap_or(&TriggerKind::Combinational),
            payload: *PayloadKind::ALL.choose(rng).unwrap_or(&PayloadKind::Leakage),
        })
        .collect()
}

/// Parameters of a multi-Trojan run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertionConfig {
    /// Number of consecutive ranked sites offered to each Trojan
    pub window: usize,
    /// Show a progress bar
    pub progress: bool,
}

impl Default for InsertionConfig {
    fn default() -> Self {
        InsertionConfig {
            window: 10,
            progress: false,
        }
    }
}

/// Sites offered to the i-th Trojan
///
/// Successive Trojans rotate through the ranking, so that they do not all target the
/// same nets.
pub fn site_window(sites: &[Site], i: usize, window: usize) -> &[Site] {
    let period = sites.len().saturating_sub(window).max(1);
    // (i * window) mod period, without overflow
    let start = (i % period) * (window % period) % period;
    let start = start.min(sites.len());
    let end = start.saturating_add(window).min(sites.len());
    &sites[start..end]
}

/// A successful insertion
#[derive(Debug, Clone, PartialEq)]
pub struct Insertion {
    /// Index of the request
    pub index: usize,
    /// The synthesized Trojan
    pub descriptor: TrojanDescriptor,
    /// Source with the Trojan woven in
    pub text: String,
    /// Name of the file to write the text to
    pub file_name: String,
    /// Number of lines added to the source
    pub lines_added: usize,
    /// Set if the fragment could not be placed inside a module
    pub diagnostic: Option<WeaveDiagnostic>,
}

/// A request that could not be satisfied
#[derive(Debug, Clone, PartialEq)]
pub struct InsertionFailure {
    /// Index of the request
    pub index: usize,
    /// The request
    pub request: TrojanRequest,
    /// Cause of the failure
    pub error: SynthesisError,
}

/// Outcome of a multi-Trojan run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertionReport {
    /// Successful insertions, in request order
    pub insertions: Vec<Insertion>,
    /// Failed requests, in request order
    pub failures: Vec<InsertionFailure>,
}

impl InsertionReport {
    /// Return the number of Trojans inserted
    pub fn nb_inserted(&self) -> usize {
        self.insertions.len()
    }

    /// Return the number of failed requests
    pub fn nb_failed(&self) -> usize {
        self.failures.len()
    }
}

/// Name of the file holding a Trojan-inserted netlist
pub fn output_file_name(module: &str, descriptor: &TrojanDescriptor) -> String {
    format!(
        "{}_trojan_{:03}_{}_{}.v",
        module, descriptor.id, descriptor.trigger, descriptor.payload
    )
}

/// Insert one Trojan per request, each into its own copy of the source
///
/// Fragments are woven into `module`, the module whose nets were ranked. A request that
/// cannot be synthesized is recorded as a failure and the run goes on.
pub fn insert_trojans<R: Rng + ?Sized>(
    source: &str,
    module: &str,
    sites: &[Site],
    requests: &[TrojanRequest],
    synthesizer: &TrojanSynthesizer,
    config: &InsertionConfig,
    rng: &mut R,
) -> InsertionReport {
    assert!(config.window >= 1);
    let mut report = InsertionReport::default();
    let mut progress = tqdm!(total = requests.len(), disable = !config.progress);
    progress.set_description("Trojans inserted");
    for (i, request) in requests.iter().enumerate() {
        let window = site_window(sites, i, config.window);
        match synthesizer.synthesize(window, request.trigger, request.payload, rng) {
            Ok(descriptor) => {
                let w = weave_into(source, module, &descriptor.fragment);
                let file_name = output_file_name(module, &descriptor);
                report.insertions.push(Insertion {
                    index: i,
                    file_name,
                    text: w.text,
                    lines_added: w.lines_added,
                    diagnostic: w.diagnostic,
                    descriptor,
                });
            }
            Err(error) => {
                warn!("Trojan request {} skipped: {}", i + 1, error);
                report.failures.push(InsertionFailure {
                    index: i,
                    request: *request,
                    error,
                });
            }
        }
        if let Err(e) = progress.update(1) {
            warn!("Progress bar update failed: {}", e);
        }
    }
    info!(
        "Inserted {} Trojans in {}, {} requests failed",
        report.nb_inserted(),
        module,
        report.nb_failed()
    );
    report
}

/// Provenance of one inserted Trojan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestEntry {
    /// The synthesized Trojan
    #[serde(flatten)]
    pub descriptor: TrojanDescriptor,
    /// Netlist the Trojan was inserted into
    pub original_netlist: String,
    /// File holding the Trojan-inserted netlist
    pub output_file: String,
    /// Number of lines added to the source
    pub lines_added: usize,
    /// Whether the fragment was placed inside a module
    pub complete: bool,
}

/// Provenance of a multi-Trojan run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    /// Time the manifest was created
    pub timestamp: DateTime<Local>,
    /// Netlist the Trojans were inserted into
    pub original_netlist: String,
    /// Number of Trojans inserted
    pub num_trojans: usize,
    /// One entry per inserted Trojan
    pub insertions: Vec<ManifestEntry>,
}

impl Manifest {
    /// Build the manifest of a run whose netlists are written to `output_dir`
    pub fn new(original_netlist: &Path, output_dir: &Path, report: &InsertionReport) -> Manifest {
        let original = original_netlist.display().to_string();
        let insertions = report
            .insertions
            .iter()
            .map(|ins| ManifestEntry {
                descriptor: ins.descriptor.clone(),
                original_netlist: original.clone(),
                output_file: output_dir.join(&ins.file_name).display().to_string(),
                lines_added: ins.lines_added,
                complete: ins.diagnostic.is_none(),
            })
            .collect::<Vec<_>>();
        Manifest {
            timestamp: Local::now(),
            original_netlist: original,
            num_trojans: insertions.len(),
            insertions,
        }
    }
}
