//! Command line interface

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use trowel::features::{compile_features, FeatureConfig, FeatureRecord};
use trowel::io::{read_netlist_file, read_source_file, ParsedSource};
use trowel::rank::{annotate, HeuristicRanker, Site, SiteRanker, TestabilityRanker};
use trowel::stats::stats;
use trowel::testability::{analyze, AnalysisConfig, Testability};
use trowel::trojan::{
    insert_trojans, random_requests, verify, InsertionConfig, Manifest, PayloadKind,
    SynthesisConfig, TriggerKind, TrojanCost, TrojanRequest, TrojanSynthesizer,
};
use trowel::Netlist;

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Command line arguments
#[derive(Subcommand)]
pub enum Commands {
    /// Show statistics about a netlist
    ///
    /// Will print statistics on the number of inputs, outputs, nets and gates of the top module.
    #[clap()]
    Show(ShowArgs),

    /// Compute testability features
    ///
    /// Computes controllability, observability and logic depth for every net, and writes
    /// the features of the internal nets as JSON.
    #[clap(alias = "features")]
    Analyze(AnalyzeArgs),

    /// Rank candidate insertion sites
    ///
    /// Takes a netlist, or features previously written by the analyze command.
    #[clap()]
    Rank(RankArgs),

    /// Insert Trojans in a netlist
    ///
    /// Each Trojan is inserted in its own copy of the netlist. A manifest describing every
    /// insertion is written alongside the netlists.
    #[clap()]
    Insert(InsertArgs),

    /// Check the Trojan markers of netlists
    ///
    /// The command will fail if a marker is malformed or unbalanced.
    #[clap()]
    Verify(VerifyArgs),
}

/// Analysis options shared by several commands
#[derive(Args)]
pub struct AnalysisOptions {
    /// Maximum number of passes of the fixed-point iterations
    #[arg(long, default_value_t = 10)]
    max_passes: usize,

    /// Smallest cost change considered as progress
    #[arg(long, default_value_t = 0.01)]
    epsilon: f64,

    /// Cost ceiling used to normalize features
    #[arg(long, default_value_t = 100.0)]
    ceiling: f64,
}

impl AnalysisOptions {
    fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            max_passes: self.max_passes,
            epsilon: self.epsilon,
        }
    }

    fn feature_config(&self) -> FeatureConfig {
        FeatureConfig {
            ceiling: self.ceiling,
        }
    }

    /// Read a netlist and compute the features of its internal nets
    fn features(&self, file: &Path) -> anyhow::Result<(Netlist, Testability, Vec<FeatureRecord>)> {
        let (_, parsed) = read_netlist_file(file)?;
        Ok(self.analyze_source(&parsed))
    }

    /// Compute the features of the internal nets of the top module
    fn analyze_source(&self, parsed: &ParsedSource) -> (Netlist, Testability, Vec<FeatureRecord>) {
        let netlist = Netlist::from_module(parsed.top());
        let testability = analyze(&netlist, &self.analysis_config());
        info!(
            "Controllability {}, observability {}",
            testability.controllability_pass, testability.observability_pass
        );
        let features = compile_features(&netlist, &testability, &self.feature_config());
        (netlist, testability, features)
    }
}

/// Write JSON to a file, or to the standard output
fn write_json<T: Serialize>(output: Option<&Path>, value: &T) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            let f = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut w = BufWriter::new(f);
            serde_json::to_writer_pretty(&mut w, value)?;
            writeln!(w)?;
            w.flush()?;
        }
        None => {
            let mut w = io::stdout().lock();
            serde_json::to_writer_pretty(&mut w, value)?;
            writeln!(w)?;
        }
    }
    Ok(())
}

/// Command arguments for netlist informations
#[derive(Args)]
pub struct ShowArgs {
    /// Netlist to show
    file: PathBuf,
}

impl ShowArgs {
    pub fn run(&self) -> anyhow::Result<()> {
        let (_, parsed) = read_netlist_file(&self.file)?;
        let netlist = Netlist::from_module(parsed.top());
        println!("Netlist stats:\n{}", stats(&netlist));
        if parsed.modules.len() > 1 {
            println!("{} modules in the file", parsed.modules.len());
        }
        if !parsed.diagnostics.is_empty() {
            println!("{} statements skipped", parsed.diagnostics.len());
        }
        Ok(())
    }
}

/// Command arguments for feature computation
#[derive(Args)]
pub struct AnalyzeArgs {
    /// Netlist to analyze
    file: PathBuf,

    /// Output file for the features; standard output if omitted
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    options: AnalysisOptions,
}

impl AnalyzeArgs {
    pub fn run(&self) -> anyhow::Result<()> {
        let (netlist, testability, features) = self.options.features(&self.file)?;
        if !testability.converged() {
            eprintln!(
                "Analysis of {} did not converge in {} passes; values are approximate",
                netlist.name(),
                self.options.max_passes
            );
        }
        write_json(self.output.as_deref(), &features)
    }
}

/// Available site rankers
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RankerKind {
    /// Rank by testability only
    Testability,
    /// Weighted combination of testability, depth and fanout
    Heuristic,
}

impl RankerKind {
    fn ranker(&self) -> Box<dyn SiteRanker> {
        match self {
            RankerKind::Testability => Box::new(TestabilityRanker),
            RankerKind::Heuristic => Box::new(HeuristicRanker::default()),
        }
    }
}

/// Command arguments for site ranking
#[derive(Args)]
pub struct RankArgs {
    /// Netlist, or JSON features written by the analyze command
    file: PathBuf,

    /// Number of sites to keep
    #[arg(short = 'k', long, default_value_t = 100)]
    num_sites: usize,

    /// Scoring function
    #[arg(long, value_enum, default_value_t = RankerKind::Heuristic)]
    ranker: RankerKind,

    /// Output file for the sites; standard output if omitted
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Output file for the features, with their stealth score filled in
    #[arg(long)]
    features: Option<PathBuf>,

    #[command(flatten)]
    options: AnalysisOptions,
}

impl RankArgs {
    pub fn run(&self) -> anyhow::Result<()> {
        let mut features = if self.file.extension().is_some_and(|e| e == "json") {
            let text = read_source_file(&self.file)?;
            serde_json::from_str::<Vec<FeatureRecord>>(&text)
                .with_context(|| format!("Invalid features in {}", self.file.display()))?
        } else {
            self.options.features(&self.file)?.2
        };
        let ranker = self.ranker.ranker();
        let sites = ranker.rank(&features, self.num_sites);
        info!("Kept {} sites out of {}", sites.len(), features.len());
        if let Some(path) = &self.features {
            annotate(ranker.as_ref(), &mut features);
            write_json(Some(path), &features)?;
        }
        write_json(self.output.as_deref(), &sites)
    }
}

/// Ranked sites, as written by the rank command or by other tools
#[derive(Deserialize)]
#[serde(untagged)]
enum SiteList {
    Sites(Vec<Site>),
    Pairs(Vec<(String, f64)>),
    Wrapped { target_nets: Vec<Site> },
}

impl SiteList {
    fn into_sites(self) -> Vec<Site> {
        match self {
            SiteList::Sites(s) | SiteList::Wrapped { target_nets: s } => s,
            SiteList::Pairs(p) => p
                .into_iter()
                .map(|(net, score)| Site { net, score })
                .collect(),
        }
    }
}

/// Command arguments for Trojan insertion
#[derive(Args)]
pub struct InsertArgs {
    /// Netlist to insert Trojans in
    file: PathBuf,

    /// Output directory for the Trojan-inserted netlists and the manifest
    #[arg(short = 'o', long)]
    output: PathBuf,

    /// Ranked sites; computed with the heuristic ranker if omitted
    #[arg(long)]
    sites: Option<PathBuf>,

    /// Number of Trojans to insert
    #[arg(short = 'n', long, default_value_t = 10)]
    num_trojans: usize,

    /// Trigger kind; random if omitted
    #[arg(long, value_enum)]
    trigger: Option<TriggerKind>,

    /// Payload kind; random if omitted
    #[arg(long, value_enum)]
    payload: Option<PayloadKind>,

    /// Random seed for Trojan kinds and gate estimates
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Number of consecutive ranked sites offered to each Trojan
    #[arg(long, default_value_t = 10)]
    window: usize,

    /// Clock net of sequential triggers
    #[arg(long, default_value = "clk")]
    clock: String,

    /// Reset net of sequential triggers
    #[arg(long, default_value = "rst")]
    reset: String,

    #[command(flatten)]
    options: AnalysisOptions,
}

impl InsertArgs {
    fn load_sites(&self, parsed: &ParsedSource) -> anyhow::Result<Vec<Site>> {
        match &self.sites {
            Some(path) => {
                let text = read_source_file(path)?;
                let list: SiteList = serde_json::from_str(&text)
                    .with_context(|| format!("Invalid sites in {}", path.display()))?;
                Ok(list.into_sites())
            }
            None => {
                let (_, _, features) = self.options.analyze_source(parsed);
                Ok(HeuristicRanker::default().rank(&features, features.len()))
            }
        }
    }

    pub fn run(&self) -> anyhow::Result<()> {
        if self.window == 0 {
            bail!("The site window should not be empty");
        }
        let (text, parsed) = read_netlist_file(&self.file)?;
        let module = parsed.top().name.clone();
        let sites = self.load_sites(&parsed)?;
        let mut rng = SmallRng::seed_from_u64(self.seed);
        let requests: Vec<TrojanRequest> = random_requests(self.num_trojans, &mut rng)
            .into_iter()
            .map(|r| TrojanRequest {
                trigger: self.trigger.unwrap_or(r.trigger),
                payload: self.payload.unwrap_or(r.payload),
            })
            .collect();
        let config = SynthesisConfig {
            clock: self.clock.clone(),
            reset: self.reset.clone(),
            ..Default::default()
        };
        let synthesizer = TrojanSynthesizer::new(config, TrojanCost::default());
        let insertion = InsertionConfig {
            window: self.window,
            progress: true,
        };
        let report = insert_trojans(
            &text,
            &module,
            &sites,
            &requests,
            &synthesizer,
            &insertion,
            &mut rng,
        );

        fs::create_dir_all(&self.output)
            .with_context(|| format!("Failed to create {}", self.output.display()))?;
        for ins in &report.insertions {
            let path = self.output.join(&ins.file_name);
            fs::write(&path, &ins.text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if let Some(d) = ins.diagnostic {
                eprintln!("Trojan {}: {}", ins.descriptor.id, d);
            }
        }
        for f in &report.failures {
            eprintln!("Trojan request {} failed: {}", f.index + 1, f.error);
        }
        let manifest = Manifest::new(&self.file, &self.output, &report);
        let manifest_path = self.output.join("insertion_metadata.json");
        write_json(Some(&manifest_path), &manifest)?;
        println!(
            "Inserted {} Trojans in {}, manifest written to {}",
            report.nb_inserted(),
            self.output.display(),
            manifest_path.display()
        );
        Ok(())
    }
}

/// Command arguments for marker verification
#[derive(Args)]
pub struct VerifyArgs {
    /// Netlists to check
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Output file for the reports as JSON
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
}

/// Report of a single file
#[derive(Serialize)]
struct FileReport {
    file: String,
    #[serde(flatten)]
    report: trowel::trojan::VerifyReport,
}

impl VerifyArgs {
    pub fn run(&self) -> anyhow::Result<()> {
        let mut reports = Vec::new();
        for file in &self.files {
            let text = read_source_file(file)?;
            let report = verify(&text);
            let status = if report.has_trojan() && report.is_well_formed() {
                "ok"
            } else if report.is_well_formed() {
                "no Trojan"
            } else {
                "malformed"
            };
            println!("{} ({}): {}", file.display(), status, report);
            reports.push(FileReport {
                file: file.display().to_string(),
                report,
            });
        }
        let with_trojans = reports.iter().filter(|r| r.report.has_trojan()).count();
        println!(
            "{}/{} files with Trojans, {} Trojans total",
            with_trojans,
            reports.len(),
            reports.iter().map(|r| r.report.trojans.len()).sum::<usize>()
        );
        if let Some(path) = &self.output {
            write_json(Some(path), &reports)?;
        }
        let nb_malformed = reports.iter().filter(|r| !r.report.is_well_formed()).count();
        if nb_malformed != 0 {
            bail!("{} files have malformed Trojan markers", nb_malformed);
        }
        Ok(())
    }
}
