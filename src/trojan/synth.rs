use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use itertools::Itertools;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::rank::Site;
use crate::trojan::cost::TrojanCost;
use crate::trojan::monitor::TriggerMonitor;

/// Condition that activates a Trojan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// Rare conjunction of the trigger nets
    Combinational,
    /// State machine observing the trigger nets asserted in sequence
    Sequential,
    /// Counter of the cycles where the first trigger net is asserted
    Counter,
}

/// Effect of a Trojan once triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    /// Pass the payload net to a new wire
    Leakage,
    /// Force the payload net to 0
    #[serde(rename = "dos")]
    #[value(name = "dos")]
    DenialOfService,
    /// Invert the payload net
    Corruption,
}

impl TriggerKind {
    /// All trigger kinds
    pub const ALL: [TriggerKind; 3] = [
        TriggerKind::Combinational,
        TriggerKind::Sequential,
        TriggerKind::Counter,
    ];

    /// Name used in markers, file names and reports
    pub fn name(&self) -> &'static str {
        match self {
            TriggerKind::Combinational => "combinational",
            TriggerKind::Sequential => "sequential",
            TriggerKind::Counter => "counter",
        }
    }

    /// Parse a name as returned by [`TriggerKind::name`]
    pub fn from_name(name: &str) -> Option<TriggerKind> {
        TriggerKind::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Return whether the trigger needs a clock and a reset
    pub fn is_sequential(&self) -> bool {
        !matches!(self, TriggerKind::Combinational)
    }
}

impl PayloadKind {
    /// All payload kinds
    pub const ALL: [PayloadKind; 3] = [
        PayloadKind::Leakage,
        PayloadKind::DenialOfService,
        PayloadKind::Corruption,
    ];

    /// Name used in markers, file names and reports
    pub fn name(&self) -> &'static str {
        match self {
            PayloadKind::Leakage => "leakage",
            PayloadKind::DenialOfService => "dos",
            PayloadKind::Corruption => "corruption",
        }
    }

    /// Parse a name as returned by [`PayloadKind::name`]
    pub fn from_name(name: &str) -> Option<PayloadKind> {
        PayloadKind::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Generation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisConfig {
    /// Clock net of sequential and counter triggers
    pub clock: String,
    /// Active-high asynchronous reset of sequential and counter triggers
    pub reset: String,
    /// Width of the counter register
    pub counter_width: u32,
    /// Maximum number of trigger nets
    pub max_trigger_nets: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        SynthesisConfig {
            clock: "clk".to_owned(),
            reset: "rst".to_owned(),
            counter_width: 16,
            max_trigger_nets: 3,
        }
    }
}

impl SynthesisConfig {
    /// Perform a consistency check on the parameters
    pub fn check(&self) {
        assert!(!self.clock.is_empty());
        assert!(!self.reset.is_empty());
        assert!((1..=32).contains(&self.counter_width));
        assert!(self.max_trigger_nets >= 1);
    }
}

/// Failure to synthesize a Trojan
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    /// Not enough ranked sites to pick trigger nets from
    #[error("insufficient sites: {required} trigger net(s) required, {available} available")]
    InsufficientSites {
        /// Minimum number of sites
        required: usize,
        /// Number of sites provided
        available: usize,
    },
}

/// A synthesized Trojan and its provenance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrojanDescriptor {
    /// Sequential identifier, starting at 1
    pub id: u32,
    /// Trigger kind
    #[serde(rename = "trigger_type")]
    pub trigger: TriggerKind,
    /// Payload kind
    #[serde(rename = "payload_type")]
    pub payload: PayloadKind,
    /// Trigger nets, best ranked first
    pub trigger_nets: Vec<String>,
    /// Ranking scores of the trigger nets
    pub trigger_scores: Vec<f64>,
    /// Payload net
    pub payload_net: String,
    /// Ranking score of the payload net
    pub payload_score: f64,
    /// Estimated number of added gates
    pub estimated_gates: usize,
    /// First line of the generated fragment
    pub start_marker: String,
    /// Last line of the generated fragment
    pub end_marker: String,
    /// Generated Verilog, markers included, one statement per line
    #[serde(skip)]
    pub fragment: String,
}

/// Text common to all start markers
pub const START_MARKER: &str = "// === INSERTED TROJAN START ===";

/// Text common to all end markers
pub const END_MARKER: &str = "// === INSERTED TROJAN END ===";

/// Start marker of a Trojan
pub fn start_marker(id: u32, trigger: TriggerKind, payload: PayloadKind) -> String {
    format!("{START_MARKER} id={id} trigger={trigger} payload={payload}")
}

/// End marker of a Trojan
pub fn end_marker(id: u32) -> String {
    format!("{END_MARKER} id={id}")
}

/// Reference to a net in generated Verilog
///
/// Names that are not plain identifiers, or bits of a plain identifier, are escaped.
/// Names read from an escaped identifier already carry their backslash, and only need
/// the terminating space.
pub fn net_ref(name: &str) -> String {
    if name.starts_with('\\') {
        // Bits of an escaped bus are already terminated before the index
        return if name.contains(' ') {
            name.to_owned()
        } else {
            format!("{name} ")
        };
    }
    let is_ident = |s: &str| {
        let mut chars = s.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    };
    let is_bit = |s: &str| match s.strip_suffix(']').and_then(|s| s.split_once('[')) {
        Some((base, index)) => {
            is_ident(base) && !index.is_empty() && index.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    };
    if is_ident(name) || is_bit(name) {
        name.to_owned()
    } else {
        format!("\\{name} ")
    }
}

/// Number of bits to encode values 0 to n
fn bits_for(n: usize) -> u32 {
    (usize::BITS - n.leading_zeros()).max(1)
}

/// Generator of Trojan descriptors
///
/// Identifiers are allocated atomically and only for successful syntheses, so a
/// synthesizer may be shared between threads.
#[derive(Debug)]
pub struct TrojanSynthesizer {
    config: SynthesisConfig,
    cost: TrojanCost,
    next_id: AtomicU32,
}

impl Default for TrojanSynthesizer {
    fn default() -> Self {
        TrojanSynthesizer::new(SynthesisConfig::default(), TrojanCost::default())
    }
}

impl TrojanSynthesizer {
    /// Create a synthesizer; the first Trojan gets identifier 1
    pub fn new(config: SynthesisConfig, cost: TrojanCost) -> TrojanSynthesizer {
        config.check();
        cost.check();
        TrojanSynthesizer {
            config,
            cost,
            next_id: AtomicU32::new(1),
        }
    }

    /// Generation parameters
    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Return the number of Trojans synthesized so far
    pub fn nb_synthesized(&self) -> u32 {
        self.next_id.load(Ordering::SeqCst) - 1
    }

    /// Synthesize a Trojan from ranked sites, best first
    ///
    /// The top sites (up to three) are the trigger nets; the top site is also the
    /// payload net. The jitter of the gate estimate is drawn from `rng`.
    pub fn synthesize<R: Rng + ?Sized>(
        &self,
        sites: &[Site],
        trigger: TriggerKind,
        payload: PayloadKind,
        rng: &mut R,
    ) -> Result<TrojanDescriptor, SynthesisError> {
        if sites.is_empty() {
            return Err(SynthesisError::InsufficientSites {
                required: 1,
                available: 0,
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let triggers = &sites[..sites.len().min(self.config.max_trigger_nets)];
        let payload_site = &sites[0];
        let start = start_marker(id, trigger, payload);
        let end = end_marker(id);
        let trigger_refs = triggers.iter().map(|s| net_ref(&s.net)).collect::<Vec<_>>();

        let mut lines = vec![start.clone()];
        lines.extend(self.trigger_logic(id, trigger, &trigger_refs));
        lines.extend(payload_logic(id, payload, &net_ref(&payload_site.net)));
        lines.push(end.clone());
        let fragment = lines.iter().map(|l| format!("  {l}\n")).join("");

        let estimated_gates = self.cost.estimate(trigger, payload, rng);
        info!(
            "Synthesized Trojan {} ({} trigger on {}, {} payload on {}), about {} gates",
            id,
            trigger,
            triggers.iter().map(|s| s.net.as_str()).join(", "),
            payload,
            payload_site.net,
            estimated_gates
        );
        Ok(TrojanDescriptor {
            id,
            trigger,
            payload,
            trigger_nets: triggers.iter().map(|s| s.net.clone()).collect(),
            trigger_scores: triggers.iter().map(|s| s.score).collect(),
            payload_net: payload_site.net.clone(),
            payload_score: payload_site.score,
            estimated_gates,
            start_marker: start,
            end_marker: end,
            fragment,
        })
    }

    /// Behavioural model of the trigger of a Trojan from this synthesizer
    pub fn monitor(&self, descriptor: &TrojanDescriptor) -> TriggerMonitor {
        TriggerMonitor::new(
            descriptor.trigger,
            descriptor.trigger_nets.len(),
            self.config.counter_width,
        )
    }

    fn trigger_logic(&self, id: u32, kind: TriggerKind, nets: &[String]) -> Vec<String> {
        let trigger = trigger_signal(id);
        let clock = net_ref(&self.config.clock);
        let reset = net_ref(&self.config.reset);
        let mut ret = Vec::new();
        match kind {
            TriggerKind::Combinational => {
                ret.push(format!("wire {trigger};"));
                ret.push(format!("assign {trigger} = {};", nets.iter().join(" & ")));
            }
            TriggerKind::Sequential => {
                let state = format!("trojan_state_{id}");
                let w = bits_for(nets.len());
                ret.push(format!("reg [{}:0] {state};", w - 1));
                ret.push(format!("wire {trigger};"));
                ret.push(format!("always @(posedge {clock} or posedge {reset}) begin"));
                ret.push(format!("  if ({reset})"));
                ret.push(format!("    {state} <= {w}'d0;"));
                ret.push("  else begin".to_owned());
                ret.push(format!("    case ({state})"));
                for (i, net) in nets.iter().enumerate() {
                    ret.push(format!(
                        "      {w}'d{i}: if ({net}) {state} <= {w}'d{};",
                        i + 1
                    ));
                }
                ret.push(format!("      default: {state} <= {w}'d0;"));
                ret.push("    endcase".to_owned());
                ret.push("  end".to_owned());
                ret.push("end".to_owned());
                ret.push(format!("assign {trigger} = ({state} == {w}'d{});", nets.len()));
            }
            TriggerKind::Counter => {
                let counter = format!("trojan_counter_{id}");
                let w = self.config.counter_width;
                let digits = w.div_ceil(4) as usize;
                let max = (1u64 << w) - 1;
                ret.push(format!("reg [{}:0] {counter};", w - 1));
                ret.push(format!("wire {trigger};"));
                ret.push(format!("always @(posedge {clock} or posedge {reset}) begin"));
                ret.push(format!("  if ({reset})"));
                ret.push(format!("    {counter} <= {w}'h{:0digits$X};", 0));
                ret.push(format!("  else if ({})", nets[0]));
                ret.push(format!("    {counter} <= {counter} + 1;"));
                ret.push("end".to_owned());
                ret.push(format!(
                    "assign {trigger} = ({counter} == {w}'h{max:0digits$X});"
                ));
            }
        }
        ret
    }
}

fn trigger_signal(id: u32) -> String {
    format!("trojan_trigger_{id}")
}

fn payload_logic(id: u32, kind: PayloadKind, net: &str) -> Vec<String> {
    let trigger = trigger_signal(id);
    let payload = format!("trojan_payload_{id}");
    let expr = match kind {
        PayloadKind::Leakage => format!("{trigger} ? {net} : 1'b0"),
        PayloadKind::DenialOfService => format!("{trigger} ? 1'b0 : {net}"),
        PayloadKind::Corruption => format!("{trigger} ? ~{net} : {net}"),
    };
    vec![
        format!("wire {payload};"),
        format!("assign {payload} = {expr};"),
    ]
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::{
        bits_for, net_ref, PayloadKind, SynthesisConfig, SynthesisError, TriggerKind,
        TrojanSynthesizer,
    };
    use crate::io::parse_verilog;
    use crate::rank::Site;
    use crate::trojan::cost::TrojanCost;

    fn sites(names: &[&str]) -> Vec<Site> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| Site {
                net: n.to_string(),
                score: 1.0 - 0.1 * i as f64,
            })
            .collect()
    }

    #[test]
    fn test_combinational() {
        let synth = TrojanSynthesizer::default();
        let mut rng = SmallRng::seed_from_u64(1);
        let d = synth
            .synthesize(
                &sites(&["n1", "n2", "n3", "n4"]),
                TriggerKind::Combinational,
                PayloadKind::Leakage,
                &mut rng,
            )
            .unwrap();
        assert_eq!(d.id, 1);
        assert_eq!(d.trigger_nets, vec!["n1", "n2", "n3"]);
        assert_eq!(d.trigger_scores, vec![1.0, 0.9, 0.8]);
        assert_eq!(d.payload_net, "n1");
        assert_eq!(d.payload_score, 1.0);
        assert!(d
            .fragment
            .contains("  assign trojan_trigger_1 = n1 & n2 & n3;\n"));
        assert!(d
            .fragment
            .contains("  assign trojan_payload_1 = trojan_trigger_1 ? n1 : 1'b0;\n"));
        assert!(d.fragment.starts_with(&format!("  {}\n", d.start_marker)));
        assert!(d.fragment.ends_with(&format!("  {}\n", d.end_marker)));
        assert_eq!(
            d.start_marker,
            "// === INSERTED TROJAN START === id=1 trigger=combinational payload=leakage"
        );
        assert_eq!(d.end_marker, "// === INSERTED TROJAN END === id=1");
    }

    #[test]
    fn test_payloads() {
        let synth = TrojanSynthesizer::default();
        let mut rng = SmallRng::seed_from_u64(1);
        let s = sites(&["p"]);
        let dos = synth
            .synthesize(&s, TriggerKind::Combinational, PayloadKind::DenialOfService, &mut rng)
            .unwrap();
        assert!(dos
            .fragment
            .contains("assign trojan_payload_1 = trojan_trigger_1 ? 1'b0 : p;"));
        let corruption = synth
            .synthesize(&s, TriggerKind::Combinational, PayloadKind::Corruption, &mut rng)
            .unwrap();
        assert!(corruption
            .fragment
            .contains("assign trojan_payload_2 = trojan_trigger_2 ? ~p : p;"));
        assert!(corruption.fragment.contains("assign trojan_trigger_2 = p;"));
    }

    #[test]
    fn test_sequential() {
        let synth = TrojanSynthesizer::default();
        let mut rng = SmallRng::seed_from_u64(1);
        let d = synth
            .synthesize(
                &sites(&["a", "b", "c"]),
                TriggerKind::Sequential,
                PayloadKind::Corruption,
                &mut rng,
            )
            .unwrap();
        for line in [
            "reg [1:0] trojan_state_1;",
            "always @(posedge clk or posedge rst) begin",
            "2'd0: if (a) trojan_state_1 <= 2'd1;",
            "2'd1: if (b) trojan_state_1 <= 2'd2;",
            "2'd2: if (c) trojan_state_1 <= 2'd3;",
            "default: trojan_state_1 <= 2'd0;",
            "assign trojan_trigger_1 = (trojan_state_1 == 2'd3);",
        ] {
            assert!(d.fragment.contains(line), "{line}");
        }
    }

    #[test]
    fn test_counter() {
        let synth = TrojanSynthesizer::default();
        let mut rng = SmallRng::seed_from_u64(1);
        let d = synth
            .synthesize(
                &sites(&["a", "b"]),
                TriggerKind::Counter,
                PayloadKind::Leakage,
                &mut rng,
            )
            .unwrap();
        for line in [
            "reg [15:0] trojan_counter_1;",
            "trojan_counter_1 <= 16'h0000;",
            "else if (a)",
            "trojan_counter_1 <= trojan_counter_1 + 1;",
            "assign trojan_trigger_1 = (trojan_counter_1 == 16'hFFFF);",
        ] {
            assert!(d.fragment.contains(line), "{line}");
        }
    }

    #[test]
    fn test_insufficient_sites() {
        let synth = TrojanSynthesizer::default();
        let mut rng = SmallRng::seed_from_u64(1);
        let err = synth
            .synthesize(&[], TriggerKind::Counter, PayloadKind::Leakage, &mut rng)
            .unwrap_err();
        assert_eq!(
            err,
            SynthesisError::InsufficientSites {
                required: 1,
                available: 0
            }
        );
        assert_eq!(synth.nb_synthesized(), 0);
        // The failure does not consume an identifier
        let d = synth
            .synthesize(&sites(&["a"]), TriggerKind::Counter, PayloadKind::Leakage, &mut rng)
            .unwrap();
        assert_eq!(d.id, 1);
        assert_eq!(synth.nb_synthesized(), 1);
    }

    #[test]
    fn test_reproducible() {
        let s = sites(&["a", "b", "c"]);
        let run = |seed| {
            let synth = TrojanSynthesizer::new(SynthesisConfig::default(), TrojanCost::default());
            let mut rng = SmallRng::seed_from_u64(seed);
            (0..10)
                .map(|_| {
                    synth
                        .synthesize(&s, TriggerKind::Sequential, PayloadKind::Leakage, &mut rng)
                        .unwrap()
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(7), run(7));
    }

    #[test]
    fn test_net_ref() {
        assert_eq!(net_ref("n_12"), "n_12");
        assert_eq!(net_ref("data[3]"), "data[3]");
        assert_eq!(net_ref("u0/n1"), "\\u0/n1 ");
        assert_eq!(net_ref("x[a]"), "\\x[a] ");
        assert_eq!(net_ref("\\u0/n1"), "\\u0/n1 ");
        assert_eq!(net_ref("\\bus [1]"), "\\bus [1]");
        assert_eq!(bits_for(1), 1);
        assert_eq!(bits_for(2), 2);
        assert_eq!(bits_for(3), 2);
        assert_eq!(bits_for(4), 3);
    }

    #[test]
    fn test_escaped_net() {
        let source = "module m (a, y);\n  input a;\n  output y;\n  INVX1 \\u0/i0 (.A(a), .Y(\\u0/n1 ));\n  INVX1 i1 (.A(\\u0/n1 ), .Y(y));\nendmodule\n";
        let parsed = parse_verilog(source);
        assert!(parsed.diagnostics.is_empty());
        let net = "\\u0/n1";
        assert!(parsed.top().nets.iter().any(|n| n == net));

        let synth = TrojanSynthesizer::default();
        let mut rng = SmallRng::seed_from_u64(1);
        let d = synth
            .synthesize(&sites(&[net]), TriggerKind::Combinational, PayloadKind::Leakage, &mut rng)
            .unwrap();
        assert_eq!(d.payload_net, net);
        // The reference is the declared identifier, terminated by a space
        assert!(d.fragment.contains("assign trojan_trigger_1 = \\u0/n1 ;"));
        assert!(d
            .fragment
            .contains("assign trojan_payload_1 = trojan_trigger_1 ? \\u0/n1  : 1'b0;"));
        assert!(!d.fragment.contains("\\\\"));
    }

    #[test]
    fn test_kind_names() {
        for k in TriggerKind::ALL {
            assert_eq!(TriggerKind::from_name(k.name()), Some(k));
        }
        for k in PayloadKind::ALL {
            assert_eq!(PayloadKind::from_name(k.name()), Some(k));
        }
        assert_eq!(
            serde_json::to_string(&PayloadKind::DenialOfService).unwrap(),
            "\"dos\""
        );
        assert_eq!(
            serde_json::to_string(&TriggerKind::Counter).unwrap(),
            "\"counter\""
        );
    }
}
