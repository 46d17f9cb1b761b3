//! Read netlists from files

mod verilog;

use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use tracing::{info, warn};

pub use verilog::{
    find_module_end, find_named_module_end, parse_verilog, strip_comments, Connection,
    ParseDiagnostic, ParsedGate, ParsedModule, ParsedSource, DEFAULT_MODULE_NAME,
};

/// Read a source file as text
pub fn read_source_file(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Parse a netlist from a source text
///
/// Diagnostics are logged; they are kept in the result as well.
pub fn parse_netlist_text(text: &str, origin: &str) -> ParsedSource {
    let parsed = parse_verilog(text);
    for d in &parsed.diagnostics {
        warn!("{}: {}", origin, d);
    }
    let top = parsed.top();
    info!(
        "Parsed {}: {} modules, top module {} with {} gates",
        origin,
        parsed.modules.len(),
        top.name,
        top.gates.len()
    );
    parsed
}

/// Read a netlist from a file
///
/// Following extensions are supported: .v, .vg, .sv
pub fn read_netlist_file(path: &Path) -> anyhow::Result<(String, ParsedSource)> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("v") | Some("vg") | Some("sv") => (),
        Some(ext) => bail!("Unknown extension {} for {}", ext, path.display()),
        None => bail!("No extension given for {}", path.display()),
    }
    let text = read_source_file(path)?;
    let parsed = parse_netlist_text(&text, &path.display().to_string());
    Ok((text, parsed))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{parse_netlist_text, read_netlist_file};

    #[test]
    fn test_unknown_extension() {
        let err = read_netlist_file(Path::new("design.bench")).unwrap_err();
        assert!(err.to_string().contains("Unknown extension"));
        assert!(read_netlist_file(Path::new("design")).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = read_netlist_file(Path::new("/nonexistent/design.v")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }

    #[test]
    fn test_parse_text() {
        let parsed = parse_netlist_text("module m (a); input a; endmodule", "inline");
        assert_eq!(parsed.top().name, "m");
        assert!(parsed.diagnostics.is_empty());
    }
}
