//! Splice generated fragments into netlist source text

use std::fmt;

use tracing::{info, warn};

use crate::io::{find_module_end, find_named_module_end};

/// Insert text at a byte offset
///
/// ```
/// # use trowel::trojan::splice;
/// assert_eq!(splice("ac", 1, "b"), "abc");
/// ```
pub fn splice(source: &str, offset: usize, fragment: &str) -> String {
    let mut ret = String::with_capacity(source.len() + fragment.len());
    ret.push_str(&source[..offset]);
    ret.push_str(fragment);
    ret.push_str(&source[offset..]);
    ret
}

/// Problem met while weaving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeaveDiagnostic {
    /// No `endmodule` was found; the fragment was appended and the module is left open
    MissingModuleEnd,
}

impl fmt::Display for WeaveDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeaveDiagnostic::MissingModuleEnd => {
                write!(f, "no endmodule found, fragment appended at the end of the text")
            }
        }
    }
}

/// Result of weaving a fragment into a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Weave {
    /// Modified source
    pub text: String,
    /// Byte offset of the inserted region
    pub offset: usize,
    /// Length of the inserted region in bytes
    pub len: usize,
    /// Number of lines added
    pub lines_added: usize,
    /// Set if the insertion point could not be found
    pub diagnostic: Option<WeaveDiagnostic>,
}

impl Weave {
    /// Return whether the fragment went inside a module
    pub fn is_complete(&self) -> bool {
        self.diagnostic.is_none()
    }

    /// The inserted region
    pub fn inserted(&self) -> &str {
        &self.text[self.offset..self.offset + self.len]
    }
}

/// Insert a fragment just before the first `endmodule` of the source
///
/// The fragment should be made of complete lines. If `endmodule` starts its line, the
/// fragment goes at the start of that line; otherwise a line break is added before it.
/// Without `endmodule`, the fragment is appended and a diagnostic is returned.
/// Bytes outside the inserted region are never modified.
pub fn weave(source: &str, fragment: &str) -> Weave {
    weave_at(source, find_module_end(source), fragment)
}

/// Insert a fragment just before the `endmodule` of the named module
///
/// Other modules of the source are left untouched. Placement follows [`weave`]; if the
/// module or its `endmodule` is not found, the fragment is appended with a diagnostic.
pub fn weave_into(source: &str, module: &str, fragment: &str) -> Weave {
    weave_at(source, find_named_module_end(source, module), fragment)
}

fn weave_at(source: &str, anchor: Option<usize>, fragment: &str) -> Weave {
    let (offset, region, diagnostic) = match anchor {
        Some(pos) => {
            let line_start = source[..pos].rfind('\n').map_or(0, |p| p + 1);
            if source[line_start..pos].trim().is_empty() {
                (line_start, fragment.to_owned(), None)
            } else {
                (pos, format!("\n{fragment}"), None)
            }
        }
        None => {
            warn!("{}", WeaveDiagnostic::MissingModuleEnd);
            let region = if source.is_empty() || source.ends_with('\n') {
                fragment.to_owned()
            } else {
                format!("\n{fragment}")
            };
            (source.len(), region, Some(WeaveDiagnostic::MissingModuleEnd))
        }
    };
    let lines_added = region.matches('\n').count();
    info!("Woven {} lines at byte {}", lines_added, offset);
    Weave {
        text: splice(source, offset, &region),
        offset,
        len: region.len(),
        lines_added,
        diagnostic,
    }
}
