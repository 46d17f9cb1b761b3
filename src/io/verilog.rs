//! Reader for gate-level Verilog netlists
//!
//! Only the structural subset produced by synthesis tools is understood: module headers,
//! port and net declarations, and cell instantiations. Everything else (assignments,
//! behavioural blocks, functions...) is skipped. Parsing is tolerant: a malformed
//! statement is dropped with a [`ParseDiagnostic`] and parsing resumes at the next statement.

use std::fmt;

use fxhash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::netlist::{GateKind, PortDirection};

/// Name given to a module whose header could not be read
pub const DEFAULT_MODULE_NAME: &str = "design";

/// Verilog primitives, whose first terminal is the output
const PRIMITIVES: [&str; 8] = ["and", "nand", "or", "nor", "xor", "xnor", "not", "buf"];

/// Statements that are recognized but carry no structural information
const SKIPPED_STATEMENTS: [&str; 8] = [
    "assign",
    "parameter",
    "localparam",
    "defparam",
    "genvar",
    "integer",
    "real",
    "time",
];

/// Blocks skipped up to their closing keyword
const SKIPPED_BLOCKS: [(&str, &str); 5] = [
    ("function", "endfunction"),
    ("task", "endtask"),
    ("generate", "endgenerate"),
    ("specify", "endspecify"),
    ("primitive", "endprimitive"),
];

/// Net declaration keywords
const NET_KEYWORDS: [&str; 7] = ["wire", "reg", "tri", "wand", "wor", "supply0", "supply1"];

/// A recoverable problem found while parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDiagnostic {
    /// Line of the offending statement, starting at 1
    pub line: usize,
    /// Description of the problem
    pub message: String,
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// A single port connection of a gate instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Port identifier, or its position for positional connections
    pub port: String,
    /// Direction inferred from the port identifier
    pub direction: PortDirection,
    /// Connected net
    pub net: String,
}

/// A cell instantiation, as found in the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedGate {
    /// Cell type, as written
    pub cell: String,
    /// Instance name
    pub instance: String,
    /// Classified gate kind
    pub kind: GateKind,
    /// Connections in source order
    pub connections: Vec<Connection>,
}

impl ParsedGate {
    /// Nets read by the gate, in connection order
    pub fn inputs(&self) -> impl Iterator<Item = &str> {
        self.connections
            .iter()
            .filter(|c| c.direction == PortDirection::Input)
            .map(|c| c.net.as_str())
    }

    /// Nets driven by the gate, in connection order
    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.connections
            .iter()
            .filter(|c| c.direction == PortDirection::Output)
            .map(|c| c.net.as_str())
    }
}

/// Declarations and instantiations of a single module
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedModule {
    /// Module name
    pub name: String,
    /// Primary inputs, in declaration order
    pub inputs: Vec<String>,
    /// Primary outputs, in declaration order
    pub outputs: Vec<String>,
    /// Explicitly declared nets that are not ports
    pub wires: Vec<String>,
    /// Every net of the module: declared nets first, then nets only seen in connections
    pub nets: Vec<String>,
    /// Gate instances in source order
    pub gates: Vec<ParsedGate>,
}

impl ParsedModule {
    fn new(name: &str) -> ParsedModule {
        ParsedModule {
            name: name.to_owned(),
            ..Default::default()
        }
    }
}

/// Result of parsing a source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSource {
    /// Modules in source order; never empty
    pub modules: Vec<ParsedModule>,
    /// Statements that were skipped, and why
    pub diagnostics: Vec<ParseDiagnostic>,
}

impl ParsedSource {
    /// The top module: the first one that is not instantiated by another module, or the last one
    pub fn top(&self) -> &ParsedModule {
        let instantiated: FxHashSet<&str> = self
            .modules
            .iter()
            .flat_map(|m| m.gates.iter().map(|g| g.cell.as_str()))
            .collect();
        let i = self
            .modules
            .iter()
            .position(|m| !instantiated.contains(m.name.as_str()))
            .unwrap_or(self.modules.len() - 1);
        &self.modules[i]
    }

    /// Find a module by name
    pub fn module(&self, name: &str) -> Option<&ParsedModule> {
        self.modules.iter().find(|m| m.name == name)
    }
}

/// Replace line and block comments by spaces
///
/// Byte offsets and line breaks are preserved, so that positions in the stripped text
/// are valid in the original one. Comment markers inside string literals are ignored.
pub fn strip_comments(source: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        String,
        Line,
        Block,
    }
    let mut ret = String::with_capacity(source.len());
    let mut state = State::Code;
    let mut chars = source.chars().peekable();
    let blank = |ret: &mut String, c: char| {
        if c == '\n' {
            ret.push('\n');
        } else {
            ret.extend(std::iter::repeat(' ').take(c.len_utf8()));
        }
    };
    while let Some(c) = chars.next() {
        match state {
            State::Code => {
                if c == '/' && chars.peek() == Some(&'/') {
                    chars.next();
                    ret.push_str("  ");
                    state = State::Line;
                } else if c == '/' && chars.peek() == Some(&'*') {
                    chars.next();
                    ret.push_str("  ");
                    state = State::Block;
                } else {
                    if c == '"' {
                        state = State::String;
                    }
                    ret.push(c);
                }
            }
            State::String => {
                if c == '\\' {
                    ret.push(c);
                    if let Some(n) = chars.next() {
                        ret.push(n);
                    }
                    continue;
                }
                if c == '"' || c == '\n' {
                    state = State::Code;
                }
                ret.push(c);
            }
            State::Line => {
                if c == '\n' {
                    state = State::Code;
                }
                blank(&mut ret, c);
            }
            State::Block => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    ret.push_str("  ");
                    state = State::Code;
                } else {
                    blank(&mut ret, c);
                }
            }
        }
    }
    ret
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Number(String),
    Symbol(char),
}

#[derive(Debug, Clone)]
struct Lexed {
    token: Token,
    line: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Split comment-free text into tokens
///
/// Compiler directives, attributes and string literals are dropped.
fn tokenize(text: &str) -> Vec<Lexed> {
    let mut ret = Vec::new();
    let mut line = 1;
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c == '\n' {
            line += 1;
            chars.next();
        } else if c.is_whitespace() {
            chars.next();
        } else if c == '`' {
            // Directives take the rest of the line
            while let Some(&n) = chars.peek() {
                if n == '\n' {
                    break;
                }
                chars.next();
            }
        } else if c == '"' {
            chars.next();
            while let Some(n) = chars.next() {
                if n == '\\' {
                    chars.next();
                } else if n == '"' {
                    break;
                } else if n == '\n' {
                    line += 1;
                    break;
                }
            }
        } else if c == '\\' {
            // Escaped identifier, terminated by whitespace
            let mut s = String::new();
            while let Some(&n) = chars.peek() {
                if n.is_whitespace() {
                    break;
                }
                s.push(n);
                chars.next();
            }
            ret.push(Lexed {
                token: Token::Ident(s),
                line,
            });
        } else if is_ident_start(c) {
            let mut s = String::new();
            while let Some(&n) = chars.peek() {
                if !is_ident_char(n) {
                    break;
                }
                s.push(n);
                chars.next();
            }
            ret.push(Lexed {
                token: Token::Ident(s),
                line,
            });
        } else if c.is_ascii_digit() || c == '\'' {
            let mut s = String::new();
            while let Some(&n) = chars.peek() {
                if !(n.is_ascii_digit() || n == '_') {
                    break;
                }
                s.push(n);
                chars.next();
            }
            if chars.peek() == Some(&'\'') {
                s.push('\'');
                chars.next();
                while let Some(&n) = chars.peek() {
                    if !(n.is_ascii_alphanumeric() || n == '_' || n == '?') {
                        break;
                    }
                    s.push(n);
                    chars.next();
                }
            }
            ret.push(Lexed {
                token: Token::Number(s),
                line,
            });
        } else {
            chars.next();
            if c == '(' && chars.peek() == Some(&'*') {
                // Attribute instance (* ... *), but not the @(*) event control
                let mut lookahead = chars.clone();
                lookahead.next();
                if lookahead.peek() != Some(&')') {
                    chars.next();
                    let mut prev = ' ';
                    for n in chars.by_ref() {
                        if n == '\n' {
                            line += 1;
                        }
                        if prev == '*' && n == ')' {
                            break;
                        }
                        prev = n;
                    }
                    continue;
                }
            }
            ret.push(Lexed {
                token: Token::Symbol(c),
                line,
            });
        }
    }
    ret
}

/// Per-module parsing state
struct ModuleBuilder {
    module: ParsedModule,
    known: FxHashSet<String>,
    declared: FxHashMap<String, &'static str>,
    buses: FxHashMap<String, Vec<String>>,
    instances: FxHashSet<String>,
}

impl ModuleBuilder {
    fn new(name: &str) -> ModuleBuilder {
        ModuleBuilder {
            module: ParsedModule::new(name),
            known: FxHashSet::default(),
            declared: FxHashMap::default(),
            buses: FxHashMap::default(),
            instances: FxHashSet::default(),
        }
    }

    /// Record a net if it is not known yet
    fn add_net(&mut self, name: &str) {
        if self.known.insert(name.to_owned()) {
            self.module.nets.push(name.to_owned());
        }
    }

    /// Declare a net or bus with an optional numeric range
    fn declare(&mut self, keyword: &str, name: &str, range: Option<(i64, i64)>) {
        let bits = match range {
            Some((msb, lsb)) => {
                let indices: Vec<i64> = if msb >= lsb {
                    (lsb..=msb).rev().collect()
                } else {
                    (msb..=lsb).collect()
                };
                let bits: Vec<String> = indices.iter().map(|i| bit_name(name, *i)).collect();
                self.buses.insert(name.to_owned(), bits.clone());
                bits
            }
            None => vec![name.to_owned()],
        };
        let kind = match keyword {
            "input" => "input",
            "output" => "output",
            _ => "wire",
        };
        for bit in bits {
            // Ports may be redeclared as wires or regs; keep the first role
            if let Some(previous) = self.declared.get(&bit) {
                if *previous != "wire" || kind == "wire" {
                    continue;
                }
                self.module.wires.retain(|w| *w != bit);
            }
            self.declared.insert(bit.clone(), kind);
            match kind {
                "input" => self.module.inputs.push(bit.clone()),
                "output" => self.module.outputs.push(bit.clone()),
                _ => self.module.wires.push(bit.clone()),
            }
            self.add_net(&bit);
        }
    }

    /// Resolve a reference to a whole net or bus into its bits
    fn resolve(&self, name: &str) -> Vec<String> {
        match self.buses.get(name) {
            Some(bits) => bits.clone(),
            None => vec![name.to_owned()],
        }
    }

    fn finish(self) -> ParsedModule {
        self.module
    }
}

struct Parser {
    tokens: Vec<Lexed>,
    pos: usize,
    diagnostics: Vec<ParseDiagnostic>,
}

type ParseResult<T> = Result<T, String>;

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|t| &t.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or(self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|t| t.token.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn at_symbol(&self, c: char) -> bool {
        self.peek() == Some(&Token::Symbol(c))
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == kw)
    }

    fn eat_symbol(&mut self, c: char) -> bool {
        if self.at_symbol(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, c: char) -> ParseResult<()> {
        if self.eat_symbol(c) {
            Ok(())
        } else {
            Err(format!("expected '{}', found {}", c, self.describe()))
        }
    }

    fn expect_ident(&mut self) -> ParseResult<String> {
        match self.peek() {
            Some(Token::Ident(s)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => Err(format!("expected an identifier, found {}", self.describe())),
        }
    }

    fn describe(&self) -> String {
        match self.peek() {
            None => "end of file".to_owned(),
            Some(Token::Ident(s)) => format!("'{s}'"),
            Some(Token::Number(s)) => format!("'{s}'"),
            Some(Token::Symbol(c)) => format!("'{c}'"),
        }
    }

    fn diagnostic(&mut self, line: usize, message: String) {
        warn!("Skipping statement at line {}: {}", line, message);
        self.diagnostics.push(ParseDiagnostic { line, message });
    }

    /// Skip to the end of the current statement, stopping before `endmodule`
    fn recover(&mut self) {
        while let Some(t) = self.peek() {
            match t {
                Token::Symbol(';') => {
                    self.pos += 1;
                    return;
                }
                Token::Ident(s) if s == "endmodule" => return,
                _ => self.pos += 1,
            }
        }
    }

    /// Skip a parenthesized group, the opening parenthesis being the current token
    fn skip_balanced(&mut self, open: char, close: char) -> ParseResult<()> {
        self.expect_symbol(open)?;
        let mut depth = 1;
        while depth > 0 {
            match self.bump() {
                None => return Err(format!("unbalanced '{open}'")),
                Some(Token::Symbol(c)) if c == open => depth += 1,
                Some(Token::Symbol(c)) if c == close => depth -= 1,
                Some(Token::Symbol(';')) if open == '(' => {
                    return Err(format!("unbalanced '{open}'"));
                }
                _ => (),
            }
        }
        Ok(())
    }

    /// Skip a parameter override or delay: `#(...)` or `#value`
    fn skip_hash(&mut self) -> ParseResult<()> {
        if self.eat_symbol('#') {
            if self.at_symbol('(') {
                self.skip_balanced('(', ')')?;
            } else {
                self.bump();
            }
        }
        Ok(())
    }

    fn parse(mut self) -> ParsedSource {
        let mut modules = Vec::new();
        while let Some(t) = self.peek() {
            match t {
                Token::Ident(s) if s == "module" || s == "macromodule" => {
                    self.pos += 1;
                    modules.push(self.parse_module());
                }
                _ => self.pos += 1,
            }
        }
        if modules.is_empty() {
            self.diagnostic(1, "no module found".to_owned());
            modules.push(ParsedModule::new(DEFAULT_MODULE_NAME));
        }
        ParsedSource {
            modules,
            diagnostics: self.diagnostics,
        }
    }

    /// Skip everything up to and including the next `endmodule`
    fn skip_module(&mut self) {
        while let Some(t) = self.bump() {
            if t == Token::Ident("endmodule".to_owned()) {
                return;
            }
        }
    }

    fn parse_module(&mut self) -> ParsedModule {
        let line = self.line();
        let name = match self.expect_ident() {
            Ok(name) => name,
            Err(e) => {
                self.diagnostic(line, format!("invalid module header: {e}"));
                self.skip_module();
                return ParsedModule::new(DEFAULT_MODULE_NAME);
            }
        };
        let mut builder = ModuleBuilder::new(&name);
        if let Err(e) = self.parse_module_header(&mut builder) {
            self.diagnostic(line, format!("invalid header for module {name}: {e}"));
            self.skip_module();
            return ParsedModule::new(&name);
        }
        loop {
            match self.peek() {
                None => {
                    let line = self.line();
                    self.diagnostic(line, format!("module {name} is not terminated"));
                    break;
                }
                Some(Token::Ident(s)) if s == "endmodule" => {
                    self.pos += 1;
                    break;
                }
                _ => {
                    let line = self.line();
                    if let Err(e) = self.parse_item(&mut builder) {
                        self.diagnostic(line, e);
                        self.recover();
                    }
                }
            }
        }
        let module = builder.finish();
        debug!(
            "Parsed module {}: {} inputs, {} outputs, {} nets, {} gates",
            module.name,
            module.inputs.len(),
            module.outputs.len(),
            module.nets.len(),
            module.gates.len()
        );
        module
    }

    fn parse_module_header(&mut self, builder: &mut ModuleBuilder) -> ParseResult<()> {
        self.skip_hash()?;
        if self.at_symbol('(') {
            self.pos += 1;
            let ansi = matches!(self.peek(), Some(Token::Ident(s)) if is_direction(s));
            if ansi {
                self.parse_ansi_ports(builder)?;
            } else {
                self.skip_balanced_rest()?;
            }
        }
        self.expect_symbol(';')
    }

    /// Skip to the closing parenthesis of a group whose opening parenthesis is consumed
    fn skip_balanced_rest(&mut self) -> ParseResult<()> {
        let mut depth = 1;
        while depth > 0 {
            match self.bump() {
                None | Some(Token::Symbol(';')) => return Err("unbalanced '('".to_owned()),
                Some(Token::Symbol('(')) => depth += 1,
                Some(Token::Symbol(')')) => depth -= 1,
                _ => (),
            }
        }
        Ok(())
    }

    /// ANSI-style port list: `input a, b, output [1:0] y)`
    fn parse_ansi_ports(&mut self, builder: &mut ModuleBuilder) -> ParseResult<()> {
        let mut direction = String::new();
        let mut range = None;
        loop {
            if let Some(Token::Ident(s)) = self.peek() {
                if is_direction(s) {
                    direction = s.clone();
                    self.pos += 1;
                    range = self.parse_declaration_prefix()?;
                }
            }
            let name = self.expect_ident()?;
            self.skip_unpacked()?;
            builder.declare(&direction, &name, range);
            if self.eat_symbol(')') {
                return Ok(());
            }
            self.expect_symbol(',')?;
        }
    }

    /// Net type, signedness and packed range after a direction or net keyword
    fn parse_declaration_prefix(&mut self) -> ParseResult<Option<(i64, i64)>> {
        while let Some(Token::Ident(s)) = self.peek() {
            if NET_KEYWORDS.contains(&s.as_str()) || s == "signed" || s == "logic" {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.at_symbol('[') {
            self.parse_range()
        } else {
            Ok(None)
        }
    }

    /// Parse `[msb:lsb]`; only numeric ranges are returned
    fn parse_range(&mut self) -> ParseResult<Option<(i64, i64)>> {
        self.expect_symbol('[')?;
        let mut parts = vec![Vec::new()];
        loop {
            match self.bump() {
                None | Some(Token::Symbol(';')) => return Err("unbalanced '['".to_owned()),
                Some(Token::Symbol(']')) => break,
                Some(Token::Symbol(':')) => parts.push(Vec::new()),
                Some(t) => parts.last_mut().unwrap().push(t),
            }
        }
        let as_number = |toks: &Vec<Token>| -> Option<i64> {
            match toks.as_slice() {
                [Token::Number(n)] => n.replace('_', "").parse().ok(),
                _ => None,
            }
        };
        if parts.len() == 2 {
            if let (Some(msb), Some(lsb)) = (as_number(&parts[0]), as_number(&parts[1])) {
                return Ok(Some((msb, lsb)));
            }
        }
        Ok(None)
    }

    /// Skip unpacked dimensions after a declared name
    fn skip_unpacked(&mut self) -> ParseResult<()> {
        while self.at_symbol('[') {
            self.skip_balanced('[', ']')?;
        }
        Ok(())
    }

    fn parse_item(&mut self, builder: &mut ModuleBuilder) -> ParseResult<()> {
        let keyword = match self.peek() {
            Some(Token::Ident(s)) => s.clone(),
            Some(Token::Symbol(';')) => {
                self.pos += 1;
                return Ok(());
            }
            _ => return Err(format!("unexpected {}", self.describe())),
        };
        if is_direction(&keyword) || NET_KEYWORDS.contains(&keyword.as_str()) {
            self.pos += 1;
            return self.parse_declaration(builder, &keyword);
        }
        if SKIPPED_STATEMENTS.contains(&keyword.as_str()) {
            self.recover();
            return Ok(());
        }
        if keyword == "always" || keyword == "initial" {
            self.pos += 1;
            self.skip_behavioural();
            return Ok(());
        }
        if let Some((_, end)) = SKIPPED_BLOCKS.iter().find(|(kw, _)| *kw == keyword) {
            while let Some(t) = self.bump() {
                if t == Token::Ident(end.to_string()) {
                    return Ok(());
                }
            }
            return Err(format!("{keyword} block is not terminated"));
        }
        self.parse_instantiation(builder)
    }

    fn parse_declaration(&mut self, builder: &mut ModuleBuilder, keyword: &str) -> ParseResult<()> {
        let range = self.parse_declaration_prefix()?;
        let kind = if is_direction(keyword) && keyword != "inout" {
            keyword
        } else {
            "wire"
        };
        loop {
            let name = self.expect_ident()?;
            self.skip_unpacked()?;
            builder.declare(kind, &name, range);
            if self.eat_symbol('=') {
                self.skip_expression();
            }
            if self.eat_symbol(';') {
                return Ok(());
            }
            self.expect_symbol(',')?;
        }
    }

    /// Skip an initializer, up to the next top-level ',' or ';'
    fn skip_expression(&mut self) {
        let mut depth = 0i32;
        while let Some(t) = self.peek() {
            match t {
                Token::Symbol('(') | Token::Symbol('{') | Token::Symbol('[') => depth += 1,
                Token::Symbol(')') | Token::Symbol('}') | Token::Symbol(']') => depth -= 1,
                Token::Symbol(',') | Token::Symbol(';') if depth <= 0 => return,
                _ => (),
            }
            self.pos += 1;
        }
    }

    /// Skip the statement of an always or initial block
    fn skip_behavioural(&mut self) {
        let mut depth = 0;
        while let Some(t) = self.bump() {
            match t {
                Token::Ident(s) => match s.as_str() {
                    "begin" | "case" | "casez" | "casex" | "fork" => depth += 1,
                    "end" | "endcase" | "join" => {
                        depth -= 1;
                        if depth <= 0 && !self.at_keyword("else") {
                            return;
                        }
                    }
                    "endmodule" => {
                        self.pos -= 1;
                        return;
                    }
                    _ => (),
                },
                Token::Symbol(';') if depth <= 0 => {
                    if !self.at_keyword("else") {
                        return;
                    }
                }
                _ => (),
            }
        }
    }

    /// Cell instantiation, possibly with several instances: `CELL #(..) a (..), b (..);`
    fn parse_instantiation(&mut self, builder: &mut ModuleBuilder) -> ParseResult<()> {
        let cell = self.expect_ident()?;
        self.skip_hash()?;
        let is_primitive = PRIMITIVES.contains(&cell.as_str());
        let mut gates = Vec::new();
        loop {
            let instance = if self.at_symbol('(') && is_primitive {
                format!("{}_{}", cell, builder.module.gates.len() + gates.len())
            } else {
                self.expect_ident()?
            };
            self.skip_unpacked()?;
            self.expect_symbol('(')?;
            let connections = self.parse_connections(builder, is_primitive)?;
            gates.push(ParsedGate {
                kind: GateKind::classify(&cell),
                cell: cell.clone(),
                instance,
                connections,
            });
            if self.eat_symbol(';') {
                break;
            }
            self.expect_symbol(',')?;
        }
        for gate in gates {
            if !builder.instances.insert(gate.instance.clone()) {
                let line = self.line();
                self.diagnostic(line, format!("duplicate instance {}", gate.instance));
                continue;
            }
            for c in &gate.connections {
                builder.add_net(&c.net);
            }
            builder.module.gates.push(gate);
        }
        Ok(())
    }

    /// Connection list, the opening parenthesis being consumed
    fn parse_connections(
        &mut self,
        builder: &ModuleBuilder,
        is_primitive: bool,
    ) -> ParseResult<Vec<Connection>> {
        let mut ret = Vec::new();
        if self.eat_symbol(')') {
            return Ok(ret);
        }
        let mut position = 0;
        loop {
            if self.eat_symbol('.') {
                let port = self.expect_ident()?;
                self.expect_symbol('(')?;
                let direction = PortDirection::from_port_name(&port);
                if !self.at_symbol(')') {
                    for net in self.parse_net_expression(builder)? {
                        ret.push(Connection {
                            port: port.clone(),
                            direction,
                            net,
                        });
                    }
                }
                self.expect_symbol(')')?;
            } else if is_primitive {
                let direction = if position == 0 {
                    PortDirection::Output
                } else {
                    PortDirection::Input
                };
                for net in self.parse_net_expression(builder)? {
                    ret.push(Connection {
                        port: position.to_string(),
                        direction,
                        net,
                    });
                }
            } else {
                return Err("positional connections are only supported on primitives".to_owned());
            }
            position += 1;
            if self.eat_symbol(')') {
                return Ok(ret);
            }
            self.expect_symbol(',')?;
        }
    }

    /// Nets referenced by a connection: a net, a bit or part select, a concatenation or a constant
    fn parse_net_expression(&mut self, builder: &ModuleBuilder) -> ParseResult<Vec<String>> {
        match self.peek() {
            Some(Token::Number(_)) => {
                self.pos += 1;
                Ok(Vec::new())
            }
            Some(Token::Symbol('{')) => {
                self.pos += 1;
                let mut ret = Vec::new();
                loop {
                    ret.extend(self.parse_net_expression(builder)?);
                    if self.eat_symbol('}') {
                        return Ok(ret);
                    }
                    self.expect_symbol(',')?;
                }
            }
            Some(Token::Ident(_)) => {
                let name = self.expect_ident()?;
                if !self.at_symbol('[') {
                    return Ok(builder.resolve(&name));
                }
                self.pos += 1;
                let first = self.expect_number()?;
                if self.eat_symbol(':') {
                    let second = self.expect_number()?;
                    self.expect_symbol(']')?;
                    let indices: Vec<i64> = if first >= second {
                        (second..=first).rev().collect()
                    } else {
                        (first..=second).collect()
                    };
                    Ok(indices.iter().map(|i| bit_name(&name, *i)).collect())
                } else {
                    self.expect_symbol(']')?;
                    Ok(vec![bit_name(&name, first)])
                }
            }
            _ => Err(format!("invalid connection {}", self.describe())),
        }
    }

    fn expect_number(&mut self) -> ParseResult<i64> {
        match self.peek() {
            Some(Token::Number(n)) => {
                let v = n
                    .replace('_', "")
                    .parse()
                    .map_err(|_| format!("invalid index {n}"))?;
                self.pos += 1;
                Ok(v)
            }
            _ => Err(format!("expected an index, found {}", self.describe())),
        }
    }
}

/// Name of a bit of a bus
///
/// Escaped identifiers keep their terminating space before the index.
fn bit_name(name: &str, index: i64) -> String {
    if name.starts_with('\\') {
        format!("{name} [{index}]")
    } else {
        format!("{name}[{index}]")
    }
}

fn is_direction(s: &str) -> bool {
    matches!(s, "input" | "output" | "inout")
}

/// Parse a gate-level Verilog source
///
/// ```
/// # use trowel::io::parse_verilog;
/// let source = "
///     module top(a, b, y);
///       input a, b;
///       output y;
///       wire n1;
///       NAND2X1 g0 (.A(a), .B(b), .Y(n1));
///       INVX1 g1 (.A(n1), .Y(y));
///     endmodule
/// ";
/// let parsed = parse_verilog(source);
/// let top = parsed.top();
/// assert_eq!(top.name, "top");
/// assert_eq!(top.gates.len(), 2);
/// assert!(parsed.diagnostics.is_empty());
/// ```
pub fn parse_verilog(source: &str) -> ParsedSource {
    let stripped = strip_comments(source);
    let parser = Parser {
        tokens: tokenize(&stripped),
        pos: 0,
        diagnostics: Vec::new(),
    };
    parser.parse()
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b == b'\\'
}

/// Byte offsets of a keyword appearing as a whole word in comment-free text
fn keyword_positions<'a>(text: &'a str, keyword: &'a str) -> impl Iterator<Item = usize> + 'a {
    let bytes = text.as_bytes();
    text.match_indices(keyword).map(|(pos, _)| pos).filter(move |&pos| {
        let end = pos + keyword.len();
        (pos == 0 || !is_word_byte(bytes[pos - 1])) && (end == bytes.len() || !is_word_byte(bytes[end]))
    })
}

/// Name declared right after a module keyword
fn module_name_at(text: &str) -> &str {
    let text = text.trim_start();
    let end = if text.starts_with('\\') {
        text.find(char::is_whitespace).unwrap_or(text.len())
    } else {
        text.find(|c: char| !is_ident_char(c)).unwrap_or(text.len())
    };
    &text[..end]
}

/// Find the byte offset of the first `endmodule` keyword outside comments
pub fn find_module_end(source: &str) -> Option<usize> {
    let stripped = strip_comments(source);
    let pos = keyword_positions(&stripped, "endmodule").next();
    pos
}

/// Find the byte offset of the `endmodule` keyword closing the module with the given name
pub fn find_named_module_end(source: &str, name: &str) -> Option<usize> {
    let stripped = strip_comments(source);
    let mut header = None;
    for keyword in ["module", "macromodule"] {
        for pos in keyword_positions(&stripped, keyword) {
            let after = pos + keyword.len();
            if module_name_at(&stripped[after..]) == name {
                header = Some(header.map_or(after, |h: usize| h.min(after)));
                break;
            }
        }
    }
    let header = header?;
    let end = keyword_positions(&stripped[header..], "endmodule").next()?;
    Some(header + end)
}

#[cfg(test)]
mod tests {
    use super::{
        find_module_end, find_named_module_end, parse_verilog, strip_comments,
        DEFAULT_MODULE_NAME,
    };
    use crate::netlist::{GateKind, PortDirection};

    #[test]
    fn test_strip_comments() {
        let s = "a // line\nb /* block\n */ c \"//x\"";
        let t = strip_comments(s);
        assert_eq!(t.len(), s.len());
        assert_eq!(t.lines().count(), s.lines().count());
        assert!(!t.contains("line"));
        assert!(!t.contains("block"));
        assert!(t.contains('c'));
        assert!(t.contains("\"//x\""));
    }

    #[test]
    fn test_basic_module() {
        let source = "
// Generated netlist
module c17 (N1, N2, N3, N22);
  input N1, N2, N3;
  output N22;
  wire n1, n2; /* internal
                  nets */
  NAND2X1 g1 (.A(N1), .B(N2), .Y(n1));
  NAND2X1 g2 (.A(n1), .B(N3), .Y(n2));
  INVX1 g3 (.A(n2), .Y(N22));
endmodule
";
        let parsed = parse_verilog(source);
        assert!(parsed.diagnostics.is_empty());
        let m = parsed.top();
        assert_eq!(m.name, "c17");
        assert_eq!(m.inputs, vec!["N1", "N2", "N3"]);
        assert_eq!(m.outputs, vec!["N22"]);
        assert_eq!(m.wires, vec!["n1", "n2"]);
        assert_eq!(m.nets.len(), 6);
        assert_eq!(m.gates.len(), 3);
        assert_eq!(m.gates[0].kind, GateKind::Nand);
        assert_eq!(m.gates[0].inputs().collect::<Vec<_>>(), vec!["N1", "N2"]);
        assert_eq!(m.gates[0].outputs().collect::<Vec<_>>(), vec!["n1"]);
        assert_eq!(m.gates[2].kind, GateKind::Not);
    }

    #[test]
    fn test_auto_declaration() {
        let source = "
module m (a, y);
  input a;
  output y;
  BUFX2 b0 (.A(a), .Y(hidden));
  BUFX2 b1 (.A(hidden), .Y(y));
endmodule
";
        let parsed = parse_verilog(source);
        let m = parsed.top();
        assert!(m.nets.contains(&"hidden".to_owned()));
        assert!(!m.wires.contains(&"hidden".to_owned()));
        assert_eq!(m.nets.len(), 3);
    }

    #[test]
    fn test_malformed_statement_is_skipped() {
        let source = "
module m (a, b, y);
  input a, b;
  output y;
  AND2X1 g0 (.A(a), .B(b), .Y(n0);
  OR2X1 g1 (.A(a), .B(b), .Y(n1));
  DFFX1 g2 (.D(n1), .CLK(a) .Q(y));
  XOR2X1 g3 (.A(n1), .B(b), .Y(y));
endmodule
";
        let parsed = parse_verilog(source);
        assert_eq!(parsed.diagnostics.len(), 2);
        assert_eq!(parsed.diagnostics[0].line, 5);
        assert_eq!(parsed.diagnostics[1].line, 7);
        let m = parsed.top();
        let names: Vec<_> = m.gates.iter().map(|g| g.instance.as_str()).collect();
        assert_eq!(names, vec!["g1", "g3"]);
        assert!(!m.nets.contains(&"n0".to_owned()));
    }

    #[test]
    fn test_unparsable_header() {
        let parsed = parse_verilog("module top (a, b; input a; AND2 g (.A(a), .Y(b)); endmodule");
        assert_eq!(parsed.modules.len(), 1);
        assert_eq!(parsed.top().name, "top");
        assert!(parsed.top().gates.is_empty());
        assert_eq!(parsed.diagnostics.len(), 1);

        let parsed = parse_verilog("module ; endmodule");
        assert_eq!(parsed.top().name, DEFAULT_MODULE_NAME);
        assert!(parsed.top().nets.is_empty());

        let parsed = parse_verilog("");
        assert_eq!(parsed.modules.len(), 1);
        assert_eq!(parsed.top().name, DEFAULT_MODULE_NAME);
        assert_eq!(parsed.diagnostics.len(), 1);
    }

    #[test]
    fn test_ansi_header_and_buses() {
        let source = "
module top (input clk, input [1:0] d, output wire [1:0] q);
  wire [1:0] n;
  INVX1 i0 (.A(d[0]), .Y(n[0]));
  INVX1 i1 (.A(d[1]), .Y(n[1]));
  DFFX1 r0 (.D(n[0]), .CLK(clk), .Q(q[0]));
  DFFX1 r1 (.D(n[1]), .CLK(clk), .Q(q[1]));
endmodule
";
        let parsed = parse_verilog(source);
        assert!(parsed.diagnostics.is_empty());
        let m = parsed.top();
        assert_eq!(m.inputs, vec!["clk", "d[1]", "d[0]"]);
        assert_eq!(m.outputs, vec!["q[1]", "q[0]"]);
        assert_eq!(m.wires, vec!["n[1]", "n[0]"]);
        assert_eq!(m.nets.len(), 7);
        assert_eq!(m.gates[2].kind, GateKind::FlipFlop);
    }

    #[test]
    fn test_bus_connections() {
        let source = "
module top (a, y);
  input [1:0] a;
  output y;
  AND2X1 g (.A(a), .Y(y));
  OR2X1 h (.A({a[0], 1'b1}), .B(), .Y(z));
endmodule
";
        let parsed = parse_verilog(source);
        assert!(parsed.diagnostics.is_empty());
        let m = parsed.top();
        assert_eq!(m.gates[0].inputs().collect::<Vec<_>>(), vec!["a[1]", "a[0]"]);
        assert_eq!(m.gates[1].inputs().collect::<Vec<_>>(), vec!["a[0]"]);
        assert_eq!(m.gates[1].outputs().collect::<Vec<_>>(), vec!["z"]);
    }

    #[test]
    fn test_escaped_identifiers() {
        let source = "
module top (\\bus , y);
  input [1:0] \\bus ;
  output y;
  AND2X1 \\u0/g (.A(\\bus [1]), .B(\\bus [0]), .Y(\\u0/n ));
  INVX1 i (.A(\\u0/n ), .Y(y));
endmodule
";
        let parsed = parse_verilog(source);
        assert!(parsed.diagnostics.is_empty());
        let m = parsed.top();
        assert_eq!(m.inputs, vec!["\\bus [1]", "\\bus [0]"]);
        assert_eq!(m.gates[0].instance, "\\u0/g");
        assert_eq!(
            m.gates[0].inputs().collect::<Vec<_>>(),
            vec!["\\bus [1]", "\\bus [0]"]
        );
        assert_eq!(m.gates[1].inputs().collect::<Vec<_>>(), vec!["\\u0/n"]);
    }

    #[test]
    fn test_primitives() {
        let source = "
module top (a, b, y);
  input a, b;
  output y;
  wire w;
  nand #1 (w, a, b);
  not n0 (y, w);
  AND2X1 bad (y, a, b);
endmodule
";
        let parsed = parse_verilog(source);
        assert_eq!(parsed.diagnostics.len(), 1);
        let m = parsed.top();
        assert_eq!(m.gates.len(), 2);
        assert_eq!(m.gates[0].kind, GateKind::Nand);
        assert_eq!(m.gates[0].connections[0].direction, PortDirection::Output);
        assert_eq!(m.gates[0].outputs().collect::<Vec<_>>(), vec!["w"]);
        assert_eq!(m.gates[0].inputs().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(m.gates[1].instance, "n0");
    }

    #[test]
    fn test_skipped_constructs() {
        let source = "
`timescale 1ns/1ps
module top (clk, a, y);
  input clk, a;
  output y;
  parameter W = 4;
  reg r;
  assign y = r;
  always @(posedge clk) begin
    if (a) r <= 1'b1;
    else r <= 1'b0;
  end
  (* keep *) BUFX1 b (.A(a), .Y(t));
endmodule
";
        let parsed = parse_verilog(source);
        assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
        let m = parsed.top();
        assert_eq!(m.gates.len(), 1);
        assert_eq!(m.wires, vec!["r"]);
    }

    #[test]
    fn test_top_module() {
        let source = "
module top (a, y);
  input a; output y;
  leaf u0 (.A(a), .Y(y));
endmodule
module leaf (A, Y);
  input A; output Y;
  INVX1 i (.A(A), .Y(Y));
endmodule
";
        let parsed = parse_verilog(source);
        assert_eq!(parsed.modules.len(), 2);
        assert_eq!(parsed.top().name, "top");
        assert!(parsed.module("leaf").is_some());
        assert_eq!(parsed.module("top").unwrap().gates[0].kind, GateKind::Unknown);
    }

    #[test]
    fn test_find_named_module_end() {
        let source = "module leaf (a);\n  input a;\nendmodule\n// module top\nmodule top (b);\n  leaf u (.a(b));\nendmodule\n";
        let pos = find_named_module_end(source, "top").unwrap();
        assert_eq!(pos, source.rfind("endmodule").unwrap());
        let pos = find_named_module_end(source, "leaf").unwrap();
        assert_eq!(pos, source.find("endmodule").unwrap());
        assert_eq!(find_named_module_end(source, "le"), None);
        assert_eq!(find_named_module_end("module m (a);", "m"), None);
    }

    #[test]
    fn test_find_module_end() {
        let source = "module m; // endmodule here is a comment\n  wire endmodule_x;\nendmodule\n";
        let pos = find_module_end(source).unwrap();
        assert_eq!(&source[pos..], "endmodule\n");
        assert_eq!(find_module_end("module m;"), None);
    }
}
