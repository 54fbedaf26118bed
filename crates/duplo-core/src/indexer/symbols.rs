//! Symbol extraction from source code.
//!
//! Sources with a tree-sitter grammar go through [`syntax`](super::syntax);
//! everything else (Rust, and sources the parser gives up on) falls back to
//! regex-based line scanning. Either way each symbol records the element's
//! body (used as the similarity document), a cyclomatic-complexity estimate,
//! the enclosing scope for methods, declared bases for classes, and import
//! sources. Type names used in parameter and return annotations are added as
//! annotation references. Origin fields are left at their unresolved
//! defaults; the origin tracker fills them in.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::indexer::syntax;
use crate::models::{Parameter, Symbol, SymbolKind};

/// Capitalised names that are language or standard-library types, never
/// project code.
const BUILTIN_TYPE_NAMES: &[&str] = &[
    "None", "True", "False", "Any", "Optional", "Union", "List", "Dict", "Set", "FrozenSet",
    "Tuple", "Type", "Callable", "Iterable", "Iterator", "Generator", "Sequence", "Mapping",
    "Awaitable", "Literal", "Self", "String", "Integer", "Long", "Short", "Byte", "Double",
    "Float", "Boolean", "Character", "Object", "Void", "Map", "HashMap", "ArrayList",
    "Collection", "Stream", "Promise", "Array", "Record", "Partial", "Readonly", "Date", "Error",
    "Function", "Number", "Vec", "Option", "Result", "Box", "Arc", "Rc", "HashSet", "BTreeMap",
    "BTreeSet",
];

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Convert a file path to a dotted module name.
///
/// Strips the file extension and joins path components with dots,
/// skipping any leading `/` or `.` segments.
pub fn to_module_name(path: &str) -> String {
    let p = Path::new(path);
    let without_ext = p.with_extension("");
    let parts: Vec<&str> = without_ext
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(os) => os.to_str(),
            _ => None,
        })
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    parts.join(".")
}

/// Parse a raw comma-separated parameter string.
///
/// The `language` argument controls splitting logic:
/// - `"python"` / `"typescript"` / `"rust"`: `name: type`, defaults stripped
/// - `"go"`: first token is the name, remaining tokens form the type
/// - everything else (e.g. `"java"`): last token is the name
pub fn build_parameters(params_raw: &str, language: &str) -> Vec<Parameter> {
    let mut parameters = Vec::new();
    let trimmed = params_raw.trim();
    if trimmed.is_empty() {
        return parameters;
    }
    for chunk in trimmed.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        let (name, param_type) = match language {
            "python" | "typescript" | "javascript" | "rust" => {
                let without_default = chunk.split('=').next().unwrap_or(chunk).trim();
                match without_default.split_once(':') {
                    Some((before, after)) => {
                        let after = after.trim();
                        (
                            before.trim().trim_start_matches("mut ").to_string(),
                            (!after.is_empty()).then(|| after.to_string()),
                        )
                    }
                    None => (without_default.to_string(), None),
                }
            }
            "go" => {
                let parts: Vec<&str> = chunk.split_whitespace().collect();
                let Some(first) = parts.first() else {
                    continue;
                };
                let t = (parts.len() > 1).then(|| parts[1..].join(" "));
                (first.replace("...", ""), t)
            }
            _ => {
                let parts: Vec<&str> = chunk.split_whitespace().collect();
                let Some(last) = parts.last() else {
                    continue;
                };
                let t = (parts.len() > 1).then(|| parts[..parts.len() - 1].join(" "));
                (last.replace("...", ""), t)
            }
        };
        let name = name.trim_start_matches('*').trim_start_matches('&').to_string();
        if name.is_empty() || matches!(name.as_str(), "self" | "cls" | "&self" | "&mut self") {
            continue;
        }
        let position = parameters.len() as i64;
        parameters.push(Parameter {
            name,
            type_: param_type,
            position,
        });
    }
    parameters
}

/// Normalize a type name: trim whitespace and trailing semicolons/braces.
/// Returns `None` if the result is empty or the input is `None`.
pub fn normalize_type_name(type_name: Option<&str>) -> Option<String> {
    let raw = type_name?;
    let normalized = raw.trim().trim_end_matches(['{', ';']).trim();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized.to_string())
    }
}

/// Upper-case names are constants, everything else a plain variable.
pub(crate) fn value_kind(name: &str) -> SymbolKind {
    if name.chars().all(|c| c.is_ascii_uppercase() || c == '_' || c.is_ascii_digit()) {
        SymbolKind::Constant
    } else {
        SymbolKind::Variable
    }
}

fn is_project_type_name(name: &str) -> bool {
    name.len() > 1
        && name.starts_with(|c: char| c.is_ascii_uppercase())
        && !BUILTIN_TYPE_NAMES.contains(&name)
}

/// 1 + number of branch points in `body`.
pub fn cyclomatic_complexity(body: &str) -> u32 {
    1 + BRANCH_RE.find_iter(body).count() as u32
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Last line index of an indentation-delimited block starting at `start`.
fn indent_block_end(lines: &[&str], start: usize) -> usize {
    let base = indent_of(lines[start]);
    let mut end = start;
    for (idx, line) in lines.iter().enumerate().skip(start + 1) {
        if line.trim().is_empty() {
            continue;
        }
        if indent_of(line) <= base {
            break;
        }
        end = idx;
    }
    end
}

/// Brace counter that ignores string, char and template literals and
/// comments. Block comments and backtick literals carry across lines.
#[derive(Default)]
struct BraceScanner {
    /// `'` opens a string (JavaScript) rather than a char literal.
    single_quoted: bool,
    block_comment: bool,
    backtick: bool,
}

impl BraceScanner {
    /// Net depth change over `line`, and whether it opened a brace.
    fn scan(&mut self, line: &str) -> (i32, bool) {
        let chars: Vec<char> = line.chars().collect();
        let (mut delta, mut opened) = (0i32, false);
        let mut i = 0;
        while i < chars.len() {
            let (c, next) = (chars[i], chars.get(i + 1).copied());
            if self.block_comment {
                if c == '*' && next == Some('/') {
                    self.block_comment = false;
                    i += 1;
                }
            } else if self.backtick {
                match c {
                    '\\' => i += 1,
                    '`' => self.backtick = false,
                    _ => {}
                }
            } else {
                match (c, next) {
                    ('/', Some('/')) => break,
                    ('/', Some('*')) => {
                        self.block_comment = true;
                        i += 1;
                    }
                    ('"', _) => i = skip_quoted(&chars, i, '"'),
                    ('`', _) => self.backtick = true,
                    ('\'', _) if self.single_quoted => i = skip_quoted(&chars, i, '\''),
                    // Char literals only; a lone quote is a lifetime.
                    ('\'', Some('\\')) => i = skip_quoted(&chars, i, '\''),
                    ('\'', _) if chars.get(i + 2) == Some(&'\'') => i += 2,
                    ('{', _) => {
                        delta += 1;
                        opened = true;
                    }
                    ('}', _) => delta -= 1,
                    _ => {}
                }
            }
            i += 1;
        }
        (delta, opened)
    }
}

/// Index of the quote closing the literal opened at `open`, or the last
/// index when the line ends first.
fn skip_quoted(chars: &[char], open: usize, quote: char) -> usize {
    let mut i = open + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            c if c == quote => return i,
            _ => {}
        }
        i += 1;
    }
    chars.len().saturating_sub(1)
}

/// Last line index of a brace-delimited block starting at `start`. A
/// declaration that never opens a brace within a few lines is one line long.
fn brace_block_end(lines: &[&str], start: usize, single_quoted: bool) -> usize {
    let mut scanner = BraceScanner {
        single_quoted,
        ..BraceScanner::default()
    };
    let mut depth = 0i32;
    let mut opened = false;
    for (idx, line) in lines.iter().enumerate().skip(start) {
        let (delta, opened_here) = scanner.scan(line);
        depth += delta;
        opened |= opened_here;
        if opened && depth <= 0 {
            return idx;
        }
        if !opened && (line.trim_end().ends_with(';') || idx >= start + 2) {
            return start;
        }
    }
    lines.len().saturating_sub(1).max(start)
}

fn block_text(lines: &[&str], start: usize, end: usize) -> String {
    lines[start..=end.min(lines.len().saturating_sub(1))].join("\n")
}

fn split_names(raw: &str, separator: &str) -> Vec<String> {
    raw.split(',')
        .map(|part| part.trim().trim_matches(|c| c == '{' || c == '}' || c == '(' || c == ')'))
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.rsplit(separator)
                .next()
                .unwrap_or(part)
                .trim()
                .to_string()
        })
        .filter(|name| !name.is_empty() && name != "*")
        .collect()
}

/// Tracks enclosing class-like scopes by line range.
#[derive(Default)]
struct ScopeStack {
    entries: Vec<(String, usize)>,
}

impl ScopeStack {
    fn push(&mut self, name: String, end: usize) {
        self.entries.push((name, end));
    }

    fn current(&mut self, idx: usize) -> Option<String> {
        while let Some((_, end)) = self.entries.last() {
            if *end < idx {
                self.entries.pop();
            } else {
                break;
            }
        }
        self.entries.last().map(|(name, _)| name.clone())
    }
}

pub(crate) struct SymbolBuilder<'a> {
    lines: &'a [&'a str],
    file_path: &'a str,
    symbols: Vec<Symbol>,
}

impl<'a> SymbolBuilder<'a> {
    pub(crate) fn new(lines: &'a [&'a str], file_path: &'a str) -> Self {
        Self {
            lines,
            file_path,
            symbols: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, name: &str, kind: SymbolKind, start: usize, end: usize) -> &mut Symbol {
        let mut symbol = Symbol::new(name, kind, self.file_path, (start + 1) as i64);
        symbol.end_line = (end + 1) as i64;
        symbol.body = block_text(self.lines, start, end);
        symbol.complexity = if kind.is_structural() || kind == SymbolKind::Function {
            cyclomatic_complexity(&symbol.body)
        } else {
            1
        };
        self.symbols.push(symbol);
        let last = self.symbols.len() - 1;
        &mut self.symbols[last]
    }

    pub(crate) fn push_import(&mut self, name: &str, source: &str, idx: usize) {
        let symbol = self.push(name, SymbolKind::Import, idx, idx);
        symbol.is_import = true;
        symbol.import_source = Some(source.to_string());
        symbol.refresh_origin_signature();
    }

    pub(crate) fn finish(self) -> Vec<Symbol> {
        self.symbols
    }
}

// ---------------------------------------------------------------------------
// Compiled regex patterns (LazyLock for one-time init)
// ---------------------------------------------------------------------------

static TYPE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap());

static BRANCH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:if|elif|for|foreach|while|case|catch|except|and|or)\b|&&|\|\|").unwrap()
});

// -- Python --

static PY_CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)class\s+([A-Za-z_][A-Za-z0-9_]*)\s*(?:\(([^)]*)\))?\s*:").unwrap()
});

static PY_DEF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\s*)(?:async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)\s*(?:->\s*([^:]+))?:",
    )
    .unwrap()
});

static PY_FROM_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*from\s+([A-Za-z0-9_.]+)\s+import\s+\(?([^)#]+)\)?").unwrap()
});

static PY_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*import\s+([A-Za-z0-9_., ]+)").unwrap());

static PY_ASSIGN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*(?::\s*[^=]+)?=[^=]").unwrap()
});

// -- JavaScript / TypeScript --

static TS_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*import\s+(?:type\s+)?(.+?)\s+from\s+['"]([^'"]+)['"];?"#).unwrap()
});

static TS_CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?(class|interface|type)\s+([A-Za-z_$][A-Za-z0-9_$]*)(?:<[^>]*>)?(?:\s+extends\s+([A-Za-z_$][A-Za-z0-9_$.]*))?",
    )
    .unwrap()
});

static TS_FUNCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][A-Za-z0-9_$]*)\s*(?:<[^>]*>)?\s*\(([^)]*)\)\s*(?::\s*([^{]+))?",
    )
    .unwrap()
});

static TS_ARROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*(?::\s*[^=]+)?=\s*(?:async\s+)?\(([^)]*)\)\s*(?::\s*([^=]+))?\s*=>",
    )
    .unwrap()
});

static TS_METHOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:public\s+|private\s+|protected\s+)?(?:static\s+)?(?:async\s+)?([A-Za-z_$][A-Za-z0-9_$]*)\s*\(([^)]*)\)\s*(?::\s*([^{]+))?\s*\{",
    )
    .unwrap()
});

static TS_CONST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*(?::\s*[^=]+)?=[^=>]").unwrap()
});

const CONTROL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "function", "else", "do", "try", "new",
];

// -- Java --

static JAVA_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*import\s+(?:static\s+)?([A-Za-z0-9_.*]+)\s*;").unwrap());

static JAVA_CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:public|private|protected)?\s*(?:static\s+)?(?:abstract\s+|final\s+)?(class|interface|enum|record)\s+([A-Za-z_][A-Za-z0-9_]*)(?:<[^>]*>)?(?:\s+extends\s+([A-Za-z_][A-Za-z0-9_.]*))?",
    )
    .unwrap()
});

static JAVA_METHOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:public|private|protected)?\s*(?:static\s+)?(?:final\s+)?(?:synchronized\s+)?([A-Za-z0-9_<>\[\], ?]+)\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)\s*(?:throws\s+[A-Za-z0-9_., ]+)?\s*\{",
    )
    .unwrap()
});

static JAVA_CONST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:public\s+|private\s+|protected\s+)?static\s+final\s+[A-Za-z0-9_<>\[\]]+\s+([A-Z][A-Z0-9_]*)\s*=").unwrap()
});

// -- Go --

static GO_IMPORT_SINGLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*import\s+(?:[A-Za-z_.]+\s+)?"([^"]+)""#).unwrap());

static GO_IMPORT_BLOCK_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*import\s*\(").unwrap());

static GO_IMPORT_BLOCK_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*(?:[A-Za-z_.]+\s+)?"([^"]+)""#).unwrap());

static GO_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*type\s+([A-Za-z_][A-Za-z0-9_]*)\s+(struct|interface)\b").unwrap()
});

static GO_FUNCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*func\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)\s*([A-Za-z0-9_*.\[\]]+)?")
        .unwrap()
});

static GO_METHOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*func\s*\(([^)]*)\)\s*([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)\s*([A-Za-z0-9_*.\[\]]+)?",
    )
    .unwrap()
});

static GO_CONST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*const\s+([A-Za-z_][A-Za-z0-9_]*)\b").unwrap());

// -- Rust --

static RS_USE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+([A-Za-z0-9_:]+?)(?:::\{([^}]*)\}|::([A-Za-z0-9_]+))?\s*;").unwrap()
});

static RS_FN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+([A-Za-z_][A-Za-z0-9_]*)\s*(?:<[^>]*>)?\s*\(([^)]*)\)\s*(?:->\s*([^{;]+))?",
    )
    .unwrap()
});

static RS_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(struct|enum|trait|type)\s+([A-Za-z_][A-Za-z0-9_]*)")
        .unwrap()
});

static RS_IMPL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*impl(?:<[^>]*>)?\s+(?:([A-Za-z_][A-Za-z0-9_:]*)(?:<[^>]*>)?\s+for\s+)?([A-Za-z_][A-Za-z0-9_]*)")
        .unwrap()
});

static RS_CONST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const|static)\s+([A-Z][A-Z0-9_]*)\s*:").unwrap()
});

// ---------------------------------------------------------------------------
// Python extraction
// ---------------------------------------------------------------------------

fn python_symbols(source: &str, file_path: &str) -> Vec<Symbol> {
    let lines: Vec<&str> = source.lines().collect();
    let mut builder = SymbolBuilder::new(&lines, file_path);
    let mut scopes = ScopeStack::default();

    for (idx, line) in lines.iter().enumerate() {
        if let Some(caps) = PY_FROM_IMPORT_RE.captures(line) {
            let module = caps[1].to_string();
            for name in split_names(&caps[2], " as ") {
                builder.push_import(&name, &module, idx);
            }
            continue;
        }
        if let Some(caps) = PY_IMPORT_RE.captures(line) {
            for module in caps[1].split(',').map(str::trim).filter(|m| !m.is_empty()) {
                let module = module.split(" as ").next().unwrap_or(module).trim();
                builder.push_import(module, module, idx);
            }
            continue;
        }

        let scope = scopes.current(idx);

        if let Some(caps) = PY_CLASS_RE.captures(line) {
            let name = caps[2].to_string();
            let end = indent_block_end(&lines, idx);
            let bases = caps
                .get(3)
                .map(|m| split_names(m.as_str(), "."))
                .unwrap_or_default()
                .into_iter()
                .filter(|b| b != "object" && !b.contains('='))
                .collect();
            let symbol = builder.push(&name, SymbolKind::Class, idx, end);
            symbol.bases = bases;
            symbol.scope = scope;
            scopes.push(name, end);
            continue;
        }

        if let Some(caps) = PY_DEF_RE.captures(line) {
            let name = caps[2].to_string();
            let end = indent_block_end(&lines, idx);
            let kind = if scope.is_some() && !caps[1].is_empty() {
                SymbolKind::Method
            } else {
                SymbolKind::Function
            };
            let symbol = builder.push(&name, kind, idx, end);
            symbol.parameters = build_parameters(&caps[3], "python");
            symbol.return_type = normalize_type_name(caps.get(4).map(|m| m.as_str()));
            symbol.scope = if kind == SymbolKind::Method { scope } else { None };
            continue;
        }

        if let Some(caps) = PY_ASSIGN_RE.captures(line) {
            builder.push(&caps[1], value_kind(&caps[1]), idx, idx);
        }
    }

    builder.finish()
}

// ---------------------------------------------------------------------------
// JavaScript / TypeScript extraction
// ---------------------------------------------------------------------------

fn typescript_symbols(source: &str, file_path: &str, language: &str) -> Vec<Symbol> {
    let lines: Vec<&str> = source.lines().collect();
    let mut builder = SymbolBuilder::new(&lines, file_path);
    let mut scopes = ScopeStack::default();

    for (idx, line) in lines.iter().enumerate() {
        if let Some(caps) = TS_IMPORT_RE.captures(line) {
            let module = caps[2].to_string();
            for name in split_names(&caps[1], " as ") {
                builder.push_import(&name, &module, idx);
            }
            continue;
        }

        let scope = scopes.current(idx);

        if let Some(caps) = TS_CLASS_RE.captures(line) {
            let name = caps[2].to_string();
            let kind = match &caps[1] {
                "interface" => SymbolKind::Interface,
                "type" => SymbolKind::Type,
                _ => SymbolKind::Class,
            };
            let end = brace_block_end(&lines, idx, true);
            let symbol = builder.push(&name, kind, idx, end);
            symbol.bases = caps.get(3).map(|m| vec![m.as_str().to_string()]).unwrap_or_default();
            if kind == SymbolKind::Class {
                scopes.push(name, end);
            }
            continue;
        }

        if let Some(caps) = TS_FUNCTION_RE
            .captures(line)
            .or_else(|| TS_ARROW_RE.captures(line))
        {
            let end = brace_block_end(&lines, idx, true);
            let symbol = builder.push(&caps[1], SymbolKind::Function, idx, end);
            symbol.parameters = build_parameters(&caps[2], language);
            symbol.return_type = normalize_type_name(caps.get(3).map(|m| m.as_str()));
            continue;
        }

        if let Some(class_name) = scope {
            if let Some(caps) = TS_METHOD_RE.captures(line) {
                let name = &caps[1];
                if !CONTROL_KEYWORDS.contains(&name) {
                    let end = brace_block_end(&lines, idx, true);
                    let symbol = builder.push(name, SymbolKind::Method, idx, end);
                    symbol.parameters = build_parameters(&caps[2], language);
                    symbol.return_type = normalize_type_name(caps.get(3).map(|m| m.as_str()));
                    symbol.scope = Some(class_name);
                }
            }
            continue;
        }

        if let Some(caps) = TS_CONST_RE.captures(line) {
            let end = brace_block_end(&lines, idx, true);
            builder.push(&caps[1], value_kind(&caps[1]), idx, end);
        }
    }

    builder.finish()
}

// ---------------------------------------------------------------------------
// Java extraction
// ---------------------------------------------------------------------------

fn java_symbols(source: &str, file_path: &str) -> Vec<Symbol> {
    let lines: Vec<&str> = source.lines().collect();
    let mut builder = SymbolBuilder::new(&lines, file_path);
    let mut scopes = ScopeStack::default();

    for (idx, line) in lines.iter().enumerate() {
        if let Some(caps) = JAVA_IMPORT_RE.captures(line) {
            let module = caps[1].to_string();
            let name = module.rsplit('.').next().unwrap_or(&module).to_string();
            if name != "*" {
                builder.push_import(&name, &module, idx);
            }
            continue;
        }

        let scope = scopes.current(idx);

        if let Some(caps) = JAVA_CLASS_RE.captures(line) {
            let name = caps[2].to_string();
            let kind = if &caps[1] == "interface" {
                SymbolKind::Interface
            } else {
                SymbolKind::Class
            };
            let end = brace_block_end(&lines, idx, false);
            let symbol = builder.push(&name, kind, idx, end);
            symbol.bases = caps.get(3).map(|m| vec![m.as_str().to_string()]).unwrap_or_default();
            symbol.scope = scope;
            scopes.push(name, end);
            continue;
        }

        if let Some(caps) = JAVA_CONST_RE.captures(line) {
            builder.push(&caps[1], SymbolKind::Constant, idx, idx);
            continue;
        }

        if let Some(class_name) = scope {
            if let Some(caps) = JAVA_METHOD_RE.captures(line) {
                let name = &caps[2];
                if CONTROL_KEYWORDS.contains(&name) {
                    continue;
                }
                let end = brace_block_end(&lines, idx, false);
                let symbol = builder.push(name, SymbolKind::Method, idx, end);
                symbol.parameters = build_parameters(&caps[3], "java");
                symbol.return_type = normalize_type_name(Some(&caps[1]));
                symbol.scope = Some(class_name);
            }
        }
    }

    builder.finish()
}

// ---------------------------------------------------------------------------
// Go extraction
// ---------------------------------------------------------------------------

fn go_symbols(source: &str, file_path: &str) -> Vec<Symbol> {
    let lines: Vec<&str> = source.lines().collect();
    let mut builder = SymbolBuilder::new(&lines, file_path);
    let mut import_block = false;

    for (idx, line) in lines.iter().enumerate() {
        if GO_IMPORT_BLOCK_START_RE.is_match(line) {
            import_block = true;
            continue;
        }
        if import_block {
            if line.trim() == ")" {
                import_block = false;
            } else if let Some(caps) = GO_IMPORT_BLOCK_LINE_RE.captures(line) {
                let module = caps[1].to_string();
                let name = module.rsplit('/').next().unwrap_or(&module).to_string();
                builder.push_import(&name, &module, idx);
            }
            continue;
        }
        if let Some(caps) = GO_IMPORT_SINGLE_RE.captures(line) {
            let module = caps[1].to_string();
            let name = module.rsplit('/').next().unwrap_or(&module).to_string();
            builder.push_import(&name, &module, idx);
            continue;
        }

        if let Some(caps) = GO_TYPE_RE.captures(line) {
            let kind = if &caps[2] == "interface" {
                SymbolKind::Interface
            } else {
                SymbolKind::Class
            };
            let end = brace_block_end(&lines, idx, false);
            builder.push(&caps[1], kind, idx, end);
            continue;
        }

        if let Some(caps) = GO_METHOD_RE.captures(line) {
            let receiver_type = caps[1]
                .split_whitespace()
                .last()
                .map(|t| t.replace('*', ""))
                .unwrap_or_default();
            let end = brace_block_end(&lines, idx, false);
            let symbol = builder.push(&caps[2], SymbolKind::Method, idx, end);
            symbol.parameters = build_parameters(&caps[3], "go");
            symbol.return_type = normalize_type_name(caps.get(4).map(|m| m.as_str()));
            symbol.scope = (!receiver_type.is_empty()).then_some(receiver_type);
            continue;
        }

        if let Some(caps) = GO_FUNCTION_RE.captures(line) {
            let end = brace_block_end(&lines, idx, false);
            let symbol = builder.push(&caps[1], SymbolKind::Function, idx, end);
            symbol.parameters = build_parameters(&caps[2], "go");
            symbol.return_type = normalize_type_name(caps.get(3).map(|m| m.as_str()));
            continue;
        }

        if let Some(caps) = GO_CONST_RE.captures(line) {
            builder.push(&caps[1], SymbolKind::Constant, idx, idx);
        }
    }

    builder.finish()
}

// ---------------------------------------------------------------------------
// Rust extraction
// ---------------------------------------------------------------------------

fn rust_symbols(source: &str, file_path: &str) -> Vec<Symbol> {
    let lines: Vec<&str> = source.lines().collect();
    let mut builder = SymbolBuilder::new(&lines, file_path);
    let mut scopes = ScopeStack::default();

    for (idx, line) in lines.iter().enumerate() {
        if let Some(caps) = RS_USE_RE.captures(line) {
            let path = caps[1].to_string();
            if let Some(group) = caps.get(2) {
                for name in split_names(group.as_str(), " as ") {
                    if name != "self" {
                        builder.push_import(&name, &path, idx);
                    }
                }
            } else if let Some(leaf) = caps.get(3) {
                builder.push_import(leaf.as_str(), &path, idx);
            } else {
                let (parent, leaf) = path.rsplit_once("::").unwrap_or(("", path.as_str()));
                builder.push_import(leaf, if parent.is_empty() { leaf } else { parent }, idx);
            }
            continue;
        }

        let scope = scopes.current(idx);

        if let Some(caps) = RS_IMPL_RE.captures(line) {
            let end = brace_block_end(&lines, idx, false);
            scopes.push(caps[2].to_string(), end);
            continue;
        }

        if let Some(caps) = RS_TYPE_RE.captures(line) {
            let kind = match &caps[1] {
                "trait" => SymbolKind::Interface,
                "type" => SymbolKind::Type,
                _ => SymbolKind::Class,
            };
            let end = brace_block_end(&lines, idx, false);
            builder.push(&caps[2], kind, idx, end);
            if kind == SymbolKind::Interface {
                scopes.push(caps[2].to_string(), end);
            }
            continue;
        }

        if let Some(caps) = RS_FN_RE.captures(line) {
            let end = brace_block_end(&lines, idx, false);
            let kind = if scope.is_some() {
                SymbolKind::Method
            } else {
                SymbolKind::Function
            };
            let symbol = builder.push(&caps[1], kind, idx, end);
            symbol.parameters = build_parameters(&caps[2], "rust");
            symbol.return_type = normalize_type_name(caps.get(3).map(|m| m.as_str()));
            symbol.scope = scope;
            continue;
        }

        if let Some(caps) = RS_CONST_RE.captures(line) {
            builder.push(&caps[1], SymbolKind::Constant, idx, idx);
        }
    }

    builder.finish()
}

// ---------------------------------------------------------------------------
// Public dispatch
// ---------------------------------------------------------------------------

/// Annotation references for project type names used in parameter and
/// return types, anchored on the declaring line.
fn with_annotation_references(
    mut symbols: Vec<Symbol>,
    source: &str,
    file_path: &str,
) -> Vec<Symbol> {
    let lines: Vec<&str> = source.lines().collect();
    let mut seen: HashSet<(&str, i64)> = HashSet::new();
    let mut references = Vec::new();
    for symbol in symbols
        .iter()
        .filter(|s| matches!(s.kind, SymbolKind::Function | SymbolKind::Method))
    {
        let annotations = symbol
            .parameters
            .iter()
            .filter_map(|p| p.type_.as_deref())
            .chain(symbol.return_type.as_deref());
        for annotation in annotations {
            for name in TYPE_NAME_RE.find_iter(annotation).map(|m| m.as_str()) {
                if !is_project_type_name(name) || !seen.insert((name, symbol.line)) {
                    continue;
                }
                let mut reference = Symbol::new(name, SymbolKind::Type, file_path, symbol.line);
                reference.in_annotation = true;
                reference.body = lines
                    .get((symbol.line - 1).max(0) as usize)
                    .map(|l| l.to_string())
                    .unwrap_or_default();
                references.push(reference);
            }
        }
    }
    symbols.extend(references);
    symbols
}

/// Extract symbols from source code.
///
/// * `source`    - Source code text.
/// * `file_path` - Project-relative path recorded on every symbol.
/// * `language`  - As returned by `filesystem::detect_language`.
pub fn extract_symbols(source: &str, file_path: &str, language: &str) -> Vec<Symbol> {
    let symbols = syntax::extract(source, file_path, language)
        .unwrap_or_else(|| scan_symbols(source, file_path, language));
    with_annotation_references(symbols, source, file_path)
}

/// Line-scanning extraction, used when no syntax tree is available.
pub fn scan_symbols(source: &str, file_path: &str, language: &str) -> Vec<Symbol> {
    match language {
        "python" => python_symbols(source, file_path),
        "typescript" | "javascript" => typescript_symbols(source, file_path, language),
        "java" => java_symbols(source, file_path),
        "go" => go_symbols(source, file_path),
        "rust" => rust_symbols(source, file_path),
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn find<'a>(symbols: &'a [Symbol], name: &str) -> &'a Symbol {
        symbols
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("symbol {} not extracted", name))
    }

    #[test]
    fn test_to_module_name_simple() {
        assert_eq!(to_module_name("src/duplo/finder.py"), "src.duplo.finder");
        assert_eq!(to_module_name("foo/bar/baz"), "foo.bar.baz");
    }

    #[test]
    fn test_build_parameters_python_strips_self_and_defaults() {
        let params = build_parameters("self, name: str, retries: int = 3", "python");
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "name");
        assert_eq!(params[0].type_.as_deref(), Some("str"));
        assert_eq!(params[0].position, 0);
        assert_eq!(params[1].name, "retries");
        assert_eq!(params[1].type_.as_deref(), Some("int"));
    }

    #[test]
    fn test_build_parameters_java_and_go() {
        let java = build_parameters("int count, String name", "java");
        assert_eq!(java[1].name, "name");
        assert_eq!(java[1].type_.as_deref(), Some("String"));

        let go = build_parameters("ctx context.Context, name string", "go");
        assert_eq!(go[0].name, "ctx");
        assert_eq!(go[0].type_.as_deref(), Some("context.Context"));
    }

    #[test]
    fn test_normalize_type_name() {
        assert_eq!(normalize_type_name(Some("  string; ")), Some("string".to_string()));
        assert_eq!(normalize_type_name(Some("  ")), None);
        assert_eq!(normalize_type_name(None), None);
    }

    #[test]
    fn test_cyclomatic_complexity_counts_branches() {
        assert_eq!(cyclomatic_complexity("return x"), 1);
        let body = "if a:\n    pass\nelif b and c:\n    pass\nfor x in y:\n    pass";
        assert_eq!(cyclomatic_complexity(body), 5);
    }

    #[test]
    fn test_python_classes_methods_and_imports() {
        let src = "\
from models.base import Model, Field as F
import os

MAX_RETRIES = 3

class User(Model):
    def save(self, force: bool = False) -> None:
        if force:
            return None
        return None

def helper(x):
    return x
";
        let symbols = extract_symbols(src, "models/user.py", "python");

        let model = find(&symbols, "Model");
        assert_eq!(model.kind, SymbolKind::Import);
        assert_eq!(model.import_source.as_deref(), Some("models.base"));
        assert!(model.is_import);
        assert_eq!(find(&symbols, "F").import_source.as_deref(), Some("models.base"));
        assert_eq!(find(&symbols, "os").kind, SymbolKind::Import);

        assert_eq!(find(&symbols, "MAX_RETRIES").kind, SymbolKind::Constant);

        let user = find(&symbols, "User");
        assert_eq!(user.kind, SymbolKind::Class);
        assert_eq!(user.bases, vec!["Model".to_string()]);
        assert_eq!(user.line, 6);
        assert_eq!(user.end_line, 10);

        let save = find(&symbols, "save");
        assert_eq!(save.kind, SymbolKind::Method);
        assert_eq!(save.scope.as_deref(), Some("User"));
        assert_eq!(save.parameters.len(), 1);
        assert_eq!(save.return_type.as_deref(), Some("None"));
        assert_eq!(save.complexity, 2);
        assert!(save.body.contains("if force"));

        let helper = find(&symbols, "helper");
        assert_eq!(helper.kind, SymbolKind::Function);
        assert_eq!(helper.scope, None);
    }

    #[test]
    fn test_typescript_extraction() {
        let src = "\
import { render, mount as attach } from './dom';

export class Widget extends Base {
  draw(ctx: Context): void {
    if (ctx) { render(ctx); }
  }
}

export function total(items: number[]): number {
  return items.length;
}

export const double = (n: number) => n * 2;
";
        let symbols = extract_symbols(src, "web/widget.ts", "typescript");
        assert_eq!(find(&symbols, "render").import_source.as_deref(), Some("./dom"));
        assert_eq!(find(&symbols, "attach").kind, SymbolKind::Import);

        let widget = find(&symbols, "Widget");
        assert_eq!(widget.kind, SymbolKind::Class);
        assert_eq!(widget.bases, vec!["Base".to_string()]);
        assert_eq!(widget.end_line, 7);

        let draw = find(&symbols, "draw");
        assert_eq!(draw.kind, SymbolKind::Method);
        assert_eq!(draw.scope.as_deref(), Some("Widget"));
        assert_eq!(draw.parameters[0].name, "ctx");

        let total = find(&symbols, "total");
        assert_eq!(total.kind, SymbolKind::Function);
        assert_eq!(total.end_line, 11);

        assert_eq!(find(&symbols, "double").kind, SymbolKind::Function);
    }

    #[test]
    fn test_java_extraction() {
        let src = "\
package com.example;

import java.util.List;

public class Service extends BaseService {
    public static final int LIMIT = 10;

    public static void doWork(int count) {
        for (int i = 0; i < count; i++) {}
    }
}
";
        let symbols = extract_symbols(src, "Service.java", "java");
        assert_eq!(find(&symbols, "List").import_source.as_deref(), Some("java.util.List"));
        assert_eq!(find(&symbols, "Service").bases, vec!["BaseService".to_string()]);
        assert_eq!(find(&symbols, "LIMIT").kind, SymbolKind::Constant);
        let method = find(&symbols, "doWork");
        assert_eq!(method.kind, SymbolKind::Method);
        assert_eq!(method.scope.as_deref(), Some("Service"));
        assert_eq!(method.return_type.as_deref(), Some("void"));
        assert_eq!(method.complexity, 2);
    }

    #[test]
    fn test_go_extraction() {
        let src = "\
package main

import (
    \"fmt\"
    \"net/http\"
)

type Server struct {
    addr string
}

func (s *Server) Start(port int) error {
    return nil
}

func main() {
    fmt.Println(\"hi\")
}
";
        let symbols = extract_symbols(src, "main.go", "go");
        assert_eq!(find(&symbols, "http").import_source.as_deref(), Some("net/http"));
        assert_eq!(find(&symbols, "Server").kind, SymbolKind::Class);
        let start = find(&symbols, "Start");
        assert_eq!(start.kind, SymbolKind::Method);
        assert_eq!(start.scope.as_deref(), Some("Server"));
        assert_eq!(start.return_type.as_deref(), Some("error"));
        assert_eq!(find(&symbols, "main").kind, SymbolKind::Function);
    }

    #[test]
    fn test_rust_extraction() {
        let src = "\
use std::collections::{HashMap, HashSet};
use crate::models::Symbol;

pub const LIMIT: usize = 4;

pub struct Index {
    items: Vec<u32>,
}

impl Index {
    pub fn len(&self) -> usize {
        self.items.len()
    }
}

fn free(a: u32, b: u32) -> u32 {
    a + b
}
";
        let symbols = extract_symbols(src, "src/index.rs", "rust");
        assert_eq!(
            find(&symbols, "HashMap").import_source.as_deref(),
            Some("std::collections")
        );
        assert_eq!(find(&symbols, "Symbol").import_source.as_deref(), Some("crate::models"));
        assert_eq!(find(&symbols, "LIMIT").kind, SymbolKind::Constant);
        assert_eq!(find(&symbols, "Index").kind, SymbolKind::Class);
        let len = find(&symbols, "len");
        assert_eq!(len.kind, SymbolKind::Method);
        assert_eq!(len.scope.as_deref(), Some("Index"));
        let free = find(&symbols, "free");
        assert_eq!(free.kind, SymbolKind::Function);
        assert_eq!(free.parameters.len(), 2);
        assert_eq!(free.end_line, 18);
    }

    #[test]
    fn test_python_multiline_signature() {
        let src = "def validate_email(\n    address,\n    strict=False,\n):\n    ...";
        let symbols = extract_symbols(src, "a.py", "python");
        assert_eq!(symbols.len(), 1);
        let func = &symbols[0];
        assert_eq!(func.name, "validate_email");
        assert_eq!(func.kind, SymbolKind::Function);
        assert_eq!(func.end_line, 5);
        let names: Vec<&str> = func.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["address", "strict"]);
    }

    #[test]
    fn test_annotation_types_are_extracted_as_references() {
        let src = "\
from db import Session

def handle(session: Session, count: int) -> Optional[Report]:
    return None
";
        let symbols = extract_symbols(src, "app/handlers.py", "python");
        let annotations: Vec<(&str, i64)> = symbols
            .iter()
            .filter(|s| s.in_annotation)
            .map(|s| (s.name.as_str(), s.line))
            .collect();
        assert_eq!(annotations, vec![("Session", 3), ("Report", 3)]);
        let report = symbols.iter().find(|s| s.name == "Report").unwrap();
        assert_eq!(report.kind, SymbolKind::Type);
        assert!(!report.is_import);
        assert!(report.body.starts_with("def handle("));
        assert!(symbols.iter().all(|s| s.name != "Optional" && s.name != "int"));
    }

    #[test]
    fn test_brace_blocks_ignore_literals_and_comments() {
        let rust = "\
fn render() -> String {
    let close = \"}\";
    // } not code
    let c = '}';
    format!(\"{}{}\", close, c)
}

fn next<'a>(s: &'a str) -> &'a str {
    s
}
";
        let symbols = scan_symbols(rust, "src/render.rs", "rust");
        assert_eq!(find(&symbols, "render").end_line, 6);
        assert_eq!(find(&symbols, "next").end_line, 10);

        let ts = "\
function label(x) {
  const a = '}';
  /* } */
  return `${x}}`;
}
";
        let symbols = scan_symbols(ts, "web/label.js", "javascript");
        assert_eq!(find(&symbols, "label").end_line, 5);
    }

    #[test]
    fn test_unknown_language_yields_nothing() {
        assert!(extract_symbols("anything", "notes.txt", "markdown").is_empty());
    }
}
