//! Shared typed models used across extraction, detection, and remediation.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::errors::{DuploError, DuploResult};

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Build the canonical origin signature for a definition.
///
/// Layout: `file::line::kind[::import:<source>]`, with `parent::` prefixed
/// when the symbol is a method inherited from a resolvable base. The use-site
/// name and location never participate.
pub fn origin_signature(
    definition_file: &str,
    definition_line: i64,
    kind: SymbolKind,
    parent_class: Option<&str>,
    import_source: Option<&str>,
) -> String {
    let mut signature = format!("{}::{}::{}", definition_file, definition_line, kind);
    if let Some(source) = import_source.filter(|s| !s.is_empty()) {
        signature.push_str("::import:");
        signature.push_str(source);
    }
    match parent_class.filter(|p| !p.is_empty()) {
        Some(parent) => format!("{}::{}", parent, signature),
        None => signature,
    }
}

/// Stable content-free identifier: first 16 hex chars of
/// `sha256("file:name:line:kind")`.
pub fn symbol_id(file: &str, name: &str, line: i64, kind: SymbolKind) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}:{}", file, name, line, kind).as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

fn empty_to_none(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// 1. SymbolKind
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Variable,
    Constant,
    Import,
    Interface,
    Type,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Variable => "variable",
            SymbolKind::Constant => "constant",
            SymbolKind::Import => "import",
            SymbolKind::Interface => "interface",
            SymbolKind::Type => "type",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let kind = match value.trim().to_lowercase().as_str() {
            "function" => SymbolKind::Function,
            "method" => SymbolKind::Method,
            "class" | "struct" | "enum" => SymbolKind::Class,
            "variable" => SymbolKind::Variable,
            "constant" => SymbolKind::Constant,
            "import" => SymbolKind::Import,
            "interface" | "trait" => SymbolKind::Interface,
            "type" => SymbolKind::Type,
            _ => return None,
        };
        Some(kind)
    }

    /// Classes, interfaces and methods carry more structural risk than free
    /// functions when refactored.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            SymbolKind::Class | SymbolKind::Interface | SymbolKind::Method
        )
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// 2. Parameter / Location
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
    pub position: i64,
}

/// A file + 1-based line pair as reported by a resolution service.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: i64,
}

impl Location {
    pub fn new(file: impl Into<String>, line: i64) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

// ---------------------------------------------------------------------------
// 3. Symbol
// ---------------------------------------------------------------------------

/// A named code element plus its resolved origin.
///
/// Extraction fills the identity fields; the origin tracker owns the origin
/// fields. A fresh `Symbol` is a local, unresolved definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub file: String,
    pub line: i64,
    pub end_line: i64,
    pub scope: Option<String>,
    pub parameters: Vec<Parameter>,
    pub return_type: Option<String>,
    /// Source text of the element; what the similarity index compares.
    #[serde(default)]
    pub body: String,
    pub is_import: bool,
    /// A type named from an annotation (parameter, return or field type)
    /// rather than declared here.
    #[serde(default)]
    pub in_annotation: bool,
    pub complexity: u32,
    /// Declared base types (classes only).
    #[serde(default)]
    pub bases: Vec<String>,

    pub definition_file: Option<String>,
    pub definition_line: Option<i64>,
    pub is_reference: bool,
    pub is_definition: bool,
    pub parent_class: Option<String>,
    pub import_source: Option<String>,
    pub origin_signature: String,
    pub reference_count: u32,
}

impl Symbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind, file: impl Into<String>, line: i64) -> Self {
        let mut symbol = Self {
            name: name.into(),
            kind,
            file: file.into(),
            line,
            end_line: line,
            scope: None,
            parameters: Vec::new(),
            return_type: None,
            body: String::new(),
            is_import: kind == SymbolKind::Import,
            in_annotation: false,
            complexity: 1,
            bases: Vec::new(),
            definition_file: None,
            definition_line: None,
            is_reference: false,
            is_definition: true,
            parent_class: None,
            import_source: None,
            origin_signature: String::new(),
            reference_count: 0,
        };
        symbol.refresh_origin_signature();
        symbol
    }

    pub fn id(&self) -> String {
        symbol_id(&self.file, &self.name, self.line, self.kind)
    }

    pub fn location(&self) -> Location {
        Location::new(self.file.clone(), self.line)
    }

    pub fn line_count(&self) -> i64 {
        (self.end_line - self.line + 1).max(1)
    }

    pub fn is_public(&self) -> bool {
        !self.name.starts_with('_')
    }

    /// Recompute `origin_signature` from the current origin fields, falling
    /// back to the symbol's own location when no definition was resolved.
    pub fn refresh_origin_signature(&mut self) {
        let file = self.definition_file.as_deref().unwrap_or(&self.file);
        let line = self.definition_line.unwrap_or(self.line);
        self.origin_signature = origin_signature(
            file,
            line,
            self.kind,
            self.parent_class.as_deref(),
            self.import_source.as_deref(),
        );
    }

    /// Flatten into a primitive-valued map suitable for a metadata store.
    /// Absent optionals are written as empty strings; the body is not
    /// included since stores keep it as the document itself.
    pub fn to_metadata(&self) -> Map<String, Value> {
        let mut meta = Map::new();
        meta.insert("name".into(), Value::from(self.name.clone()));
        meta.insert("kind".into(), Value::from(self.kind.as_str()));
        meta.insert("file".into(), Value::from(self.file.clone()));
        meta.insert("line".into(), Value::from(self.line));
        meta.insert("end_line".into(), Value::from(self.end_line));
        meta.insert(
            "scope".into(),
            Value::from(self.scope.clone().unwrap_or_default()),
        );
        meta.insert(
            "parameters".into(),
            Value::from(serde_json::to_string(&self.parameters).unwrap_or_else(|_| "[]".into())),
        );
        meta.insert(
            "return_type".into(),
            Value::from(self.return_type.clone().unwrap_or_default()),
        );
        meta.insert("is_import".into(), Value::from(self.is_import));
        meta.insert("in_annotation".into(), Value::from(self.in_annotation));
        meta.insert("complexity".into(), Value::from(self.complexity));
        meta.insert(
            "bases".into(),
            Value::from(serde_json::to_string(&self.bases).unwrap_or_else(|_| "[]".into())),
        );
        meta.insert(
            "definition_file".into(),
            Value::from(self.definition_file.clone().unwrap_or_default()),
        );
        meta.insert(
            "definition_line".into(),
            Value::from(self.definition_line.unwrap_or(0)),
        );
        meta.insert("is_reference".into(), Value::from(self.is_reference));
        meta.insert("is_definition".into(), Value::from(self.is_definition));
        meta.insert(
            "parent_class".into(),
            Value::from(self.parent_class.clone().unwrap_or_default()),
        );
        meta.insert(
            "import_source".into(),
            Value::from(self.import_source.clone().unwrap_or_default()),
        );
        meta.insert(
            "origin_signature".into(),
            Value::from(self.origin_signature.clone()),
        );
        meta.insert("reference_count".into(), Value::from(self.reference_count));
        meta
    }

    /// Rebuild a symbol from [`Symbol::to_metadata`] output.
    ///
    /// `name`, `kind`, `file` and `line` are required. Every origin field is
    /// optional and falls back to the unresolved local-definition default.
    pub fn from_metadata(meta: &Map<String, Value>, body: &str) -> DuploResult<Self> {
        let name = empty_to_none(meta.get("name"))
            .ok_or_else(|| DuploError::Metadata("missing 'name'".to_string()))?;
        let kind_raw = empty_to_none(meta.get("kind"))
            .ok_or_else(|| DuploError::Metadata("missing 'kind'".to_string()))?;
        let kind = SymbolKind::parse(&kind_raw)
            .ok_or_else(|| DuploError::Metadata(format!("unknown kind '{}'", kind_raw)))?;
        let file = empty_to_none(meta.get("file"))
            .ok_or_else(|| DuploError::Metadata("missing 'file'".to_string()))?;
        let line = meta
            .get("line")
            .and_then(Value::as_i64)
            .ok_or_else(|| DuploError::Metadata("missing 'line'".to_string()))?;

        let get_bool = |key: &str, default: bool| {
            meta.get(key).and_then(Value::as_bool).unwrap_or(default)
        };
        let parameters = empty_to_none(meta.get("parameters"))
            .and_then(|raw| serde_json::from_str::<Vec<Parameter>>(&raw).ok())
            .unwrap_or_default();
        let bases = empty_to_none(meta.get("bases"))
            .and_then(|raw| serde_json::from_str::<Vec<String>>(&raw).ok())
            .unwrap_or_default();

        let mut symbol = Symbol {
            name,
            kind,
            file,
            line,
            end_line: meta.get("end_line").and_then(Value::as_i64).unwrap_or(line),
            scope: empty_to_none(meta.get("scope")),
            parameters,
            return_type: empty_to_none(meta.get("return_type")),
            body: body.to_string(),
            is_import: get_bool("is_import", kind == SymbolKind::Import),
            in_annotation: get_bool("in_annotation", false),
            complexity: meta
                .get("complexity")
                .and_then(Value::as_u64)
                .map(|c| c as u32)
                .unwrap_or(1),
            bases,
            definition_file: empty_to_none(meta.get("definition_file")),
            definition_line: meta
                .get("definition_line")
                .and_then(Value::as_i64)
                .filter(|l| *l > 0),
            is_reference: get_bool("is_reference", false),
            is_definition: get_bool("is_definition", true),
            parent_class: empty_to_none(meta.get("parent_class")),
            import_source: empty_to_none(meta.get("import_source")),
            origin_signature: empty_to_none(meta.get("origin_signature")).unwrap_or_default(),
            reference_count: meta
                .get("reference_count")
                .and_then(Value::as_u64)
                .map(|c| c as u32)
                .unwrap_or(0),
        };
        if symbol.is_reference && symbol.is_definition {
            symbol.is_definition = false;
        }
        if symbol.origin_signature.is_empty() {
            symbol.refresh_origin_signature();
        }
        Ok(symbol)
    }
}

// ---------------------------------------------------------------------------
// 4. Similarity tiers
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityTier {
    Low,
    Medium,
    High,
    Exact,
}

/// Ordered cut-offs for [`SimilarityTier`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub exact: f64,
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            exact: 1.0,
            high: 0.8,
            medium: 0.6,
            low: 0.3,
        }
    }
}

impl TierThresholds {
    /// `None` when the score is under the lowest tier.
    pub fn classify(&self, score: f64) -> Option<SimilarityTier> {
        if score >= self.exact {
            Some(SimilarityTier::Exact)
        } else if score >= self.high {
            Some(SimilarityTier::High)
        } else if score >= self.medium {
            Some(SimilarityTier::Medium)
        } else if score >= self.low {
            Some(SimilarityTier::Low)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// 5. Finding
// ---------------------------------------------------------------------------

/// One side of a symbol-level match, trimmed to what downstream stages need.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchedSymbol {
    pub name: String,
    pub file: String,
    #[serde(default = "default_kind")]
    pub kind: SymbolKind,
    #[serde(default)]
    pub line: i64,
    #[serde(default = "default_line_count")]
    pub line_count: i64,
    #[serde(default = "default_complexity")]
    pub complexity: u32,
    #[serde(default)]
    pub origin_signature: String,
}

fn default_kind() -> SymbolKind {
    SymbolKind::Function
}

fn default_line_count() -> i64 {
    1
}

fn default_complexity() -> u32 {
    1
}

impl From<&Symbol> for MatchedSymbol {
    fn from(symbol: &Symbol) -> Self {
        Self {
            name: symbol.name.clone(),
            file: symbol.file.clone(),
            kind: symbol.kind,
            line: symbol.line,
            line_count: symbol.line_count(),
            complexity: symbol.complexity,
            origin_signature: symbol.origin_signature.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymbolMatch {
    pub original: MatchedSymbol,
    pub duplicate: MatchedSymbol,
    pub similarity: f64,
    #[serde(default)]
    pub tier: Option<SimilarityTier>,
}

/// A candidate duplicate between two files. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub finding_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_severity")]
    pub severity: String,
    pub file_pair: (String, String),
    pub duplicate_symbols: Vec<SymbolMatch>,
    pub duplicate_count: usize,
    pub average_similarity: f64,
    #[serde(default)]
    pub evidence: Map<String, Value>,
}

fn default_severity() -> String {
    "medium".to_string()
}

impl Finding {
    /// Decode an externally produced finding. Missing required fields are a
    /// `DecisionInput` error so the bridge can record them per item.
    pub fn from_value(value: &Value) -> DuploResult<Self> {
        let finding: Finding = serde_json::from_value(value.clone())
            .map_err(|e| DuploError::DecisionInput(format!("malformed finding: {}", e)))?;
        if finding.file_pair.0.is_empty() || finding.file_pair.1.is_empty() {
            return Err(DuploError::DecisionInput(
                "finding has an empty file in its file pair".to_string(),
            ));
        }
        Ok(finding)
    }

    pub fn files(&self) -> [&str; 2] {
        [self.file_pair.0.as_str(), self.file_pair.1.as_str()]
    }

    pub fn symbol_kinds(&self) -> BTreeSet<SymbolKind> {
        self.duplicate_symbols
            .iter()
            .flat_map(|m| [m.original.kind, m.duplicate.kind])
            .collect()
    }
}

// ---------------------------------------------------------------------------
// 6. DuplicationContext
// ---------------------------------------------------------------------------

/// Feature vector fed to the decision matrix. Built fresh per finding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DuplicationContext {
    pub similarity_score: f64,
    pub file_count: usize,
    pub total_line_count: i64,
    pub symbol_types: BTreeSet<SymbolKind>,
    pub cross_module_impact: bool,
    pub test_coverage_percentage: f64,
    pub cyclomatic_complexity: u32,
    pub dependency_count: u32,
    pub is_public_api: bool,
    pub has_documentation: bool,
    pub last_modified_days_ago: i64,
    /// Every symbol involved lives in test or fixture code.
    #[serde(default)]
    pub test_only: bool,
}

impl Default for DuplicationContext {
    fn default() -> Self {
        Self {
            similarity_score: 0.0,
            file_count: 2,
            total_line_count: 0,
            symbol_types: BTreeSet::new(),
            cross_module_impact: false,
            test_coverage_percentage: 0.0,
            cyclomatic_complexity: 1,
            dependency_count: 0,
            is_public_api: false,
            has_documentation: false,
            last_modified_days_ago: 365,
            test_only: false,
        }
    }
}

impl DuplicationContext {
    pub fn validate(&self) -> DuploResult<()> {
        if !(0.0..=1.0).contains(&self.similarity_score) {
            return Err(DuploError::DecisionInput(format!(
                "similarity_score {} outside [0, 1]",
                self.similarity_score
            )));
        }
        if !(0.0..=100.0).contains(&self.test_coverage_percentage) {
            return Err(DuploError::DecisionInput(format!(
                "test_coverage_percentage {} outside [0, 100]",
                self.test_coverage_percentage
            )));
        }
        if self.file_count == 0 {
            return Err(DuploError::DecisionInput(
                "file_count must be at least 1".to_string(),
            ));
        }
        if self.total_line_count < 0 {
            return Err(DuploError::DecisionInput(
                "total_line_count must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 7. Decision
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    AutomaticFix,
    ExpertReview,
    HumanReview,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::AutomaticFix => "AUTOMATIC_FIX",
            ActionType::ExpertReview => "EXPERT_REVIEW",
            ActionType::HumanReview => "HUMAN_REVIEW",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
    VeryHigh,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: ActionType,
    pub rationale: String,
    pub complexity_risk: RiskLevel,
    pub blast_radius: RiskLevel,
    pub risk_score: f64,
    pub confidence: Confidence,
    pub approach: String,
    pub concerns: Vec<String>,
}
