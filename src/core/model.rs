//! Core data model shared by every pipeline stage.
//!
//! Entities are created in strict pipeline order and never mutated after the
//! stage that produces them, except for the splitter's final patch-id
//! renumbering. Ownership flows forward; there are no back-references.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Input-error taxonomy surfaced to the CLI with a one-line message.
#[derive(Debug, Error)]
pub enum SplitError {
    #[error("diff is empty or contains no parseable hunks")]
    EmptyDiff,

    #[error("patch file not found: {0}")]
    PatchFileNotFound(String),

    #[error("repository '{0}' not found in source config")]
    UnknownRepo(String),

    #[error("commit '{commit}' does not exist in branch '{branch}'")]
    CommitNotInBranch { commit: String, branch: String },
}

/// Normalized symbol kinds across languages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    /// Free-standing function
    Function,

    /// Class/struct/impl method
    Method,

    /// Python/TS/Java class
    Class,

    /// Variable or constant
    Variable,

    /// Struct, enum, type alias
    Type,

    /// Interface-like construct
    Interface,

    /// Class field
    Field,

    /// Import/use statement
    Import,
}

impl SymbolKind {
    /// Kinds that introduce a referencable definition.
    pub fn is_definition_kind(self) -> bool {
        matches!(
            self,
            Self::Function | Self::Method | Self::Class | Self::Type | Self::Interface
        )
    }
}

/// Whether a symbol occurrence declares something or references it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SymbolRole {
    Definition,
    Usage,
}

/// A lexical entity found in a hunk's added lines.
///
/// Identity is the tuple (name, kind, file, line, role); the optional
/// package/qualified-name fields carry resolution hints for usages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Symbol {
    /// Simple declared or referenced name
    pub name: String,

    /// Normalized symbol kind
    pub kind: SymbolKind,

    /// File the occurrence belongs to (always the owning Change's file)
    pub file: String,

    /// 1-based line in the target file
    pub line: usize,

    /// Definition or usage
    pub role: SymbolRole,

    /// Package/module alias the symbol was reached through (usages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,

    /// Fully qualified name, e.g. `smells.DetectorRegistry`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualified_name: Option<String>,

    /// Enclosing class/receiver/module name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Symbol {
    /// Shorthand for a definition with no package context.
    pub fn definition(name: impl Into<String>, kind: SymbolKind, file: &str, line: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            file: file.to_string(),
            line,
            role: SymbolRole::Definition,
            package: None,
            qualified_name: None,
            scope: None,
        }
    }

    /// Best available qualified name: explicit, then `package.name`, then name.
    pub fn qualified(&self) -> String {
        if let Some(q) = &self.qualified_name {
            return q.clone();
        }
        if let Some(p) = &self.package {
            return format!("{p}.{}", self.name);
        }
        self.name.clone()
    }

    /// Dedup key used within a single extraction pass.
    pub fn dedup_key(&self) -> (String, SymbolKind, SymbolRole, Option<String>) {
        (self.name.clone(), self.kind, self.role, self.package.clone())
    }
}

/// Hunk classification derived from its added/removed line counts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
}

impl ChangeKind {
    /// Classify from line counts: pure additions are Add, pure removals
    /// are Delete, everything else (including empty) is Modify.
    pub fn from_counts(added: usize, removed: usize) -> Self {
        if added > 0 && removed == 0 {
            Self::Add
        } else if removed > 0 && added == 0 {
            Self::Delete
        } else {
            Self::Modify
        }
    }
}

/// A single hunk of the input diff, with its extracted symbols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    /// Stable id: `<file>:hunk_<index>`
    pub id: String,

    /// Target-side file path (source path for deletions)
    pub file: String,

    /// 0-based hunk index within the file, contiguous
    pub hunk_index: usize,

    /// Add / Modify / Delete
    pub kind: ChangeKind,

    /// Symbols extracted from the hunk's added lines
    pub symbols: Vec<Symbol>,

    /// `[start, end)` line range in the target file
    pub line_range: (usize, usize),

    /// Verbatim hunk text including the `@@` header; every line
    /// newline-terminated
    pub content: String,

    /// Count of `+` lines
    pub added_lines: usize,

    /// Count of `-` lines
    pub removed_lines: usize,
}

impl Change {
    /// Build the canonical change id for a file/hunk pair.
    pub fn make_id(file: &str, hunk_index: usize) -> String {
        format!("{file}:hunk_{hunk_index}")
    }

    /// Total changed lines, the unit every size budget is measured in.
    pub fn changed_lines(&self) -> usize {
        self.added_lines + self.removed_lines
    }

    /// Immediate parent directory of the file, used as the package hint.
    pub fn parent_dir(&self) -> &str {
        match self.file.rfind('/') {
            Some(idx) => &self.file[..idx],
            None => "",
        }
    }
}

/// Typed dependency edge kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    DefinesUses,
    ModifiesUses,
    Import,
    CallChain,
    TypeDependency,
}

/// A directed edge between change ids: `source` depends on `target`,
/// so `target` must be applied before or together with `source`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub source: String,
    pub target: String,
    pub kind: DependencyKind,

    /// 1.0 = critical (atomic or strict-ordered); below that, orderable
    /// but splittable
    pub strength: f64,

    /// Human-readable explanation
    pub reason: String,
}

impl Dependency {
    /// Duplicate-suppression key: same (source, target, kind) edges collapse.
    pub fn dedup_key(&self) -> (String, String, DependencyKind) {
        (self.source.clone(), self.target.clone(), self.kind)
    }

    pub fn is_critical(&self) -> bool {
        self.strength >= 1.0
    }
}

/// A set of changes that must ship in a single patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomicGroup {
    pub id: String,
    pub change_ids: Vec<String>,
    pub reason: String,
}

/// A soft clustering hint; may overlap other groups, only biases merging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticGroup {
    pub id: String,
    pub name: String,
    pub change_ids: Vec<String>,
    pub description: String,
    pub cohesion_score: f64,
}

/// The emitted review unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    /// Dense id assigned after topological sort; every prerequisite id
    /// is strictly smaller
    pub id: usize,

    pub name: String,
    pub description: String,

    /// Member change ids
    pub changes: Vec<String>,

    /// Prerequisite patch ids
    pub depends_on: Vec<usize>,

    /// Total changed lines across member changes
    pub size_lines: usize,

    pub warnings: Vec<String>,
}

/// Reviewer-facing orientation notes produced by the enhancer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MentalModel {
    pub summary: String,
    pub progression: Vec<String>,
    pub key_concepts: Vec<String>,
    pub review_tips: String,
}

/// Quality metrics computed by the validator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub num_patches: usize,
    pub total_lines: usize,
    pub avg_patch_size: f64,
    pub max_patch_size: usize,
    pub min_patch_size: usize,
    pub size_variance: f64,
    pub patches_with_warnings: usize,
    pub max_dependency_depth: usize,
    pub balance_score: f64,
    pub reviewability_score: f64,
}

/// Run-level metadata attached to the result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub num_changes: usize,
    pub num_dependencies: usize,
    pub metrics: QualityMetrics,
    pub llm_used: bool,

    /// Set when a cancel signal stopped the pipeline between phases
    pub partial: bool,
}

/// Pipeline output: patches plus everything needed to audit the split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchSplitResult {
    pub patches: Vec<Patch>,

    /// Patch ids in topological order (identical to the id sequence after
    /// renumbering)
    pub dependency_order: Vec<usize>,

    pub atomic_groups: Vec<AtomicGroup>,
    pub semantic_groups: Vec<SemanticGroup>,
    pub warnings: Vec<String>,
    pub metadata: ResultMetadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mental_model: Option<MentalModel>,
}
