//! **diffsplit** - Split one large unified diff into dependency-ordered,
//! reviewable patches.
//!
//! A multi-phase pipeline: diff parsing, per-hunk symbol extraction,
//! dependency inference over a qualified-name index, graph analysis with
//! atomic groups, semantic grouping, size-targeted patch synthesis, and
//! validation with quality metrics. An optional LLM enhancer adds edges,
//! groups, and human descriptions without ever touching correctness
//! invariants.

/// Command-line interface with clap integration
pub mod cli;

/// CLI command runners (diff sourcing, export, terminal output)
pub mod commands;

/// Core splitting pipeline
pub mod core {
    /// Shared data model for every stage
    pub mod model;

    /// Language dispatch and regex-fallback symbol extraction
    pub mod symbols;

    /// Unified diff parsing into per-hunk Change records
    pub mod diff;

    /// Dependency inference via the qualified symbol index
    pub mod analyze;

    /// Dependency graph: SCCs, atomic groups, topological order
    pub mod graph;

    /// Heuristic semantic grouping
    pub mod grouping;

    /// Patch synthesis and id renumbering
    pub mod split;

    /// Validation, quality metrics, optimization hints
    pub mod validate;

    /// Hunk digests and input/output conservation checking
    pub mod digest;

    /// End-to-end orchestration
    pub mod pipeline;

    /// Patch set export and re-splitting
    pub mod export;

    /// Git diff extraction and repository introspection
    pub mod git;
}

/// Language processing - tree-sitter symbol extraction per language
pub mod parsers {
    /// Go symbol extraction
    pub mod go;

    /// Python symbol extraction
    pub mod python;

    /// JavaScript/TypeScript symbol extraction
    pub mod javascript;

    /// Java symbol extraction
    pub mod java;
}

/// Infrastructure - configuration, LLM client, shared helpers
pub mod infra {
    /// Source repositories configuration
    pub mod config;

    /// OpenAI-compatible enhancer client
    pub mod llm;

    /// Tree-sitter node helpers
    pub mod utils;
}

// Strategic re-exports for library consumers
pub use self::core::model::{
    AtomicGroup, Change, ChangeKind, Dependency, DependencyKind, MentalModel, Patch,
    PatchSplitResult, SemanticGroup, Symbol, SymbolKind, SymbolRole,
};
pub use self::core::pipeline::{
    CancelToken, DEFAULT_TARGET_PATCH_SIZE, SplitOptions, SplitPipeline, split_changes,
};
