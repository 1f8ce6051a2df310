//! Dependency inference between changes.
//!
//! Two-phase resolution over a qualified-name index: phase one re-extracts
//! (definitions, usages, imports) from each hunk's added lines; phase two
//! resolves usages and imports against indices keyed by package hint and
//! file. Stdlib-only and external-only import matches are dropped so common
//! aliases cannot fabricate edges.

use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use tracing::debug;

use crate::core::model::{Change, ChangeKind, Dependency, DependencyKind, SymbolKind};
use crate::core::symbols::{Extraction, Language};

/// Where an import points, as far as the classifier can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOrigin {
    Stdlib,
    External,
    Internal,
}

/// Per-change extraction results kept for the resolution pass.
struct AnalyzedChange<'a> {
    change: &'a Change,
    extraction: Extraction,
    bare_calls: Vec<String>,
}

/// Infer typed, weighted dependency edges between the given changes.
pub fn analyze_dependencies(changes: &[Change]) -> Vec<Dependency> {
    let analyzed: Vec<AnalyzedChange> = changes
        .iter()
        .map(|change| {
            let language = Language::from_path(&change.file);
            let added = added_text(change);
            let extraction = if added.is_empty() {
                Extraction::default()
            } else {
                language.extract_all(&added, &change.file, change.line_range.0)
            };
            let bare_calls = bare_call_candidates(&added);
            AnalyzedChange {
                change,
                extraction,
                bare_calls,
            }
        })
        .collect();

    // Qualified symbol index: "<package_hint>.<Name>" and "<file>:<Name>",
    // plus a package index over defining directories.
    let mut qualified_index: IndexMap<String, String> = IndexMap::new();
    let mut package_index: IndexMap<String, IndexSet<String>> = IndexMap::new();

    for a in &analyzed {
        let dir = a.change.parent_dir();
        let hint = dir.rsplit('/').next().unwrap_or(dir);

        // File stem doubles as the module name for dotted-import languages
        let stem = a
            .change
            .file
            .rsplit('/')
            .next()
            .and_then(|f| f.split('.').next())
            .unwrap_or("");

        for def in &a.extraction.definitions {
            if !def.kind.is_definition_kind() {
                continue;
            }
            if !hint.is_empty() {
                qualified_index
                    .entry(format!("{hint}.{}", def.name))
                    .or_insert_with(|| a.change.id.clone());
            }
            if !stem.is_empty() && stem != hint {
                qualified_index
                    .entry(format!("{stem}.{}", def.name))
                    .or_insert_with(|| a.change.id.clone());
            }
            qualified_index
                .entry(format!("{}:{}", a.change.file, def.name))
                .or_insert_with(|| a.change.id.clone());

            package_index
                .entry(dir.to_string())
                .or_default()
                .insert(a.change.id.clone());
        }
    }

    let change_kinds: IndexMap<&str, ChangeKind> =
        changes.iter().map(|c| (c.id.as_str(), c.kind)).collect();

    let mut dependencies: Vec<Dependency> = Vec::new();
    let mut seen: IndexSet<(String, String, DependencyKind)> = IndexSet::new();

    let mut push_edge = |deps: &mut Vec<Dependency>,
                         source: &str,
                         target: &str,
                         kind: DependencyKind,
                         reason: String| {
        if source == target {
            return;
        }
        if !seen.insert((source.to_string(), target.to_string(), kind)) {
            return;
        }
        let strength = edge_strength(change_kinds.get(source), change_kinds.get(target));
        deps.push(Dependency {
            source: source.to_string(),
            target: target.to_string(),
            kind,
            strength,
            reason,
        });
    };

    for a in &analyzed {
        // Qualified usages against the symbol index
        for usage in &a.extraction.usages {
            let qualified = usage.qualified();
            if let Some(target) = lookup_qualified(&qualified_index, &qualified) {
                let kind = resolve_edge_kind(usage.kind, change_kinds.get(target.as_str()));
                push_edge(
                    &mut dependencies,
                    &a.change.id,
                    target,
                    kind,
                    format!("{} uses {qualified} defined in {target}", a.change.id),
                );
                continue;
            }
            // Same-file lookup by bare name
            let same_file = format!("{}:{}", a.change.file, usage.name);
            if let Some(target) = qualified_index.get(&same_file) {
                let kind = resolve_edge_kind(usage.kind, change_kinds.get(target.as_str()));
                push_edge(
                    &mut dependencies,
                    &a.change.id,
                    target,
                    kind,
                    format!("{} uses {} defined in {target}", a.change.id, usage.name),
                );
            }
        }

        // Bare call sites resolve only within the same file; names the hunk
        // itself defines are declaration heads, not calls
        let own_defs: IndexSet<&str> = a
            .extraction
            .definitions
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        for name in &a.bare_calls {
            if own_defs.contains(name.as_str()) {
                continue;
            }
            let key = format!("{}:{name}", a.change.file);
            if let Some(target) = qualified_index.get(&key) {
                let kind = match change_kinds.get(target.as_str()) {
                    Some(ChangeKind::Modify) => DependencyKind::ModifiesUses,
                    _ => DependencyKind::DefinesUses,
                };
                push_edge(
                    &mut dependencies,
                    &a.change.id,
                    target,
                    kind,
                    format!("{} calls {name} defined in {target}", a.change.id),
                );
            }
        }

        // Imports against the package index
        let language = Language::from_path(&a.change.file);
        for (alias, path) in &a.extraction.imports {
            if classify_import(language, path) != ImportOrigin::Internal {
                continue;
            }
            let import_pkg = package_tail(path);
            for (dir, defining) in &package_index {
                let dir_name = dir.rsplit('/').next().unwrap_or(dir);
                if dir_name.is_empty() || dir_name != import_pkg {
                    continue;
                }
                for target in defining {
                    push_edge(
                        &mut dependencies,
                        &a.change.id,
                        target,
                        DependencyKind::Import,
                        format!(
                            "{} imports {path} (as {alias}) provided by {target}",
                            a.change.id
                        ),
                    );
                }
            }
        }
    }

    debug!(
        changes = changes.len(),
        dependencies = dependencies.len(),
        "dependency analysis complete"
    );

    dependencies
}

/// Resolve a qualified name against the index, retrying with the final
/// `<package>.<Name>` pair so full dotted module paths still hit the
/// package-hint keys.
fn lookup_qualified<'a>(
    index: &'a IndexMap<String, String>,
    qualified: &str,
) -> Option<&'a String> {
    if let Some(hit) = index.get(qualified) {
        return Some(hit);
    }
    let mut segments = qualified.rsplitn(3, '.');
    let name = segments.next()?;
    let pkg = segments.next()?;
    if segments.next().is_some() {
        return index.get(&format!("{pkg}.{name}"));
    }
    None
}

/// Both endpoints Add -> orderable 0.8, anything else -> critical 1.0.
fn edge_strength(source: Option<&ChangeKind>, target: Option<&ChangeKind>) -> f64 {
    match (source, target) {
        (Some(ChangeKind::Add), Some(ChangeKind::Add)) => 0.8,
        _ => 1.0,
    }
}

/// Edge kind for an index hit: type-position usages become type deps,
/// everything else is defines/modifies depending on the defining change.
fn resolve_edge_kind(usage_kind: SymbolKind, target: Option<&ChangeKind>) -> DependencyKind {
    if matches!(usage_kind, SymbolKind::Type | SymbolKind::Interface) {
        return DependencyKind::TypeDependency;
    }
    match target {
        Some(ChangeKind::Modify) => DependencyKind::ModifiesUses,
        _ => DependencyKind::DefinesUses,
    }
}

/// The added (`+`) lines of a hunk, prefix stripped, joined with newlines.
pub fn added_text(change: &Change) -> String {
    change
        .content
        .lines()
        .filter(|l| l.starts_with('+') && !l.starts_with("+++"))
        .map(|l| &l[1..])
        .collect::<Vec<_>>()
        .join("\n")
}

/// Identifier-before-paren call candidates, minus control-flow keywords.
fn bare_call_candidates(code: &str) -> Vec<String> {
    const KEYWORDS: &[&str] = &[
        "if", "for", "while", "def", "class", "return", "switch", "match", "catch", "fn", "func",
        "new", "super", "print", "len", "range", "str", "int", "isinstance", "type",
    ];

    let re = Regex::new(r"\b([a-zA-Z_][a-zA-Z0-9_]*)\s*\(").expect("static call pattern");
    let mut out: IndexSet<String> = IndexSet::new();
    for cap in re.captures_iter(code) {
        let name = &cap[1];
        if !KEYWORDS.contains(&name) {
            out.insert(name.to_string());
        }
    }
    out.into_iter().collect()
}

/// Final path segment of an import, whatever the separator convention.
fn package_tail(path: &str) -> &str {
    path.rsplit(['/', '.']).find(|s| !s.is_empty()).unwrap_or(path)
}

/// Classify an import path as stdlib, external, or internal.
///
/// URL-like hosts (a dot in the first segment) are external; per-language
/// stdlib allowlists catch the rest. Everything unmatched is treated as
/// internal, which is safe because import edges only materialize when a
/// changed package directory actually matches.
pub fn classify_import(language: Language, path: &str) -> ImportOrigin {
    let first = path
        .split(['/', '.', ':'])
        .find(|s| !s.is_empty())
        .unwrap_or(path);

    match language {
        Language::Go => {
            // Module paths carry a host as their first segment
            if path.split('/').next().is_some_and(|seg| seg.contains('.')) {
                return ImportOrigin::External;
            }
            const GO_STDLIB: &[&str] = &[
                "bufio", "bytes", "cmp", "context", "crypto", "database", "embed", "encoding",
                "errors", "flag", "fmt", "hash", "html", "image", "io", "iter", "log", "maps",
                "math", "mime", "net", "os", "path", "reflect", "regexp", "runtime", "slices",
                "sort", "strconv", "strings", "sync", "syscall", "testing", "time", "unicode",
                "unsafe",
            ];
            if GO_STDLIB.contains(&first) {
                ImportOrigin::Stdlib
            } else {
                ImportOrigin::Internal
            }
        }
        Language::Python => {
            const PY_STDLIB: &[&str] = &[
                "abc", "argparse", "asyncio", "base64", "collections", "contextlib", "copy",
                "csv", "dataclasses", "datetime", "enum", "functools", "hashlib", "io",
                "itertools", "json", "logging", "math", "os", "pathlib", "pickle", "random",
                "re", "shutil", "socket", "string", "struct", "subprocess", "sys", "tempfile",
                "threading", "time", "traceback", "types", "typing", "unittest", "urllib",
                "uuid", "warnings", "weakref",
            ];
            if PY_STDLIB.contains(&first) {
                ImportOrigin::Stdlib
            } else {
                ImportOrigin::Internal
            }
        }
        Language::Javascript | Language::Typescript => {
            if path.starts_with("node:") {
                return ImportOrigin::Stdlib;
            }
            // Bare specifiers resolve from node_modules; relative paths are ours
            if path.starts_with('.') || path.starts_with('/') {
                ImportOrigin::Internal
            } else {
                ImportOrigin::External
            }
        }
        Language::Java => {
            if matches!(first, "java" | "javax" | "jakarta" | "jdk" | "sun") {
                ImportOrigin::Stdlib
            } else {
                ImportOrigin::Internal
            }
        }
        Language::Rust => {
            if matches!(first, "std" | "core" | "alloc") {
                ImportOrigin::Stdlib
            } else {
                ImportOrigin::Internal
            }
        }
        Language::C | Language::Cpp | Language::Unknown => ImportOrigin::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diff::parse_diff;

    #[test]
    fn same_file_definition_and_call_is_orderable() {
        // S1: add-only definition + use in one file
        let diff = "\
diff --git a/app/util.py b/app/util.py
--- a/app/util.py
+++ b/app/util.py
@@ -0,0 +1,2 @@
+def greet(name):
+    return name
@@ -10,0 +12,2 @@
+def main():
+    greet(\"Alice\")
";
        let changes = parse_diff(diff);
        assert_eq!(changes.len(), 2);

        let deps = analyze_dependencies(&changes);
        assert_eq!(deps.len(), 1);
        let dep = &deps[0];
        assert_eq!(dep.source, "app/util.py:hunk_1");
        assert_eq!(dep.target, "app/util.py:hunk_0");
        assert_eq!(dep.kind, DependencyKind::DefinesUses);
        assert!((dep.strength - 0.8).abs() < 1e-9);
    }

    #[test]
    fn cross_file_modify_is_critical() {
        // S2: types.py adds User, controller.py (modify) imports and uses it
        let diff = "\
diff --git a/app/types.py b/app/types.py
--- a/app/types.py
+++ b/app/types.py
@@ -0,0 +1,2 @@
+class User:
+    pass
diff --git a/app/controller.py b/app/controller.py
--- a/app/controller.py
+++ b/app/controller.py
@@ -1,3 +1,5 @@
 import os
+from app.types import User
+handler = User()
 x = 1
";
        let changes = parse_diff(diff);
        let deps = analyze_dependencies(&changes);

        let dep = deps
            .iter()
            .find(|d| d.source == "app/controller.py:hunk_0" && d.target == "app/types.py:hunk_0")
            .expect("controller depends on types");
        assert!((dep.strength - 1.0).abs() < 1e-9);
    }

    #[test]
    fn duplicate_edges_are_suppressed() {
        let diff = "\
diff --git a/app/util.py b/app/util.py
--- a/app/util.py
+++ b/app/util.py
@@ -0,0 +1,2 @@
+def greet(name):
+    return name
@@ -10,0 +12,3 @@
+def main():
+    greet(\"a\")
+    greet(\"b\")
";
        let changes = parse_diff(diff);
        let deps = analyze_dependencies(&changes);
        assert_eq!(deps.len(), 1);
    }

    #[test]
    fn stdlib_imports_never_create_edges() {
        assert_eq!(classify_import(Language::Python, "os.path"), ImportOrigin::Stdlib);
        assert_eq!(classify_import(Language::Go, "fmt"), ImportOrigin::Stdlib);
        assert_eq!(
            classify_import(Language::Go, "github.com/rs/zerolog"),
            ImportOrigin::External
        );
        assert_eq!(
            classify_import(Language::Typescript, "react"),
            ImportOrigin::External
        );
        assert_eq!(
            classify_import(Language::Typescript, "./models"),
            ImportOrigin::Internal
        );
        assert_eq!(
            classify_import(Language::Java, "java.util.List"),
            ImportOrigin::Stdlib
        );
        assert_eq!(
            classify_import(Language::Python, "app.models"),
            ImportOrigin::Internal
        );
    }

    #[test]
    fn import_edge_targets_defining_package() {
        let diff = "\
diff --git a/app/models/user.py b/app/models/user.py
--- a/app/models/user.py
+++ b/app/models/user.py
@@ -0,0 +1,2 @@
+class User:
+    pass
diff --git a/app/api.py b/app/api.py
--- a/app/api.py
+++ b/app/api.py
@@ -0,0 +1,2 @@
+from app import models
+m = models
";
        let changes = parse_diff(diff);
        let deps = analyze_dependencies(&changes);
        assert!(
            deps.iter().any(|d| d.kind == DependencyKind::Import
                && d.source == "app/api.py:hunk_0"
                && d.target == "app/models/user.py:hunk_0")
        );
    }

    #[test]
    fn bare_call_keywords_are_ignored() {
        let calls = bare_call_candidates("if (x) { return foo(1) } while(1) {}");
        assert_eq!(calls, vec!["foo".to_string()]);
    }
}
