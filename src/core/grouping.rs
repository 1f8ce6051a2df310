//! Heuristic semantic grouping of related changes.
//!
//! Groups are soft hints with a cohesion score in [0,1]; they may overlap
//! and only bias the splitter's merging pass. Producers: file proximity,
//! rename patterns, extract patterns, API change plus usages, and symbol
//! co-occurrence.

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::core::model::{AtomicGroup, Change, ChangeKind, SemanticGroup, SymbolKind};

/// Identify semantic groups over all changes.
pub fn identify_semantic_groups(
    changes: &[Change],
    _atomic_groups: &[AtomicGroup],
) -> Vec<SemanticGroup> {
    let mut groups = Vec::new();

    groups.extend(group_by_file(changes));
    groups.extend(detect_renames(changes));
    groups.extend(detect_extractions(changes));
    groups.extend(detect_api_changes(changes));
    groups.extend(group_by_symbol_overlap(changes));

    let deduped = deduplicate(groups);
    debug!(groups = deduped.len(), "semantic grouping complete");
    deduped
}

/// All changes in one file form a group; cohesion falls with the mean line
/// gap between adjacent hunks, floored at 0.5.
fn group_by_file(changes: &[Change]) -> Vec<SemanticGroup> {
    let mut by_file: IndexMap<&str, Vec<&Change>> = IndexMap::new();
    for change in changes {
        by_file.entry(change.file.as_str()).or_default().push(change);
    }

    by_file
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .enumerate()
        .map(|(idx, (file, members))| {
            let mut ranges: Vec<(usize, usize)> =
                members.iter().map(|c| c.line_range).collect();
            ranges.sort_unstable();

            let total_gap: usize = ranges
                .windows(2)
                .map(|w| w[1].0.saturating_sub(w[0].1))
                .sum();
            let avg_gap = total_gap as f64 / (ranges.len() - 1) as f64;
            let cohesion = (1.0 - avg_gap / 100.0).max(0.5);

            SemanticGroup {
                id: format!("file_{idx}"),
                name: format!("Changes in {file}"),
                change_ids: members.iter().map(|c| c.id.clone()).collect(),
                description: format!("Multiple changes in the same file: {file}"),
                cohesion_score: cohesion,
            }
        })
        .collect()
}

/// A non-import symbol name touched by three or more changes reads as a
/// rename sweep.
fn detect_renames(changes: &[Change]) -> Vec<SemanticGroup> {
    let mut by_symbol: IndexMap<&str, IndexSet<&str>> = IndexMap::new();
    for change in changes {
        for symbol in &change.symbols {
            if symbol.kind == SymbolKind::Import {
                continue;
            }
            by_symbol
                .entry(symbol.name.as_str())
                .or_default()
                .insert(change.id.as_str());
        }
    }

    by_symbol
        .into_iter()
        .filter(|(_, ids)| ids.len() >= 3)
        .enumerate()
        .map(|(idx, (name, ids))| SemanticGroup {
            id: format!("rename_{idx}"),
            name: format!("Rename '{name}'"),
            change_ids: ids.iter().map(|s| s.to_string()).collect(),
            description: format!("Rename refactoring affecting symbol: {name}"),
            cohesion_score: 0.95,
        })
        .collect()
}

/// A new add that defines a function/class paired with deletions in the
/// same or a related file looks like an extraction.
fn detect_extractions(changes: &[Change]) -> Vec<SemanticGroup> {
    let new_definitions: Vec<&Change> = changes
        .iter()
        .filter(|c| {
            c.kind == ChangeKind::Add
                && c.symbols
                    .iter()
                    .any(|s| matches!(s.kind, SymbolKind::Function | SymbolKind::Class))
        })
        .collect();

    let deletions: Vec<&Change> = changes
        .iter()
        .filter(|c| c.kind == ChangeKind::Delete)
        .collect();

    new_definitions
        .iter()
        .enumerate()
        .filter_map(|(idx, new_def)| {
            let related: Vec<String> = deletions
                .iter()
                .filter(|d| d.file == new_def.file || files_related(&d.file, &new_def.file))
                .map(|d| d.id.clone())
                .collect();
            if related.is_empty() {
                return None;
            }

            let symbol_names: Vec<&str> = new_def
                .symbols
                .iter()
                .filter(|s| matches!(s.kind, SymbolKind::Function | SymbolKind::Class))
                .map(|s| s.name.as_str())
                .collect();

            let mut change_ids = vec![new_def.id.clone()];
            change_ids.extend(related);

            Some(SemanticGroup {
                id: format!("extract_{idx}"),
                name: format!("Extract {}", symbol_names.join(", ")),
                change_ids,
                description: "Extract method/class refactoring".to_string(),
                cohesion_score: 0.9,
            })
        })
        .collect()
}

/// A modify touching a function/method definition plus every other change
/// whose symbols mention that name.
fn detect_api_changes(changes: &[Change]) -> Vec<SemanticGroup> {
    let api_modifications: Vec<&Change> = changes
        .iter()
        .filter(|c| {
            c.kind == ChangeKind::Modify
                && c.symbols
                    .iter()
                    .any(|s| matches!(s.kind, SymbolKind::Function | SymbolKind::Method))
        })
        .collect();

    api_modifications
        .iter()
        .enumerate()
        .filter_map(|(idx, api_change)| {
            let names: IndexSet<&str> = api_change
                .symbols
                .iter()
                .filter(|s| matches!(s.kind, SymbolKind::Function | SymbolKind::Method))
                .map(|s| s.name.as_str())
                .collect();

            let related: Vec<String> = changes
                .iter()
                .filter(|c| {
                    c.id != api_change.id
                        && c.symbols.iter().any(|s| names.contains(s.name.as_str()))
                })
                .map(|c| c.id.clone())
                .collect();
            if related.is_empty() {
                return None;
            }

            let mut change_ids = vec![api_change.id.clone()];
            change_ids.extend(related);
            let name_list: Vec<&str> = names.iter().copied().collect();

            Some(SemanticGroup {
                id: format!("api_{idx}"),
                name: format!("API change: {}", name_list.join(", ")),
                change_ids,
                description: "API modification and usage updates".to_string(),
                cohesion_score: 0.85,
            })
        })
        .collect()
}

/// Greedy clustering of changes whose symbol-name sets overlap with
/// Jaccard similarity above 0.3.
fn group_by_symbol_overlap(changes: &[Change]) -> Vec<SemanticGroup> {
    // Only names shared by at least two changes are discriminative
    let mut symbol_to_changes: IndexMap<&str, IndexSet<&str>> = IndexMap::new();
    for change in changes {
        for symbol in &change.symbols {
            symbol_to_changes
                .entry(symbol.name.as_str())
                .or_default()
                .insert(change.id.as_str());
        }
    }

    let mut change_symbols: IndexMap<&str, IndexSet<&str>> = IndexMap::new();
    for (name, ids) in &symbol_to_changes {
        if ids.len() >= 2 {
            for id in ids {
                change_symbols.entry(id).or_default().insert(name);
            }
        }
    }

    let mut groups = Vec::new();
    let mut processed: IndexSet<&str> = IndexSet::new();

    let ids: Vec<&str> = change_symbols.keys().copied().collect();
    for (idx, &id) in ids.iter().enumerate() {
        if processed.contains(id) {
            continue;
        }
        let mine = &change_symbols[id];
        let mut related = vec![id.to_string()];

        for &other in &ids {
            if other == id || processed.contains(other) {
                continue;
            }
            let theirs = &change_symbols[other];
            let intersection = mine.intersection(theirs).count();
            let union = mine.union(theirs).count();
            if union > 0 && intersection as f64 / union as f64 > 0.3 {
                related.push(other.to_string());
                processed.insert(other);
            }
        }

        if related.len() >= 2 {
            processed.insert(id);
            let sample: Vec<&str> = mine.iter().take(3).copied().collect();
            groups.push(SemanticGroup {
                id: format!("symbol_{idx}"),
                name: "Related symbol changes".to_string(),
                change_ids: related,
                description: format!("Changes affecting related symbols: {}", sample.join(", ")),
                cohesion_score: 0.7,
            });
        }
    }

    groups
}

/// Same directory, or one file's stem contains the other's.
fn files_related(file1: &str, file2: &str) -> bool {
    let dir = |f: &str| f.rsplit_once('/').map(|(d, _)| d.to_string()).unwrap_or_default();
    if dir(file1) == dir(file2) {
        return true;
    }

    let stem = |f: &str| {
        f.rsplit('/')
            .next()
            .and_then(|base| base.split('.').next())
            .unwrap_or("")
            .to_string()
    };
    let s1 = stem(file1);
    let s2 = stem(file2);
    !s1.is_empty() && !s2.is_empty() && (s1.contains(&s2) || s2.contains(&s1))
}

/// Sort by cohesion descending and accept a group only while its overlap
/// with already-covered changes stays under 50%.
fn deduplicate(mut groups: Vec<SemanticGroup>) -> Vec<SemanticGroup> {
    groups.sort_by(|a, b| {
        b.cohesion_score
            .partial_cmp(&a.cohesion_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut unique = Vec::new();
    let mut covered: IndexSet<String> = IndexSet::new();

    for group in groups {
        if group.change_ids.is_empty() {
            continue;
        }
        let overlap = group
            .change_ids
            .iter()
            .filter(|id| covered.contains(*id))
            .count();
        let ratio = overlap as f64 / group.change_ids.len() as f64;
        if ratio < 0.5 {
            covered.extend(group.change_ids.iter().cloned());
            unique.push(group);
        }
    }

    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Symbol, SymbolRole};

    fn change_with_symbols(
        file: &str,
        hunk: usize,
        kind: ChangeKind,
        range: (usize, usize),
        symbols: &[(&str, SymbolKind)],
    ) -> Change {
        Change {
            id: Change::make_id(file, hunk),
            file: file.to_string(),
            hunk_index: hunk,
            kind,
            symbols: symbols
                .iter()
                .map(|(name, k)| Symbol {
                    name: name.to_string(),
                    kind: *k,
                    file: file.to_string(),
                    line: range.0,
                    role: SymbolRole::Definition,
                    package: None,
                    qualified_name: None,
                    scope: None,
                })
                .collect(),
            line_range: range,
            content: String::new(),
            added_lines: range.1.saturating_sub(range.0),
            removed_lines: 0,
        }
    }

    #[test]
    fn adjacent_hunks_in_one_file_are_highly_cohesive() {
        let changes = vec![
            change_with_symbols("a.py", 0, ChangeKind::Add, (1, 10), &[]),
            change_with_symbols("a.py", 1, ChangeKind::Add, (12, 20), &[]),
        ];
        let groups = group_by_file(&changes);
        assert_eq!(groups.len(), 1);
        assert!(groups[0].cohesion_score > 0.9);
    }

    #[test]
    fn distant_hunks_floor_at_half_cohesion() {
        let changes = vec![
            change_with_symbols("a.py", 0, ChangeKind::Add, (1, 10), &[]),
            change_with_symbols("a.py", 1, ChangeKind::Add, (900, 910), &[]),
        ];
        let groups = group_by_file(&changes);
        assert!((groups[0].cohesion_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn rename_requires_three_touchpoints() {
        // S5 shape: the same symbol across many changes
        let foo = &[("Foo", SymbolKind::Class)];
        let changes = vec![
            change_with_symbols("a.py", 0, ChangeKind::Modify, (1, 5), foo),
            change_with_symbols("b.py", 0, ChangeKind::Modify, (1, 5), foo),
            change_with_symbols("c.py", 0, ChangeKind::Modify, (1, 5), foo),
            change_with_symbols("d.py", 0, ChangeKind::Modify, (1, 5), foo),
        ];
        let groups = detect_renames(&changes);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].change_ids.len(), 4);
        assert!((groups[0].cohesion_score - 0.95).abs() < 1e-9);

        let too_few = &changes[..2];
        assert!(detect_renames(too_few).is_empty());
    }

    #[test]
    fn extraction_pairs_new_definition_with_deletions() {
        let changes = vec![
            change_with_symbols(
                "app/helpers.py",
                0,
                ChangeKind::Add,
                (1, 20),
                &[("render", SymbolKind::Function)],
            ),
            change_with_symbols("app/views.py", 0, ChangeKind::Delete, (40, 60), &[]),
        ];
        let groups = detect_extractions(&changes);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].change_ids.len(), 2);
        assert!((groups[0].cohesion_score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn api_change_collects_usage_updates() {
        let changes = vec![
            change_with_symbols(
                "api.py",
                0,
                ChangeKind::Modify,
                (1, 5),
                &[("fetch", SymbolKind::Function)],
            ),
            change_with_symbols(
                "caller.py",
                0,
                ChangeKind::Modify,
                (1, 5),
                &[("fetch", SymbolKind::Function)],
            ),
        ];
        let groups = detect_api_changes(&changes);
        assert!(!groups.is_empty());
        assert!(groups[0].change_ids.contains(&"api.py:hunk_0".to_string()));
        assert!(groups[0].change_ids.contains(&"caller.py:hunk_0".to_string()));
    }

    #[test]
    fn dedup_prefers_higher_cohesion() {
        let g = |id: &str, cohesion: f64, ids: &[&str]| SemanticGroup {
            id: id.to_string(),
            name: id.to_string(),
            change_ids: ids.iter().map(|s| s.to_string()).collect(),
            description: String::new(),
            cohesion_score: cohesion,
        };
        let groups = vec![
            g("low", 0.6, &["a", "b"]),
            g("high", 0.95, &["a", "b", "c"]),
        ];
        let unique = deduplicate(groups);
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].id, "high");
    }

    #[test]
    fn related_files_by_stem() {
        assert!(files_related("app/foo.py", "app/bar.py"));
        assert!(files_related("app/foo.py", "tests/foo_test.py"));
        assert!(!files_related("app/foo.py", "lib/baz.py"));
    }
}
