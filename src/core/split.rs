//! Packing changes into size-targeted, dependency-ordered patches.
//!
//! Atomic groups seed the candidates, a layered split handles new-feature
//! diffs, loose hunks become singletons, and a greedy merge pass combines
//! candidates that either must not be separated or are semantically close
//! enough. Final ids are dense and assigned in topological order, so every
//! prerequisite id is strictly smaller than its dependent.

use indexmap::{IndexMap, IndexSet};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, warn};

use crate::core::graph::{DependencyGraph, is_interface_file};
use crate::core::model::{AtomicGroup, Change, ChangeKind, Patch, SemanticGroup};

/// Fraction of Add changes above which the layered split kicks in.
const NEW_FEATURE_ADD_RATIO: f64 = 0.7;

/// Hard warning thresholds on emitted patches.
const LARGE_PATCH_LINES: usize = 500;
const MANY_CHANGES: usize = 20;

/// Naming hook: the enhancer provides (name, description) pairs when
/// configured; `None` falls back to the heuristic namer.
pub trait PatchNamer {
    fn name_patch(&self, changes: &[&Change], previous: &[Patch]) -> Option<(String, String)>;
}

/// Namer that always defers to the heuristic.
pub struct HeuristicNamer;

impl PatchNamer for HeuristicNamer {
    fn name_patch(&self, _changes: &[&Change], _previous: &[Patch]) -> Option<(String, String)> {
        None
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    change_ids: IndexSet<String>,
    size: usize,
    atomic: bool,

    /// Keep this name over the structural fallback (atomic/layer buckets)
    curated: bool,
    name: String,
}

/// Split changes into patches respecting atomic groups, dependencies, and
/// the caller's size target.
pub fn split_into_patches(
    graph: &DependencyGraph,
    changes: &[Change],
    atomic_groups: &[AtomicGroup],
    semantic_groups: &[SemanticGroup],
    target_patch_size: usize,
    max_patches: Option<usize>,
    namer: &dyn PatchNamer,
) -> Vec<Patch> {
    let change_map: IndexMap<&str, &Change> =
        changes.iter().map(|c| (c.id.as_str(), c)).collect();

    let add_count = changes.iter().filter(|c| c.kind == ChangeKind::Add).count();
    let new_feature =
        !changes.is_empty() && add_count as f64 > NEW_FEATURE_ADD_RATIO * changes.len() as f64;
    debug!(new_feature, add_count, total = changes.len(), "splitter start");

    let mut candidates: Vec<Candidate> = Vec::new();
    let mut assigned: IndexSet<String> = IndexSet::new();

    // Atomic groups are indivisible building blocks
    for group in atomic_groups {
        let size = group
            .change_ids
            .iter()
            .filter_map(|id| change_map.get(id.as_str()))
            .map(|c| c.changed_lines())
            .sum();
        candidates.push(Candidate {
            change_ids: group.change_ids.iter().cloned().collect(),
            size,
            atomic: true,
            curated: true,
            name: truncated(&format!("Atomic: {}", group.reason), 57),
        });
        assigned.extend(group.change_ids.iter().cloned());
    }

    if new_feature {
        let layered = layered_candidates(changes, &assigned, target_patch_size);
        for candidate in &layered {
            assigned.extend(candidate.change_ids.iter().cloned());
        }
        candidates.extend(layered);
    }

    // Loose changes become their own candidates
    for change in changes {
        if assigned.contains(&change.id) {
            continue;
        }
        candidates.push(Candidate {
            change_ids: IndexSet::from([change.id.clone()]),
            size: change.changed_lines(),
            atomic: false,
            curated: false,
            name: format!("Change in {}", change.file),
        });
    }

    let mut merged = merge_candidates(graph, candidates, semantic_groups, target_patch_size);

    if let Some(cap) = max_patches {
        enforce_max_patches(&mut merged, cap);
    }

    let patches = build_patches(&merged, &change_map, namer);
    order_and_renumber(graph, patches)
}

fn truncated(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        s.to_string()
    } else {
        s.chars().take(limit).collect()
    }
}

/// Layer classification for the new-feature split, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layer {
    Interfaces,
    Utilities,
    Implementation,
    Controllers,
}

fn classify_layer(file: &str) -> Layer {
    let lower = file.to_ascii_lowercase();
    if is_interface_file(&lower) {
        return Layer::Interfaces;
    }
    if lower.contains("/util") || lower.contains("helper") {
        return Layer::Utilities;
    }
    if lower.contains("/controller") || lower.contains("handler") || lower.contains("/api/") {
        return Layer::Controllers;
    }
    Layer::Implementation
}

/// New-feature diffs split into interfaces -> utilities -> implementation
/// (one bucket per directory, small directories merged toward the target)
/// -> controllers.
fn layered_candidates(
    changes: &[Change],
    assigned: &IndexSet<String>,
    target_size: usize,
) -> Vec<Candidate> {
    let mut interfaces: Vec<&Change> = Vec::new();
    let mut utilities: Vec<&Change> = Vec::new();
    let mut implementations: IndexMap<String, Vec<&Change>> = IndexMap::new();
    let mut controllers: Vec<&Change> = Vec::new();

    for change in changes {
        if assigned.contains(&change.id) {
            continue;
        }
        match classify_layer(&change.file) {
            Layer::Interfaces => interfaces.push(change),
            Layer::Utilities => utilities.push(change),
            Layer::Controllers => controllers.push(change),
            Layer::Implementation => implementations
                .entry(change.parent_dir().to_string())
                .or_default()
                .push(change),
        }
    }

    let bucket = |members: &[&Change], name: &str| -> Option<Candidate> {
        if members.is_empty() {
            return None;
        }
        Some(Candidate {
            change_ids: members.iter().map(|c| c.id.clone()).collect(),
            size: members.iter().map(|c| c.changed_lines()).sum(),
            atomic: false,
            curated: true,
            name: name.to_string(),
        })
    };

    let mut candidates = Vec::new();
    candidates.extend(bucket(&interfaces, "Interfaces and data models"));
    candidates.extend(bucket(&utilities, "Shared utilities"));

    // Merge small implementation sub-packages into the previous bucket
    // until the running size approaches the target
    let mut pending: Vec<(String, Vec<&Change>)> = Vec::new();
    for (dir, members) in implementations {
        let member_size: usize = members.iter().map(|c| c.changed_lines()).sum();
        match pending.last_mut() {
            Some((_, acc))
                if acc.iter().map(|c| c.changed_lines()).sum::<usize>() + member_size
                    <= target_size =>
            {
                acc.extend(members);
            }
            _ => pending.push((dir, members)),
        }
    }
    for (dir, members) in pending {
        candidates.extend(bucket(&members, &format!("Implementation: {dir}")));
    }

    candidates.extend(bucket(&controllers, "Controllers and handlers"));
    candidates
}

/// Greedy left-to-right merge. A pair merges when separation is forbidden
/// (shared strength-1.0 edge or bidirectional path), or when the combined
/// size stays within 1.5x the target and the semantic-group overlap is
/// high enough.
fn merge_candidates(
    graph: &DependencyGraph,
    candidates: Vec<Candidate>,
    semantic_groups: &[SemanticGroup],
    target_size: usize,
) -> Vec<Candidate> {
    let mut membership: IndexMap<&str, IndexSet<&str>> = IndexMap::new();
    for group in semantic_groups {
        for id in &group.change_ids {
            membership
                .entry(id.as_str())
                .or_default()
                .insert(group.id.as_str());
        }
    }

    let group_ids = |ids: &IndexSet<String>| -> IndexSet<&str> {
        ids.iter()
            .filter_map(|id| membership.get(id.as_str()))
            .flatten()
            .copied()
            .collect()
    };

    let mut merged: Vec<Candidate> = Vec::new();
    let mut used = vec![false; candidates.len()];

    for i in 0..candidates.len() {
        if used[i] {
            continue;
        }
        let mut current = candidates[i].clone();
        used[i] = true;

        for j in (i + 1)..candidates.len() {
            if used[j] {
                continue;
            }
            let other = &candidates[j];

            let must_merge = current.change_ids.iter().any(|a| {
                other
                    .change_ids
                    .iter()
                    .any(|b| !graph.can_separate(a, b))
            });

            // A splittable dependency between the candidates means the
            // definition/usage sequencing is wanted as separate patches
            let ordering_edge = || {
                current.change_ids.iter().any(|a| {
                    other
                        .change_ids
                        .iter()
                        .any(|b| graph.has_edge_between(a, b))
                })
            };

            let should_merge = if must_merge {
                true
            } else if current.size + other.size > target_size * 3 / 2 || ordering_edge() {
                false
            } else {
                let mine = group_ids(&current.change_ids);
                let theirs = group_ids(&other.change_ids);
                let intersection = mine.intersection(&theirs).count();
                let union = mine.union(&theirs).count();
                union > 0 && intersection as f64 / union as f64 > 0.5
            };

            if should_merge {
                current.change_ids.extend(other.change_ids.iter().cloned());
                current.size += other.size;
                current.atomic = current.atomic || other.atomic;
                used[j] = true;
            }
        }

        merged.push(current);
    }

    merged
}

/// Honor `--max-patches` by folding the smallest candidate into its
/// smallest peer until the cap holds. Merging only grows candidates, so
/// atomic groups stay intact.
fn enforce_max_patches(candidates: &mut Vec<Candidate>, cap: usize) {
    let cap = cap.max(1);
    while candidates.len() > cap {
        let smallest = candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| c.size)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let folded = candidates.remove(smallest);

        let host_idx = candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| c.size)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let host = &mut candidates[host_idx];
        host.change_ids.extend(folded.change_ids);
        host.size += folded.size;
        host.atomic = host.atomic || folded.atomic;
    }
}

/// Materialize candidates into Patch values with provisional ids.
fn build_patches(
    candidates: &[Candidate],
    change_map: &IndexMap<&str, &Change>,
    namer: &dyn PatchNamer,
) -> Vec<Patch> {
    let mut patches: Vec<Patch> = Vec::new();

    for (idx, candidate) in candidates.iter().enumerate() {
        let members: Vec<&Change> = candidate
            .change_ids
            .iter()
            .filter_map(|id| change_map.get(id.as_str()).copied())
            .collect();
        let size: usize = members.iter().map(|c| c.changed_lines()).sum();

        let mut warnings = Vec::new();
        if size > LARGE_PATCH_LINES {
            warnings.push(format!("Large patch: {size} lines"));
        }
        if members.len() > MANY_CHANGES {
            warnings.push(format!("Many changes: {} hunks", members.len()));
        }

        let (name, description) = namer
            .name_patch(&members, &patches)
            .unwrap_or_else(|| heuristic_name(&members, candidate));

        patches.push(Patch {
            id: idx,
            name,
            description,
            changes: candidate.change_ids.iter().cloned().collect(),
            depends_on: Vec::new(),
            size_lines: size,
            warnings,
        });
    }

    patches
}

/// Structural fallback naming when no enhancer is configured.
fn heuristic_name(members: &[&Change], candidate: &Candidate) -> (String, String) {
    let files: IndexSet<&str> = members.iter().map(|c| c.file.as_str()).collect();
    let mut symbols: IndexSet<&str> = IndexSet::new();
    for change in members {
        for symbol in change.symbols.iter().take(3) {
            symbols.insert(symbol.name.as_str());
        }
    }
    let top_symbols: Vec<&str> = symbols.iter().take(2).copied().collect();

    let name = if candidate.curated || files.is_empty() {
        candidate.name.clone()
    } else if files.len() == 1 {
        let file_name = files[0].rsplit('/').next().unwrap_or(files[0]);
        if top_symbols.is_empty() {
            format!("Changes in {file_name}")
        } else {
            format!("Update {file_name}: {}", top_symbols.join(", "))
        }
    } else if !top_symbols.is_empty() {
        format!("Update {}", top_symbols.join(", "))
    } else {
        candidate.name.clone()
    };

    let adds = members.iter().filter(|c| c.kind == ChangeKind::Add).count();
    let modifies = members
        .iter()
        .filter(|c| c.kind == ChangeKind::Modify)
        .count();
    let deletes = members
        .iter()
        .filter(|c| c.kind == ChangeKind::Delete)
        .count();

    let mut parts = Vec::new();
    if adds > 0 {
        parts.push(format!("{adds} additions"));
    }
    if modifies > 0 {
        parts.push(format!("{modifies} modifications"));
    }
    if deletes > 0 {
        parts.push(format!("{deletes} deletions"));
    }

    (name, parts.join(", "))
}

/// Build the patch prerequisite graph, topologically sort it with
/// prerequisites first, break cycles by removing one edge per SCC, then
/// renumber ids densely along the order.
fn order_and_renumber(graph: &DependencyGraph, mut patches: Vec<Patch>) -> Vec<Patch> {
    let n = patches.len();

    let mut patch_of_change: IndexMap<&str, usize> = IndexMap::new();
    for patch in &patches {
        for id in &patch.changes {
            patch_of_change.insert(id.as_str(), patch.id);
        }
    }

    // prereqs[b] = patches that must apply before patch b
    let mut prereqs: Vec<IndexSet<usize>> = vec![IndexSet::new(); n];
    for patch in &patches {
        for change_id in &patch.changes {
            for dep in graph.dependencies_of(change_id) {
                if let Some(&target_patch) = patch_of_change.get(dep.as_str())
                    && target_patch != patch.id
                {
                    prereqs[patch.id].insert(target_patch);
                }
            }
        }
    }

    // Edge dependent -> prerequisite, the same direction the change graph
    // uses; reversing the sorted result applies prerequisites first
    let mut pg: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..n).map(|i| pg.add_node(i)).collect();
    for (dependent, pre) in prereqs.iter().enumerate() {
        for &p in pre {
            pg.add_edge(nodes[dependent], nodes[p], ());
        }
    }

    let order: Vec<usize> = loop {
        match toposort(&pg, None) {
            Ok(sorted) => break sorted.into_iter().rev().map(|nx| pg[nx]).collect(),
            Err(_) => {
                // Remove one intra-SCC edge per cycle and retry
                let mut removed = false;
                for scc in tarjan_scc(&pg) {
                    if scc.len() < 2 {
                        continue;
                    }
                    'outer: for &a in &scc {
                        for b in pg.neighbors(a).collect::<Vec<_>>() {
                            if scc.contains(&b)
                                && let Some(e) = pg.find_edge(a, b)
                            {
                                warn!(
                                    dependent = pg[a],
                                    prerequisite = pg[b],
                                    "breaking patch dependency cycle"
                                );
                                pg.remove_edge(e);
                                removed = true;
                                break 'outer;
                            }
                        }
                    }
                }
                if !removed {
                    warn!("patch graph cycle breaking failed, keeping insertion order");
                    break (0..n).collect();
                }
            }
        }
    };

    // Dense renumbering along the topological order
    let mut new_id = vec![0usize; n];
    for (pos, &old) in order.iter().enumerate() {
        new_id[old] = pos;
    }

    for patch in &mut patches {
        let old = patch.id;
        patch.id = new_id[old];
        let mut deps: Vec<usize> = prereqs[old]
            .iter()
            .map(|&p| new_id[p])
            .filter(|&d| d < patch.id)
            .collect();
        deps.sort_unstable();
        deps.dedup();
        patch.depends_on = deps;
    }

    patches.sort_by_key(|p| p.id);
    patches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Dependency, DependencyKind};

    fn change(file: &str, hunk: usize, kind: ChangeKind, lines: usize) -> Change {
        Change {
            id: Change::make_id(file, hunk),
            file: file.to_string(),
            hunk_index: hunk,
            kind,
            symbols: vec![],
            line_range: (1, 1 + lines),
            content: String::new(),
            added_lines: if kind == ChangeKind::Delete { 0 } else { lines },
            removed_lines: if kind == ChangeKind::Delete { lines } else { 0 },
        }
    }

    fn dep(source: &str, target: &str, strength: f64) -> Dependency {
        Dependency {
            source: source.to_string(),
            target: target.to_string(),
            kind: DependencyKind::DefinesUses,
            strength,
            reason: String::new(),
        }
    }

    fn run(
        changes: Vec<Change>,
        deps: Vec<Dependency>,
        target: usize,
        max: Option<usize>,
    ) -> Vec<Patch> {
        let mut graph = DependencyGraph::new();
        graph.add_changes(&changes);
        graph.add_dependencies(&deps);
        let atomic = graph.find_atomic_groups();
        let semantic = crate::core::grouping::identify_semantic_groups(&changes, &atomic);
        split_into_patches(&graph, &changes, &atomic, &semantic, target, max, &HeuristicNamer)
    }

    #[test]
    fn ids_are_dense_and_prerequisites_smaller() {
        let changes = vec![
            change("use.py", 0, ChangeKind::Add, 30),
            change("def.py", 0, ChangeKind::Add, 30),
            change("other.py", 0, ChangeKind::Add, 400),
        ];
        let deps = vec![dep("use.py:hunk_0", "def.py:hunk_0", 0.8)];
        let patches = run(changes, deps, 50, None);

        let ids: Vec<usize> = patches.iter().map(|p| p.id).collect();
        assert_eq!(ids, (0..patches.len()).collect::<Vec<_>>());
        for patch in &patches {
            for &d in &patch.depends_on {
                assert!(d < patch.id);
            }
        }

        let def_patch = patches
            .iter()
            .find(|p| p.changes.contains(&"def.py:hunk_0".to_string()))
            .unwrap();
        let use_patch = patches
            .iter()
            .find(|p| p.changes.contains(&"use.py:hunk_0".to_string()))
            .unwrap();
        if def_patch.id != use_patch.id {
            assert!(def_patch.id < use_patch.id);
            assert!(use_patch.depends_on.contains(&def_patch.id));
        }
    }

    #[test]
    fn atomic_group_lands_in_exactly_one_patch() {
        // S3: mutual critical edges
        let changes = vec![
            change("a.py", 0, ChangeKind::Modify, 40),
            change("b.py", 0, ChangeKind::Modify, 40),
        ];
        let deps = vec![
            dep("a.py:hunk_0", "b.py:hunk_0", 1.0),
            dep("b.py:hunk_0", "a.py:hunk_0", 1.0),
        ];
        let patches = run(changes, deps, 50, None);

        let holders: Vec<&Patch> = patches
            .iter()
            .filter(|p| {
                p.changes.contains(&"a.py:hunk_0".to_string())
                    || p.changes.contains(&"b.py:hunk_0".to_string())
            })
            .collect();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].changes.len(), 2);
    }

    #[test]
    fn coverage_and_disjointness() {
        let changes: Vec<Change> = (0..8)
            .map(|i| change(&format!("f{i}.py"), 0, ChangeKind::Add, 25 * (i + 1)))
            .collect();
        let all_ids: IndexSet<String> = changes.iter().map(|c| c.id.clone()).collect();
        let patches = run(changes, vec![], 60, None);

        let mut seen: IndexSet<String> = IndexSet::new();
        for patch in &patches {
            for id in &patch.changes {
                assert!(seen.insert(id.clone()), "duplicate change {id}");
            }
        }
        assert_eq!(seen, all_ids);
    }

    #[test]
    fn new_feature_diff_splits_into_layers() {
        // S6 shape: mostly adds across types/utils/impl/handlers
        let mut changes = vec![
            change("app/types/user.ts", 0, ChangeKind::Add, 40),
            change("app/types/order.ts", 0, ChangeKind::Add, 40),
            change("app/utils/format.ts", 0, ChangeKind::Add, 30),
            change("app/utils/parse.ts", 0, ChangeKind::Add, 30),
            change("app/billing/charge.ts", 0, ChangeKind::Add, 60),
            change("app/billing/refund.ts", 0, ChangeKind::Add, 60),
            change("app/shipping/track.ts", 0, ChangeKind::Add, 120),
            change("app/api/handlers/user.ts", 0, ChangeKind::Add, 50),
            change("app/api/handlers/order.ts", 0, ChangeKind::Add, 50),
        ];
        changes.push(change("app/billing/legacy.ts", 0, ChangeKind::Add, 10));

        let patches = run(changes, vec![], 120, None);

        let patch_for = |id: &str| {
            patches
                .iter()
                .find(|p| p.changes.contains(&id.to_string()))
                .unwrap()
                .id
        };
        let types_patch = patch_for("app/types/user.ts:hunk_0");
        let utils_patch = patch_for("app/utils/format.ts:hunk_0");
        let handlers_patch = patch_for("app/api/handlers/user.ts:hunk_0");

        // Layers stay apart and keep their members together
        assert_ne!(types_patch, handlers_patch);
        assert_eq!(types_patch, patch_for("app/types/order.ts:hunk_0"));
        assert_eq!(utils_patch, patch_for("app/utils/parse.ts:hunk_0"));
        assert_eq!(handlers_patch, patch_for("app/api/handlers/order.ts:hunk_0"));
    }

    #[test]
    fn max_patches_is_enforced() {
        let changes: Vec<Change> = (0..10)
            .map(|i| change(&format!("f{i}.py"), 0, ChangeKind::Modify, 200))
            .collect();
        let patches = run(changes, vec![], 50, Some(3));
        assert!(patches.len() <= 3);
    }

    #[test]
    fn large_patch_gets_a_warning() {
        let changes = vec![change("big.py", 0, ChangeKind::Add, 800)];
        let patches = run(changes, vec![], 200, None);
        assert!(patches[0].warnings.iter().any(|w| w.contains("Large patch")));
    }

    #[test]
    fn stable_order_without_dependencies() {
        let changes = vec![
            change("first.py", 0, ChangeKind::Modify, 300),
            change("second.py", 0, ChangeKind::Modify, 300),
            change("third.py", 0, ChangeKind::Modify, 300),
        ];
        let patches = run(changes, vec![], 100, None);
        let names: Vec<&str> = patches.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Changes in first.py",
                "Changes in second.py",
                "Changes in third.py"
            ]
        );
    }
}
