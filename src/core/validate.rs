//! Validation, quality metrics, and optimization hints for a patch split.
//!
//! Validation never aborts the pipeline: failures become warnings on the
//! result so callers can inspect the violating patch/change pair.

use indexmap::{IndexMap, IndexSet};

use crate::core::graph::DependencyGraph;
use crate::core::model::{Change, Patch, QualityMetrics};

/// Suggestion thresholds.
const SMALL_PATCH_LINES: usize = 20;
const LARGE_PATCH_LINES: usize = 500;
const DEEP_CHAIN: usize = 5;

/// Check coverage, duplication, ordering, and apply-simulation.
pub fn validate_patches(
    patches: &[Patch],
    changes: &[Change],
    graph: &DependencyGraph,
) -> (bool, Vec<String>) {
    let mut issues = Vec::new();

    // Coverage: every input change appears in some patch
    let all_ids: IndexSet<&str> = changes.iter().map(|c| c.id.as_str()).collect();
    let mut covered: IndexSet<&str> = IndexSet::new();
    let mut duplicates: Vec<&str> = Vec::new();
    for patch in patches {
        for id in &patch.changes {
            if !covered.insert(id.as_str()) {
                duplicates.push(id.as_str());
            }
        }
    }
    let missing: Vec<&str> = all_ids.difference(&covered).copied().collect();
    if !missing.is_empty() {
        issues.push(format!(
            "Missing changes not included in any patch: {}",
            missing.join(", ")
        ));
    }
    if !duplicates.is_empty() {
        issues.push(format!(
            "Duplicate changes in multiple patches: {}",
            duplicates.join(", ")
        ));
    }

    // Ordering: prerequisites must carry strictly smaller ids
    for patch in patches {
        for &dep in &patch.depends_on {
            if dep >= patch.id {
                issues.push(format!(
                    "Patch {} depends on patch {dep} which comes later",
                    patch.id
                ));
            }
        }
    }

    // Apply simulation: walking patches in id order, every change-level
    // dependency must already be applied or inside the same patch
    let mut ordered: Vec<&Patch> = patches.iter().collect();
    ordered.sort_by_key(|p| p.id);
    let mut applied: IndexSet<&str> = IndexSet::new();
    for patch in &ordered {
        let own: IndexSet<&str> = patch.changes.iter().map(String::as_str).collect();
        for change_id in &patch.changes {
            for dep in graph.dependencies_of(change_id) {
                if !applied.contains(dep.as_str()) && !own.contains(dep.as_str()) {
                    issues.push(format!(
                        "Change {change_id} in patch {} depends on {dep} which is not yet applied",
                        patch.id
                    ));
                }
            }
        }
        applied.extend(own);
    }

    (issues.is_empty(), issues)
}

/// Quality metrics over the final patch set.
pub fn measure_patch_quality(patches: &[Patch], changes: &[Change]) -> QualityMetrics {
    let total_lines: usize = changes.iter().map(Change::changed_lines).sum();
    let sizes: Vec<usize> = patches.iter().map(|p| p.size_lines).collect();

    let avg = if sizes.is_empty() {
        0.0
    } else {
        sizes.iter().sum::<usize>() as f64 / sizes.len() as f64
    };
    let variance = if sizes.is_empty() {
        0.0
    } else {
        sizes
            .iter()
            .map(|&s| (s as f64 - avg).powi(2))
            .sum::<f64>()
            / sizes.len() as f64
    };

    QualityMetrics {
        num_patches: patches.len(),
        total_lines,
        avg_patch_size: avg,
        max_patch_size: sizes.iter().copied().max().unwrap_or(0),
        min_patch_size: sizes.iter().copied().min().unwrap_or(0),
        size_variance: variance,
        patches_with_warnings: patches.iter().filter(|p| !p.warnings.is_empty()).count(),
        max_dependency_depth: max_dependency_depth(patches),
        balance_score: balance_score(&sizes),
        reviewability_score: reviewability_score(patches),
    }
}

/// Longest prerequisite chain, counting patches.
fn max_dependency_depth(patches: &[Patch]) -> usize {
    let by_id: IndexMap<usize, &Patch> = patches.iter().map(|p| (p.id, p)).collect();

    fn depth(
        id: usize,
        by_id: &IndexMap<usize, &Patch>,
        memo: &mut IndexMap<usize, usize>,
    ) -> usize {
        if let Some(&d) = memo.get(&id) {
            return d;
        }
        let d = match by_id.get(&id) {
            Some(p) if !p.depends_on.is_empty() => {
                // Prerequisite ids are strictly smaller, so this terminates
                1 + p
                    .depends_on
                    .iter()
                    .map(|&dep| depth(dep, by_id, memo))
                    .max()
                    .unwrap_or(0)
            }
            Some(_) => 1,
            None => 0,
        };
        memo.insert(id, d);
        d
    }

    let mut memo = IndexMap::new();
    patches
        .iter()
        .map(|p| depth(p.id, &by_id, &mut memo))
        .max()
        .unwrap_or(0)
}

/// `max(0, 1 - sigma/mu)` over patch sizes: 1.0 is perfectly balanced.
fn balance_score(sizes: &[usize]) -> f64 {
    if sizes.len() < 2 {
        return 1.0;
    }
    let avg = sizes.iter().sum::<usize>() as f64 / sizes.len() as f64;
    if avg == 0.0 {
        return 1.0;
    }
    let variance = sizes
        .iter()
        .map(|&s| (s as f64 - avg).powi(2))
        .sum::<f64>()
        / sizes.len() as f64;
    (1.0 - variance.sqrt() / avg).max(0.0)
}

/// Mean of per-patch `0.5*size + 0.3*files + 0.2*warnings` scores.
fn reviewability_score(patches: &[Patch]) -> f64 {
    if patches.is_empty() {
        return 0.0;
    }

    let scores: Vec<f64> = patches
        .iter()
        .map(|patch| {
            let size_score = score_patch_size(patch.size_lines);

            let files: IndexSet<&str> = patch
                .changes
                .iter()
                .filter_map(|id| id.rsplit_once(':').map(|(f, _)| f))
                .collect();
            let file_score = 1.0 / (1.0 + (files.len().saturating_sub(1)) as f64 * 0.2);

            let warning_score = (1.0 - patch.warnings.len() as f64 * 0.2).max(0.0);

            size_score * 0.5 + file_score * 0.3 + warning_score * 0.2
        })
        .collect();

    scores.iter().sum::<f64>() / scores.len() as f64
}

/// Size sweet spot is 50-200 lines: linear ramp up from 10, linear decay
/// to 500, floor 0.1 beyond.
fn score_patch_size(size: usize) -> f64 {
    match size {
        0 => 0.0,
        s if s < 10 => 0.3,
        s if s < 50 => 0.3 + (s - 10) as f64 / 40.0 * 0.7,
        s if s <= 200 => 1.0,
        s if s <= 500 => 1.0 - (s - 200) as f64 / 300.0 * 0.7,
        _ => 0.1,
    }
}

/// Emit advisory suggestions against the thresholds in the metrics.
pub fn suggest_optimizations(
    patches: &[Patch],
    _changes: &[Change],
    metrics: &QualityMetrics,
) -> Vec<String> {
    let mut suggestions = Vec::new();

    if metrics.balance_score < 0.5 {
        suggestions
            .push("Patches are unbalanced in size. Consider redistributing changes.".to_string());
    }

    let large: Vec<usize> = patches
        .iter()
        .filter(|p| p.size_lines > LARGE_PATCH_LINES)
        .map(|p| p.id)
        .collect();
    if !large.is_empty() {
        suggestions.push(format!(
            "{} patches are very large (>{LARGE_PATCH_LINES} lines). Consider splitting: {large:?}",
            large.len()
        ));
    }

    let small = patches
        .iter()
        .filter(|p| p.size_lines < SMALL_PATCH_LINES)
        .count();
    if !patches.is_empty() && small as f64 > patches.len() as f64 * 0.3 {
        suggestions.push(format!(
            "{small} patches are very small (<{SMALL_PATCH_LINES} lines). Consider merging related patches."
        ));
    }

    if metrics.max_dependency_depth > DEEP_CHAIN {
        suggestions.push(format!(
            "Dependency chain is deep ({} levels). This may make the patches harder to apply sequentially.",
            metrics.max_dependency_depth
        ));
    }

    if metrics.reviewability_score < 0.6 {
        suggestions.push(format!(
            "Overall reviewability score is low ({:.2}). Consider reorganizing patches for easier review.",
            metrics.reviewability_score
        ));
    }

    suggestions
}

/// Split any patch larger than twice the target into two halves at the
/// midpoint, the second depending on the first, then renumber densely.
pub fn optimize_patches(patches: &[Patch], changes: &[Change], target_size: usize) -> Vec<Patch> {
    let change_map: IndexMap<&str, &Change> =
        changes.iter().map(|c| (c.id.as_str(), c)).collect();
    let size_of = |ids: &[String]| -> usize {
        ids.iter()
            .filter_map(|id| change_map.get(id.as_str()))
            .map(|c| c.changed_lines())
            .sum()
    };

    // Emit parts in order; `origin` maps an old id to its first part
    struct Part {
        origin: usize,
        second_half: bool,
        patch: Patch,
    }

    let mut ordered: Vec<&Patch> = patches.iter().collect();
    ordered.sort_by_key(|p| p.id);

    let mut parts: Vec<Part> = Vec::new();
    for patch in ordered {
        if patch.size_lines > target_size * 2 && patch.changes.len() > 1 {
            let mid = patch.changes.len() / 2;
            let (first, second) = patch.changes.split_at(mid);

            parts.push(Part {
                origin: patch.id,
                second_half: false,
                patch: Patch {
                    id: 0,
                    name: format!("{} (part 1)", patch.name),
                    description: patch.description.clone(),
                    changes: first.to_vec(),
                    depends_on: patch.depends_on.clone(),
                    size_lines: size_of(first),
                    warnings: Vec::new(),
                },
            });
            parts.push(Part {
                origin: patch.id,
                second_half: true,
                patch: Patch {
                    id: 0,
                    name: format!("{} (part 2)", patch.name),
                    description: patch.description.clone(),
                    changes: second.to_vec(),
                    depends_on: Vec::new(),
                    size_lines: size_of(second),
                    warnings: Vec::new(),
                },
            });
        } else {
            parts.push(Part {
                origin: patch.id,
                second_half: false,
                patch: patch.clone(),
            });
        }
    }

    // Old id -> new id of the first part
    let mut first_part_of: IndexMap<usize, usize> = IndexMap::new();
    for (new_id, part) in parts.iter().enumerate() {
        if !part.second_half {
            first_part_of.insert(part.origin, new_id);
        }
    }

    parts
        .into_iter()
        .enumerate()
        .map(|(new_id, part)| {
            let mut patch = part.patch;
            patch.id = new_id;
            patch.depends_on = if part.second_half {
                vec![first_part_of.get(&part.origin).copied().unwrap_or(0)]
            } else {
                patch
                    .depends_on
                    .iter()
                    .filter_map(|old| first_part_of.get(old).copied())
                    .filter(|&d| d < new_id)
                    .collect()
            };
            patch
        })
        .collect()
}
