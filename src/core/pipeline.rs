//! End-to-end orchestration of the splitting pipeline.
//!
//! Stages run strictly forward: parse, analyze, graph, group, split,
//! validate. The optional enhancer only ever adds edges, groups, or labels
//! between stages, and everything it proposes is revalidated before use.
//! A caller-provided cancel token is checked at phase boundaries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use indexmap::IndexSet;
use tracing::{info, warn};

use crate::core::analyze::analyze_dependencies;
use crate::core::diff::parse_diff;
use crate::core::graph::DependencyGraph;
use crate::core::grouping::identify_semantic_groups;
use crate::core::model::{
    Change, Dependency, DependencyKind, MentalModel, Patch, PatchSplitResult, ResultMetadata,
    SemanticGroup, SplitError,
};
use crate::core::split::{HeuristicNamer, PatchNamer, split_into_patches};
use crate::core::validate::{measure_patch_quality, suggest_optimizations, validate_patches};
use crate::infra::llm::LlmClient;

/// Default goal size for a patch, in changed lines.
pub const DEFAULT_TARGET_PATCH_SIZE: usize = 200;

/// Cooperative cancellation flag checked between phases.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Free-form context handed to the enhancer for better naming.
#[derive(Debug, Clone, Default)]
pub struct AdditionalContext {
    pub commit_message: Option<String>,
    pub repository_description: Option<String>,
}

/// Tunables for one split run.
pub struct SplitOptions {
    pub target_patch_size: usize,
    pub max_patches: Option<usize>,
    pub cancel: Option<CancelToken>,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            target_patch_size: DEFAULT_TARGET_PATCH_SIZE,
            max_patches: None,
            cancel: None,
        }
    }
}

/// The pipeline with its optional enhancer.
pub struct SplitPipeline {
    llm: Option<LlmClient>,
    context: AdditionalContext,
}

/// Public entry point: split with defaults and no enhancer.
pub fn split_changes(diff_text: &str, options: &SplitOptions) -> Result<PatchSplitResult> {
    SplitPipeline::new(None).split_changes(diff_text, options)
}

impl SplitPipeline {
    pub fn new(llm: Option<LlmClient>) -> Self {
        Self {
            llm,
            context: AdditionalContext::default(),
        }
    }

    pub fn with_context(mut self, context: AdditionalContext) -> Self {
        self.context = context;
        self
    }

    pub fn llm(&self) -> Option<&LlmClient> {
        self.llm.as_ref()
    }

    /// Run the full pipeline over one unified diff.
    pub fn split_changes(
        &self,
        diff_text: &str,
        options: &SplitOptions,
    ) -> Result<PatchSplitResult> {
        let cancelled = |token: &Option<CancelToken>| {
            token.as_ref().is_some_and(CancelToken::is_cancelled)
        };

        info!("phase 1: parsing diff and analyzing dependencies");
        let changes = parse_diff(diff_text);
        if changes.is_empty() {
            return Err(SplitError::EmptyDiff.into());
        }

        let mut dependencies = analyze_dependencies(&changes);
        info!(
            changes = changes.len(),
            dependencies = dependencies.len(),
            "analysis complete"
        );

        if cancelled(&options.cancel) {
            return Ok(partial_result(&changes, &dependencies));
        }

        if let Some(llm) = &self.llm {
            enhance_dependencies(llm, &changes, &mut dependencies);
        }

        info!("phase 2: building dependency graph");
        let mut graph = DependencyGraph::new();
        graph.add_changes(&changes);
        graph.add_dependencies(&dependencies);
        let atomic_groups = graph.find_atomic_groups();
        info!(atomic_groups = atomic_groups.len(), "graph complete");

        if cancelled(&options.cancel) {
            return Ok(partial_result(&changes, &dependencies));
        }

        info!("phase 3: identifying semantic groups");
        let mut semantic_groups = identify_semantic_groups(&changes, &atomic_groups);
        if let Some(llm) = &self.llm {
            enhance_semantic_groups(llm, &changes, &dependencies, &mut semantic_groups);
        }
        info!(semantic_groups = semantic_groups.len(), "grouping complete");

        if cancelled(&options.cancel) {
            return Ok(partial_result(&changes, &dependencies));
        }

        info!("phase 4: splitting into patches");
        let heuristic = HeuristicNamer;
        let llm_namer = self.llm.as_ref().map(|llm| LlmNamer {
            llm,
            context: &self.context,
        });
        let namer: &dyn PatchNamer = match &llm_namer {
            Some(n) => n,
            None => &heuristic,
        };
        let patches = split_into_patches(
            &graph,
            &changes,
            &atomic_groups,
            &semantic_groups,
            options.target_patch_size,
            options.max_patches,
            namer,
        );
        info!(patches = patches.len(), "split complete");

        info!("phase 5: validating patches");
        let (is_valid, issues) = validate_patches(&patches, &changes, &graph);
        if !is_valid {
            warn!(issues = issues.len(), "validation found issues");
        }
        let metrics = measure_patch_quality(&patches, &changes);
        let suggestions = suggest_optimizations(&patches, &changes, &metrics);

        let mut warnings = issues;
        warnings.extend(suggestions);

        if let Some(llm) = &self.llm {
            review_with_llm(llm, &patches, &dependencies, &mut warnings);
        }

        let mental_model = self
            .llm
            .as_ref()
            .and_then(|llm| generate_mental_model(llm, &patches, &changes, &self.context));

        let dependency_order: Vec<usize> = patches.iter().map(|p| p.id).collect();

        Ok(PatchSplitResult {
            patches,
            dependency_order,
            atomic_groups,
            semantic_groups,
            warnings,
            metadata: ResultMetadata {
                num_changes: changes.len(),
                num_dependencies: dependencies.len(),
                metrics,
                llm_used: self.llm.is_some(),
                partial: false,
            },
            mental_model,
        })
    }
}

/// Degraded result returned when cancellation hits a phase boundary:
/// every change lands in one catch-all patch so coverage still holds.
fn partial_result(changes: &[Change], dependencies: &[Dependency]) -> PatchSplitResult {
    let size = changes.iter().map(Change::changed_lines).sum();
    let patch = Patch {
        id: 0,
        name: "All changes (cancelled run)".to_string(),
        description: "Pipeline was cancelled before splitting completed".to_string(),
        changes: changes.iter().map(|c| c.id.clone()).collect(),
        depends_on: Vec::new(),
        size_lines: size,
        warnings: vec!["run cancelled before completion".to_string()],
    };
    PatchSplitResult {
        patches: vec![patch],
        dependency_order: vec![0],
        atomic_groups: Vec::new(),
        semantic_groups: Vec::new(),
        warnings: vec!["run cancelled before completion".to_string()],
        metadata: ResultMetadata {
            num_changes: changes.len(),
            num_dependencies: dependencies.len(),
            partial: true,
            ..Default::default()
        },
        mental_model: None,
    }
}

/// Summaries are capped so prompts stay bounded on huge diffs.
pub fn summarize_changes(changes: &[Change]) -> String {
    let mut lines: Vec<String> = changes
        .iter()
        .take(50)
        .map(|c| {
            let symbols: Vec<&str> = c.symbols.iter().take(3).map(|s| s.name.as_str()).collect();
            format!(
                "- {}: {:?} in {}, symbols: [{}], {}+ {}-",
                c.id,
                c.kind,
                c.file,
                symbols.join(", "),
                c.added_lines,
                c.removed_lines
            )
        })
        .collect();
    if changes.len() > 50 {
        lines.push(format!("... and {} more changes", changes.len() - 50));
    }
    lines.join("\n")
}

pub fn summarize_dependencies(dependencies: &[Dependency]) -> String {
    let mut lines: Vec<String> = dependencies
        .iter()
        .take(50)
        .map(|d| {
            format!(
                "- {} -> {} ({:?}, strength={:.1}): {}",
                d.source, d.target, d.kind, d.strength, d.reason
            )
        })
        .collect();
    if dependencies.len() > 50 {
        lines.push(format!(
            "... and {} more dependencies",
            dependencies.len() - 50
        ));
    }
    lines.join("\n")
}

pub fn summarize_patches(patches: &[Patch]) -> String {
    patches
        .iter()
        .map(|p| {
            let deps = if p.depends_on.is_empty() {
                "no dependencies".to_string()
            } else {
                format!("depends on {:?}", p.depends_on)
            };
            format!(
                "- Patch {}: {} ({} changes, {} lines, {deps})",
                p.id,
                p.name,
                p.changes.len(),
                p.size_lines
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Merge model-proposed dependencies, dropping wildcards and unknown ids.
fn enhance_dependencies(llm: &LlmClient, changes: &[Change], dependencies: &mut Vec<Dependency>) {
    let known: IndexSet<&str> = changes.iter().map(|c| c.id.as_str()).collect();

    match llm.analyze_dependencies(
        &summarize_changes(changes),
        &summarize_dependencies(dependencies),
    ) {
        Ok(proposed) => {
            let mut added = 0usize;
            for dep in proposed {
                if dep.source.contains('*') || dep.target.contains('*') {
                    warn!(source = %dep.source, target = %dep.target, "dropping wildcard dependency from enhancer");
                    continue;
                }
                if !known.contains(dep.source.as_str()) || !known.contains(dep.target.as_str()) {
                    warn!(source = %dep.source, target = %dep.target, "dropping dependency with unknown change id");
                    continue;
                }
                if dep.source == dep.target {
                    continue;
                }
                dependencies.push(Dependency {
                    source: dep.source,
                    target: dep.target,
                    kind: DependencyKind::CallChain,
                    strength: dep.strength.clamp(0.0, 1.0),
                    reason: if dep.reason.is_empty() {
                        "Identified by LLM".to_string()
                    } else {
                        dep.reason
                    },
                });
                added += 1;
            }
            info!(added, "enhancer added dependencies");
        }
        Err(err) => warn!(%err, "dependency enhancement failed, continuing without it"),
    }
}

/// Append model-proposed groups with unknown change ids filtered out.
fn enhance_semantic_groups(
    llm: &LlmClient,
    changes: &[Change],
    dependencies: &[Dependency],
    groups: &mut Vec<SemanticGroup>,
) {
    let known: IndexSet<&str> = changes.iter().map(|c| c.id.as_str()).collect();

    match llm.identify_semantic_groups(
        &summarize_changes(changes),
        &summarize_dependencies(dependencies),
    ) {
        Ok(proposed) => {
            let mut added = 0usize;
            for (idx, group) in proposed.into_iter().enumerate() {
                let change_ids: Vec<String> = group
                    .change_ids
                    .into_iter()
                    .filter(|id| known.contains(id.as_str()))
                    .collect();
                if change_ids.len() < 2 {
                    continue;
                }
                groups.push(SemanticGroup {
                    id: format!("llm_{idx}"),
                    name: group.name,
                    change_ids,
                    description: group.description,
                    cohesion_score: group.cohesion_score.clamp(0.0, 1.0),
                });
                added += 1;
            }
            info!(added, "enhancer added semantic groups");
        }
        Err(err) => warn!(%err, "semantic group enhancement failed, continuing without it"),
    }
}

/// Ask the model to review the split; its findings land in warnings only.
fn review_with_llm(
    llm: &LlmClient,
    patches: &[Patch],
    dependencies: &[Dependency],
    warnings: &mut Vec<String>,
) {
    match llm.validate_patches(
        &summarize_patches(patches),
        &summarize_dependencies(dependencies),
    ) {
        Ok(review) => {
            if !review.is_valid {
                warnings.extend(review.issues);
            }
            warnings.extend(review.suggestions);
        }
        Err(err) => warn!(%err, "LLM patch review failed, continuing without it"),
    }
}

/// Reviewer-orientation notes generated from the finished split.
fn generate_mental_model(
    llm: &LlmClient,
    patches: &[Patch],
    changes: &[Change],
    context: &AdditionalContext,
) -> Option<MentalModel> {
    let files: IndexSet<&str> = changes.iter().map(|c| c.file.as_str()).collect();
    let total_added: usize = changes.iter().map(|c| c.added_lines).sum();
    let total_removed: usize = changes.iter().map(|c| c.removed_lines).sum();

    let summary = serde_json::json!({
        "num_patches": patches.len(),
        "num_files": files.len(),
        "total_added_lines": total_added,
        "total_deleted_lines": total_removed,
        "patches": patches.iter().map(|p| serde_json::json!({
            "id": p.id,
            "name": p.name,
            "description": p.description,
            "depends_on": p.depends_on,
            "size_lines": p.size_lines,
        })).collect::<Vec<_>>(),
        "commit_message": context.commit_message,
        "repository_description": context.repository_description,
    });

    let prompt = format!(
        "You are helping code reviewers understand a large change split into {} \
         dependency-ordered patches.\n\nContext:\n{summary}\n\n\
         Generate a mental model that orients reviewers before they start. \
         Respond in JSON:\n\
         {{\"summary\": \"1-2 sentence overview\", \
         \"progression\": [\"how patch 0 sets things up\", \"...\"], \
         \"key_concepts\": [\"...\"], \
         \"review_tips\": \"practical advice for this review\"}}",
        patches.len()
    );

    match llm.complete_json(
        "You are a code review expert helping reviewers build mental models of complex changes.",
        &prompt,
    ) {
        Ok(value) => Some(MentalModel {
            summary: value["summary"].as_str().unwrap_or_default().to_string(),
            progression: string_array(&value["progression"]),
            key_concepts: string_array(&value["key_concepts"]),
            review_tips: value["review_tips"].as_str().unwrap_or_default().to_string(),
        }),
        Err(err) => {
            warn!(%err, "mental model generation failed");
            None
        }
    }
}

fn string_array(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Enhancer-backed patch namer with the heuristic as its safety net.
struct LlmNamer<'a> {
    llm: &'a LlmClient,
    context: &'a AdditionalContext,
}

impl PatchNamer for LlmNamer<'_> {
    fn name_patch(&self, changes: &[&Change], previous: &[Patch]) -> Option<(String, String)> {
        let change_summaries: Vec<serde_json::Value> = changes
            .iter()
            .map(|c| {
                serde_json::json!({
                    "file": c.file,
                    "type": format!("{:?}", c.kind),
                    "symbols": c.symbols.iter().take(5).map(|s| &s.name).collect::<Vec<_>>(),
                    "added_lines": c.added_lines,
                    "deleted_lines": c.removed_lines,
                    "content_preview": c.content.chars().take(300).collect::<String>(),
                })
            })
            .collect();

        let mut context_parts = Vec::new();
        if let Some(msg) = &self.context.commit_message {
            context_parts.push(format!("Original commit message: {msg}"));
        }
        if let Some(desc) = &self.context.repository_description {
            context_parts.push(format!("Repository description: {desc}"));
        }
        if !previous.is_empty() {
            let prior: Vec<String> = previous
                .iter()
                .rev()
                .take(3)
                .map(|p| format!("- {}: {}", p.name, p.description))
                .collect();
            context_parts.push(format!("Previous patches:\n{}", prior.join("\n")));
        }

        let prompt = format!(
            "Analyze the following code changes and generate a concise description \
             of what this patch achieves. Focus on the purpose of the changes.\n\n\
             Additional context:\n{}\n\nChanges:\n{}\n\n\
             Respond in JSON: {{\"description\": \"...\"}}",
            if context_parts.is_empty() {
                "None".to_string()
            } else {
                context_parts.join("\n\n")
            },
            serde_json::Value::Array(change_summaries)
        );

        let value = self
            .llm
            .complete_json(
                "You are a code analysis expert specializing in the purpose of code changes.",
                &prompt,
            )
            .ok()?;
        let description = value["description"].as_str()?.trim().to_string();
        if description.is_empty() {
            return None;
        }

        let name = if description.chars().count() > 80 {
            let mut short: String = description.chars().take(77).collect();
            short.push_str("...");
            short
        } else {
            description.clone()
        };
        Some((name, description))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF: &str = "\
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

    #[test]
    fn pipeline_s1_orders_definition_before_use() {
        let result = split_changes(DIFF, &SplitOptions::default()).unwrap();

        assert_eq!(result.metadata.num_changes, 2);
        assert_eq!(result.metadata.num_dependencies, 1);
        assert!(!result.metadata.llm_used);
        assert!(!result.metadata.partial);

        // Coverage and dense ids
        let ids: Vec<usize> = result.patches.iter().map(|p| p.id).collect();
        assert_eq!(ids, (0..result.patches.len()).collect::<Vec<_>>());

        // S1: two patches, definition first, usage depending on it
        assert_eq!(result.patches.len(), 2);
        let def_patch = result
            .patches
            .iter()
            .find(|p| p.changes.contains(&"app/util.py:hunk_0".to_string()))
            .unwrap();
        let use_patch = result
            .patches
            .iter()
            .find(|p| p.changes.contains(&"app/util.py:hunk_1".to_string()))
            .unwrap();
        assert!(def_patch.id < use_patch.id);
        assert_eq!(use_patch.depends_on, vec![def_patch.id]);
    }

    #[test]
    fn empty_diff_is_an_input_error() {
        let err = split_changes("", &SplitOptions::default()).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn cancelled_run_returns_partial_result() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let options = SplitOptions {
            cancel: Some(cancel),
            ..Default::default()
        };
        let result = split_changes(DIFF, &options).unwrap();
        assert!(result.metadata.partial);
        // Coverage still holds in the degraded result
        assert_eq!(result.patches.len(), 1);
        assert_eq!(result.patches[0].changes.len(), 2);
    }

    #[test]
    fn determinism_without_llm() {
        let a = split_changes(DIFF, &SplitOptions::default()).unwrap();
        let b = split_changes(DIFF, &SplitOptions::default()).unwrap();
        assert_eq!(
            serde_json::to_string(&a.patches).unwrap(),
            serde_json::to_string(&b.patches).unwrap()
        );
        assert_eq!(a.dependency_order, b.dependency_order);
    }
}
