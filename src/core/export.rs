//! Writing a split to disk and re-splitting an emitted patch in place.
//!
//! A run directory contains `NN_<name>.patch` files, a `metadata_<ts>.json`
//! manifest, a human `summary_<ts>.md`, and an executable
//! `apply_patches.sh`. Within each patch file, files are ordered so that
//! definition files precede usage files. The run timestamp is injected for
//! testability.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{Local, Utc};
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::core::digest::{IntegrityReport, verify_hunk_integrity};
use crate::core::diff::parse_diff;
use crate::core::model::{Change, ChangeKind, Patch, PatchSplitResult, SymbolKind, SymbolRole};
use crate::core::pipeline::{SplitOptions, SplitPipeline};
use crate::infra::llm::LlmClient;

/// Injected run timestamp: one tag for filenames, one epoch for metadata.
#[derive(Debug, Clone)]
pub struct RunStamp {
    pub file_tag: String,
    pub unix: i64,
}

impl RunStamp {
    pub fn now() -> Self {
        Self {
            file_tag: Local::now().format("%Y%m%d_%H%M%S").to_string(),
            unix: Utc::now().timestamp(),
        }
    }

    pub fn fixed(file_tag: &str, unix: i64) -> Self {
        Self {
            file_tag: file_tag.to_string(),
            unix,
        }
    }
}

/// Repository metadata embedded in the manifest.
#[derive(Debug, Clone, Serialize, Default)]
pub struct RepositoryInfo {
    pub path: String,
    pub name: String,
    pub current_branch: String,
    pub source_repo_name: String,
    pub language: String,
    pub description: Option<String>,
    pub analysis: Value,
    pub base_branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_file: Option<String>,
}

/// What the export produced, for CLI display and integrity checking.
#[derive(Debug)]
pub struct ExportSummary {
    pub patch_files: Vec<String>,
    pub metadata_path: PathBuf,
    pub integrity: IntegrityReport,
}

/// Write every artifact of a finished split into `output_dir`.
pub fn export_patches(
    result: &PatchSplitResult,
    diff_text: &str,
    output_dir: &Path,
    repository: &RepositoryInfo,
    llm: Option<&LlmClient>,
    stamp: &RunStamp,
) -> Result<ExportSummary> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("create output directory {}", output_dir.display()))?;

    let changes = parse_diff(diff_text);
    let change_map: IndexMap<&str, &Change> =
        changes.iter().map(|c| (c.id.as_str(), c)).collect();

    let mut ordered: Vec<&Patch> = result.patches.iter().collect();
    ordered.sort_by_key(|p| p.id);

    let mut patch_entries: Vec<Value> = Vec::new();
    let mut patch_files: Vec<String> = Vec::new();

    for patch in &ordered {
        let filename = patch_filename(patch.id, &patch.name);
        let path = output_dir.join(&filename);

        let members: Vec<&Change> = patch
            .changes
            .iter()
            .filter_map(|id| change_map.get(id.as_str()).copied())
            .collect();
        let files: Vec<String> = {
            let mut set: IndexSet<String> =
                members.iter().map(|c| c.file.clone()).collect();
            set.sort();
            set.into_iter().collect()
        };

        let annotations = generate_annotations(patch, &members, llm);
        let category = categorize_patch(&members);
        let priority = patch.depends_on.len() + 1;

        let body = render_patch_file(patch, &members, &files, &category, priority, stamp)?;
        fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;

        patch_entries.push(json!({
            "id": patch.id,
            "name": patch.name,
            "description": patch.description,
            "category": category,
            "priority": priority,
            "files": files,
            "dependencies": patch.depends_on,
            "filename": filename,
            "annotations": annotations,
        }));
        patch_files.push(filename);
    }

    // Manifest
    let goal_summary = goal_summary(result, &changes, repository, llm);
    let mut metadata = json!({
        "generated_at": stamp.unix,
        "total_patches": result.patches.len(),
        "goal_summary": goal_summary,
        "repository": repository,
        "patches": patch_entries,
    });
    if let Some(model) = &result.mental_model {
        metadata["mental_model"] = serde_json::to_value(model)?;
    }
    let metadata_path = output_dir.join(format!("metadata_{}.json", stamp.file_tag));
    fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)
        .with_context(|| format!("write {}", metadata_path.display()))?;

    write_summary_markdown(result, &metadata, output_dir, stamp)?;
    write_apply_script(&patch_files, output_dir)?;

    // Read the emitted files back and reconcile hunk digests
    let emitted: Vec<String> = patch_files
        .iter()
        .map(|f| fs::read_to_string(output_dir.join(f)))
        .collect::<std::io::Result<_>>()
        .context("re-read emitted patch files")?;
    let integrity = verify_hunk_integrity(diff_text, &emitted);
    if integrity.is_clean() {
        info!(
            hunks = integrity.input_hunks,
            "hunk integrity check passed"
        );
    } else {
        warn!(
            missing = integrity.missing.len(),
            spurious = integrity.spurious.len(),
            "hunk integrity check failed"
        );
    }

    Ok(ExportSummary {
        patch_files,
        metadata_path,
        integrity,
    })
}

/// `NN_<safe_name>.patch`
fn patch_filename(id: usize, name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| if c == ' ' || c == '/' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || *c == '.')
        .take(50)
        .collect();
    format!("{id:02}_{safe}.patch")
}

/// The patch file body: header comment block plus per-file diff sections.
fn render_patch_file(
    patch: &Patch,
    members: &[&Change],
    files: &[String],
    category: &str,
    priority: usize,
    stamp: &RunStamp,
) -> Result<String> {
    let mut out = String::new();
    out.push_str(&format!("# {}\n", patch.name));
    out.push_str(&format!("# Category: {category}\n"));
    out.push_str(&format!("# Priority: {priority}\n"));
    out.push_str(&format!("# Generated: {}\n", stamp.file_tag));
    out.push_str(&format!("# Files: {}\n", files.join(", ")));
    out.push_str(&format!("# Description: {}\n", patch.description));
    out.push('\n');

    let mut by_file: IndexMap<&str, Vec<&Change>> = IndexMap::new();
    for &change in members {
        by_file.entry(change.file.as_str()).or_default().push(change);
    }

    for file in order_files_by_definitions(&by_file) {
        out.push_str(&format!("diff --git a/{file} b/{file}\n"));
        out.push_str("index 1234567..abcdefg 100644\n");
        out.push_str(&format!("--- a/{file}\n"));
        out.push_str(&format!("+++ b/{file}\n"));

        let mut hunks = by_file[file.as_str()].clone();
        hunks.sort_by_key(|c| c.line_range.0);
        for change in hunks {
            out.push_str(&change.content);
            if !change.content.ends_with('\n') {
                out.push('\n');
            }
        }
    }

    Ok(out)
}

/// Order files so that definition files precede files that use their
/// symbols: a petgraph toposort over the intra-patch file graph, cycles
/// broken by removing one edge per SCC.
fn order_files_by_definitions(by_file: &IndexMap<&str, Vec<&Change>>) -> Vec<String> {
    let files: Vec<&str> = by_file.keys().copied().collect();
    let n = files.len();
    if n <= 1 {
        return files.iter().map(|f| f.to_string()).collect();
    }

    let defined: Vec<IndexSet<&str>> = files
        .iter()
        .map(|f| {
            by_file[f]
                .iter()
                .flat_map(|c| c.symbols.iter())
                .filter(|s| s.role == SymbolRole::Definition)
                .map(|s| s.name.as_str())
                .collect()
        })
        .collect();
    let used: Vec<IndexSet<&str>> = files
        .iter()
        .map(|f| {
            by_file[f]
                .iter()
                .flat_map(|c| c.symbols.iter())
                .filter(|s| s.role == SymbolRole::Usage)
                .map(|s| s.name.as_str())
                .collect()
        })
        .collect();

    // Edge user -> definer, the same direction the change graph uses;
    // reversing the sorted result renders definition files first
    let mut fg: DiGraph<&str, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = files.iter().map(|f| fg.add_node(*f)).collect();
    for a in 0..n {
        for b in 0..n {
            if a != b && used[a].intersection(&defined[b]).next().is_some() {
                fg.add_edge(nodes[a], nodes[b], ());
            }
        }
    }

    loop {
        match toposort(&fg, None) {
            Ok(order) => {
                break order.into_iter().rev().map(|nx| fg[nx].to_string()).collect();
            }
            Err(_) => {
                // Remove one intra-SCC edge per cycle and retry
                let mut removed = false;
                for scc in tarjan_scc(&fg) {
                    if scc.len() < 2 {
                        continue;
                    }
                    'outer: for &a in &scc {
                        for b in fg.neighbors(a).collect::<Vec<_>>() {
                            if scc.contains(&b)
                                && let Some(e) = fg.find_edge(a, b)
                            {
                                fg.remove_edge(e);
                                removed = true;
                                break 'outer;
                            }
                        }
                    }
                }
                if !removed {
                    warn!("file ordering cycle breaking failed, keeping insertion order");
                    break files.iter().map(|f| f.to_string()).collect();
                }
            }
        }
    }
}

/// Patch category from its member symbols.
fn categorize_patch(members: &[&Change]) -> String {
    let symbols = members.iter().flat_map(|c| c.symbols.iter());
    let mut has_import = false;
    let mut has_callable = false;
    let mut has_class = false;
    for symbol in symbols {
        match symbol.kind {
            SymbolKind::Import => has_import = true,
            SymbolKind::Function | SymbolKind::Method => has_callable = true,
            SymbolKind::Class => has_class = true,
            _ => {}
        }
    }
    if has_import {
        "refactor".to_string()
    } else if has_callable || has_class {
        "feature".to_string()
    } else {
        "other".to_string()
    }
}

/// Per-change annotations: hunk location plus a one-line description.
fn generate_annotations(patch: &Patch, members: &[&Change], llm: Option<&LlmClient>) -> Vec<Value> {
    let mut sorted: Vec<&Change> = members.to_vec();
    sorted.sort_by(|a, b| a.file.cmp(&b.file).then(a.line_range.0.cmp(&b.line_range.0)));

    let descriptions = llm
        .and_then(|llm| describe_changes_with_llm(llm, patch, &sorted))
        .unwrap_or_else(|| sorted.iter().map(|c| describe_change(c)).collect());

    let header_re =
        Regex::new(r"^@@\s*-(\d+)(?:,\d+)?\s+\+(\d+)(?:,\d+)?\s*@@").expect("static hunk header");

    sorted
        .iter()
        .enumerate()
        .map(|(i, change)| {
            let header = change
                .content
                .lines()
                .find(|l| l.starts_with("@@"))
                .map(str::to_string)
                .unwrap_or_else(|| {
                    format!("@@ -{0},1 +{0},1 @@", change.line_range.0)
                });
            let (old_start, new_start) = header_re
                .captures(&header)
                .map(|cap| {
                    (
                        cap[1].parse().unwrap_or(change.line_range.0),
                        cap[2].parse().unwrap_or(change.line_range.0),
                    )
                })
                .unwrap_or((change.line_range.0, change.line_range.0));

            json!({
                "file_path": change.file,
                "hunk_header": header,
                "start_line": old_start,
                "end_line": new_start,
                "description": descriptions.get(i).cloned().unwrap_or_else(|| describe_change(change)),
            })
        })
        .collect()
}

/// Structural fallback description for one change.
fn describe_change(change: &Change) -> String {
    if !change.symbols.is_empty() {
        let names: Vec<&str> = change
            .symbols
            .iter()
            .take(3)
            .map(|s| s.name.as_str())
            .collect();
        let names = names.join(", ");
        return match change.kind {
            ChangeKind::Add => format!("Adds {names} to {}", change.file),
            ChangeKind::Modify => format!("Modifies {names} in {}", change.file),
            ChangeKind::Delete => format!("Removes {names} from {}", change.file),
        };
    }
    match change.kind {
        ChangeKind::Add => format!("Adds {} lines to {}", change.added_lines, change.file),
        ChangeKind::Modify => format!("Modifies {}", change.file),
        ChangeKind::Delete => format!(
            "Removes {} lines from {}",
            change.removed_lines, change.file
        ),
    }
}

/// One enhancer call per patch describing each member change.
fn describe_changes_with_llm(
    llm: &LlmClient,
    patch: &Patch,
    changes: &[&Change],
) -> Option<Vec<String>> {
    let summaries: Vec<Value> = changes
        .iter()
        .map(|c| {
            json!({
                "file": c.file,
                "type": format!("{:?}", c.kind),
                "symbols": c.symbols.iter().take(5).map(|s| &s.name).collect::<Vec<_>>(),
                "added_lines": c.added_lines,
                "deleted_lines": c.removed_lines,
                "content": c.content.chars().take(1000).collect::<String>(),
            })
        })
        .collect();

    let prompt = format!(
        "You are analyzing code changes in a patch titled \"{}\".\n\
         Overall patch purpose: {}\n\n\
         For each change below, generate one concise sentence describing its \
         specific purpose.\n\nChanges:\n{}\n\n\
         Respond in JSON with a \"descriptions\" array of exactly {} strings, in order.",
        patch.name,
        patch.description,
        Value::Array(summaries),
        changes.len()
    );

    let value = llm
        .complete_json(
            "You are a code analysis expert specializing in understanding code changes.",
            &prompt,
        )
        .ok()?;
    let descriptions: Vec<String> = value["descriptions"]
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    (descriptions.len() == changes.len()).then_some(descriptions)
}

/// Run-level goal summary: repository description, enhancer summary, or
/// joined patch names.
fn goal_summary(
    result: &PatchSplitResult,
    changes: &[Change],
    repository: &RepositoryInfo,
    llm: Option<&LlmClient>,
) -> String {
    if let Some(desc) = &repository.description
        && !desc.is_empty()
    {
        return desc.clone();
    }

    if let Some(llm) = llm {
        let files: IndexSet<&str> = changes.iter().map(|c| c.file.as_str()).collect();
        let context = json!({
            "num_patches": result.patches.len(),
            "num_files": files.len(),
            "total_added_lines": changes.iter().map(|c| c.added_lines).sum::<usize>(),
            "total_deleted_lines": changes.iter().map(|c| c.removed_lines).sum::<usize>(),
            "patches": result.patches.iter().take(10).map(|p| json!({
                "name": p.name,
                "description": p.description,
            })).collect::<Vec<_>>(),
        });
        let prompt = format!(
            "Generate a concise 1-2 sentence summary of the overall goal of these \
             code changes.\n\nContext:\n{context}\n\n\
             Respond in JSON: {{\"summary\": \"...\"}}"
        );
        if let Ok(value) = llm.complete_json(
            "You are a code analysis expert summarizing the purpose of code changes.",
            &prompt,
        ) && let Some(summary) = value["summary"].as_str()
        {
            let mut summary = summary.trim().to_string();
            if summary.chars().count() > 200 {
                summary = summary.chars().take(197).collect::<String>() + "...";
            }
            if !summary.is_empty() {
                return summary;
            }
        }
    }

    result
        .patches
        .iter()
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

fn write_summary_markdown(
    result: &PatchSplitResult,
    metadata: &Value,
    output_dir: &Path,
    stamp: &RunStamp,
) -> Result<()> {
    let mut out = String::new();
    out.push_str("# Code Changes Summary\n\n");
    out.push_str(&format!("**Generated:** {}\n", stamp.file_tag));
    out.push_str(&format!("**Total Patches:** {}\n\n", result.patches.len()));

    if let Some(model) = &result.mental_model {
        out.push_str("## Mental Model for Reviewers\n\n");
        out.push_str(&format!(
            "**What this change accomplishes:** {}\n\n",
            model.summary
        ));
        if !model.progression.is_empty() {
            out.push_str("**How patches progress:**\n");
            for (i, step) in model.progression.iter().enumerate() {
                out.push_str(&format!("{}. {step}\n", i + 1));
            }
            out.push('\n');
        }
        if !model.key_concepts.is_empty() {
            out.push_str("**Key concepts to understand:**\n");
            for concept in &model.key_concepts {
                out.push_str(&format!("- {concept}\n"));
            }
            out.push('\n');
        }
        if !model.review_tips.is_empty() {
            out.push_str(&format!("**Review tips:** {}\n\n", model.review_tips));
        }
        out.push_str("---\n\n");
    }

    out.push_str("## Analysis\n\n");
    if result.metadata.llm_used {
        out.push_str("Dependencies analyzed and validated with LLM assistance.\n\n");
    } else {
        out.push_str("Analysis performed using static analysis.\n\n");
    }

    // Category sections from the manifest entries
    let empty = Vec::new();
    let entries = metadata["patches"].as_array().unwrap_or(&empty);
    let mut by_category: IndexMap<&str, Vec<&Value>> = IndexMap::new();
    for entry in entries {
        by_category
            .entry(entry["category"].as_str().unwrap_or("other"))
            .or_default()
            .push(entry);
    }
    by_category.sort_keys();

    out.push_str("## Patch Details\n\n");
    for (category, members) in &by_category {
        let mut title = category.to_string();
        if let Some(first) = title.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        out.push_str(&format!("### {title} Changes\n\n"));
        for entry in members {
            out.push_str(&format!(
                "**{}** (Priority: {})\n",
                entry["name"].as_str().unwrap_or(""),
                entry["priority"]
            ));
            out.push_str(&format!(
                "- {}\n",
                entry["description"].as_str().unwrap_or("")
            ));
            let files: Vec<&str> = entry["files"]
                .as_array()
                .map(|a| a.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            out.push_str(&format!("- Files: {}\n\n", files.join(", ")));
        }
    }

    out.push_str("## Recommended Application Order\n\n");
    for (i, entry) in entries.iter().enumerate() {
        out.push_str(&format!(
            "{}. `{}` - {}\n",
            i + 1,
            entry["filename"].as_str().unwrap_or(""),
            entry["name"].as_str().unwrap_or("")
        ));
    }

    out.push_str("\n## Usage\n\n");
    out.push_str("To apply patches in the recommended order:\n");
    out.push_str("```bash\nchmod +x apply_patches.sh\n./apply_patches.sh\n```\n\n");
    out.push_str("To apply individual patches:\n```bash\ngit apply <patch_file>\n```\n");

    let path = output_dir.join(format!("summary_{}.md", stamp.file_tag));
    fs::write(&path, out).with_context(|| format!("write {}", path.display()))
}

fn write_apply_script(patch_files: &[String], output_dir: &Path) -> Result<()> {
    let mut out = String::new();
    out.push_str("#!/bin/bash\n");
    out.push_str("# Apply patches in recommended order\n\n");
    out.push_str("set -e\n\n");
    out.push_str("echo \"Applying patches in recommended order...\"\necho \"\"\n\n");

    for (i, filename) in patch_files.iter().enumerate() {
        out.push_str(&format!("echo \"Step {}: Applying {filename}...\"\n", i + 1));
        out.push_str(&format!("if git apply --check \"{filename}\" 2>/dev/null; then\n"));
        out.push_str(&format!("    git apply \"{filename}\"\n"));
        out.push_str(&format!("    echo \"Applied {filename}\"\n"));
        out.push_str("else\n");
        out.push_str(&format!("    echo \"Failed to apply {filename}\"\n"));
        out.push_str("    echo \"Please check for conflicts and apply manually\"\n");
        out.push_str("    exit 1\nfi\necho \"\"\n\n");
    }
    out.push_str("echo \"All patches applied successfully!\"\n");

    let path = output_dir.join("apply_patches.sh");
    fs::write(&path, out).with_context(|| format!("write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .context("chmod apply script")?;
    }

    Ok(())
}

/// Re-split one previously emitted patch file inside an existing run
/// directory. The new patches take over the old patch's id slot; every
/// later patch shifts, and the manifest is rewritten. Staging happens in a
/// temp directory so a failure cannot corrupt the run.
pub fn resplit_patch(
    pipeline: &SplitPipeline,
    run_dir: &Path,
    patch_filename: &str,
    options: &SplitOptions,
    stamp: &RunStamp,
) -> Result<PathBuf> {
    if !run_dir.is_dir() {
        bail!("patch split directory not found: {}", run_dir.display());
    }
    let patch_path = run_dir.join(patch_filename);
    if !patch_path.is_file() {
        bail!("patch file not found: {}", patch_path.display());
    }

    // Locate and load the manifest
    let metadata_path = find_metadata_file(run_dir)?;
    let mut metadata: Value = serde_json::from_str(
        &fs::read_to_string(&metadata_path)
            .with_context(|| format!("read {}", metadata_path.display()))?,
    )
    .context("parse metadata")?;

    let entries = metadata["patches"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    let target_index = entries
        .iter()
        .position(|p| p["filename"].as_str() == Some(patch_filename))
        .with_context(|| format!("patch {patch_filename} not found in metadata"))?;
    let old_entry = entries[target_index].clone();
    let old_id = old_entry["id"].as_u64().unwrap_or(target_index as u64) as usize;

    // Extract the raw diff (strip the header comment block)
    let patch_content = fs::read_to_string(&patch_path)
        .with_context(|| format!("read {}", patch_path.display()))?;
    let diff_start = patch_content
        .find("diff --git")
        .context("patch file contains no diff")?;
    let diff_text = &patch_content[diff_start..];

    info!(patch = patch_filename, "re-splitting patch");
    let result = pipeline.split_changes(diff_text, options)?;
    let new_count = result.patches.len();

    // Stage the sub-split in a temp directory
    let staging = tempfile::tempdir().context("create staging directory")?;
    let repo = &metadata["repository"];
    let repo_str = |key: &str| repo[key].as_str().unwrap_or("").to_string();
    let repository = RepositoryInfo {
        path: repo_str("path"),
        name: repo_str("name"),
        current_branch: repo_str("current_branch"),
        source_repo_name: repo_str("source_repo_name"),
        language: repo["language"].as_str().unwrap_or("unknown").to_string(),
        description: None,
        analysis: json!({"mode": "resplit"}),
        base_branch: repo_str("base_branch"),
        commit_id: None,
        patch_file: None,
    };

    let staged = export_patches(
        &result,
        diff_text,
        staging.path(),
        &repository,
        pipeline.llm(),
        stamp,
    )?;

    let staged_metadata: Value = serde_json::from_str(
        &fs::read_to_string(&staged.metadata_path).context("read staged metadata")?,
    )
    .context("parse staged metadata")?;
    let staged_entries = staged_metadata["patches"]
        .as_array()
        .cloned()
        .unwrap_or_default();

    // Rebuild the manifest entry list with shifted ids
    let shift = new_count.saturating_sub(1);
    let mut updated_entries: Vec<Value> = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        if i < target_index {
            updated_entries.push(entry.clone());
        } else if i == target_index {
            for staged_entry in &staged_entries {
                let mut e = staged_entry.clone();
                let rel = e["id"].as_u64().unwrap_or(0) as usize;
                let new_id = old_id + rel;
                e["id"] = json!(new_id);
                e["category"] = old_entry["category"].clone();
                e["priority"] = old_entry["priority"].clone();

                let name_part = filename_name_part(staged_entry["filename"].as_str().unwrap_or(""));
                e["filename"] = json!(format!("{new_id:02}_{name_part}"));

                let deps: Vec<usize> = e["dependencies"]
                    .as_array()
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_u64)
                            .map(|d| old_id + d as usize)
                            .collect()
                    })
                    .unwrap_or_default();
                e["dependencies"] = json!(deps);
                updated_entries.push(e);
            }
        } else {
            let mut e = entry.clone();
            let id = e["id"].as_u64().unwrap_or(i as u64) as usize + shift;
            e["id"] = json!(id);
            let name_part = filename_name_part(entry["filename"].as_str().unwrap_or(""));
            e["filename"] = json!(format!("{id:02}_{name_part}"));
            let deps: Vec<usize> = e["dependencies"]
                .as_array()
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_u64)
                        .map(|d| {
                            let d = d as usize;
                            if d < old_id {
                                d
                            } else if d == old_id {
                                old_id
                            } else {
                                d + shift
                            }
                        })
                        .collect()
                })
                .unwrap_or_default();
            e["dependencies"] = json!(deps);
            updated_entries.push(e);
        }
    }

    // Rename later patch files from the highest id down to avoid collisions
    let mut renames: Vec<(PathBuf, PathBuf)> = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        if i <= target_index {
            continue;
        }
        let old_name = entry["filename"].as_str().unwrap_or("");
        let new_id = entry["id"].as_u64().unwrap_or(i as u64) as usize + shift;
        let new_name = format!("{new_id:02}_{}", filename_name_part(old_name));
        renames.push((run_dir.join(old_name), run_dir.join(new_name)));
    }
    for (from, to) in renames.into_iter().rev() {
        if from != to && from.exists() {
            fs::rename(&from, &to)
                .with_context(|| format!("rename {} -> {}", from.display(), to.display()))?;
        }
    }

    // Remove the split patch, copy in the staged replacements
    fs::remove_file(&patch_path)
        .with_context(|| format!("remove {}", patch_path.display()))?;
    for (rel, staged_entry) in staged_entries.iter().enumerate() {
        let staged_name = staged_entry["filename"].as_str().unwrap_or("");
        let new_id = old_id + rel;
        let dest_name = format!("{new_id:02}_{}", filename_name_part(staged_name));
        fs::copy(staging.path().join(staged_name), run_dir.join(&dest_name))
            .with_context(|| format!("copy staged patch {staged_name}"))?;
    }

    // Rewrite the manifest under a fresh timestamp
    metadata["patches"] = json!(updated_entries);
    metadata["total_patches"] = json!(updated_entries.len());
    metadata["generated_at"] = json!(stamp.unix);

    let new_metadata_path = run_dir.join(format!("metadata_{}.json", stamp.file_tag));
    fs::write(&new_metadata_path, serde_json::to_string_pretty(&metadata)?)
        .with_context(|| format!("write {}", new_metadata_path.display()))?;
    if new_metadata_path != metadata_path {
        fs::remove_file(&metadata_path)
            .with_context(|| format!("remove {}", metadata_path.display()))?;
    }

    info!(
        new_patches = new_count,
        total = updated_entries.len(),
        "re-split complete"
    );
    Ok(run_dir.to_path_buf())
}

/// Everything after the `NN_` prefix of a patch filename.
fn filename_name_part(filename: &str) -> String {
    filename
        .split_once('_')
        .map(|(_, rest)| rest.to_string())
        .unwrap_or_else(|| filename.to_string())
}

fn find_metadata_file(run_dir: &Path) -> Result<PathBuf> {
    fs::read_dir(run_dir)
        .with_context(|| format!("read {}", run_dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("metadata_") && n.ends_with(".json"))
        })
        .sorted()
        .next()
        .with_context(|| format!("no metadata file found in {}", run_dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Symbol, SymbolRole};

    #[test]
    fn patch_filenames_are_safe_and_prefixed() {
        assert_eq!(
            patch_filename(3, "Add user service / API"),
            "03_Add_user_service___API.patch"
        );
        let long = "x".repeat(120);
        assert!(patch_filename(0, &long).len() <= 50 + "00_.patch".len());
    }

    #[test]
    fn definition_files_render_first() {
        let def_sym = Symbol::definition("User", SymbolKind::Class, "models.py", 1);
        let mut use_sym = Symbol::definition("User", SymbolKind::Class, "views.py", 1);
        use_sym.role = SymbolRole::Usage;

        let def_change = Change {
            id: Change::make_id("models.py", 0),
            file: "models.py".to_string(),
            hunk_index: 0,
            kind: ChangeKind::Add,
            symbols: vec![def_sym],
            line_range: (1, 3),
            content: "@@ -0,0 +1,2 @@\n+class User:\n+    pass\n".to_string(),
            added_lines: 2,
            removed_lines: 0,
        };
        let use_change = Change {
            id: Change::make_id("views.py", 0),
            file: "views.py".to_string(),
            hunk_index: 0,
            kind: ChangeKind::Add,
            symbols: vec![use_sym],
            line_range: (1, 3),
            content: "@@ -0,0 +1,2 @@\n+from models import User\n+u = User()\n".to_string(),
            added_lines: 2,
            removed_lines: 0,
        };

        let mut by_file: IndexMap<&str, Vec<&Change>> = IndexMap::new();
        // Insert the using file first to prove ordering is not insertion order
        by_file.insert("views.py", vec![&use_change]);
        by_file.insert("models.py", vec![&def_change]);

        let order = order_files_by_definitions(&by_file);
        assert_eq!(order, vec!["models.py".to_string(), "views.py".to_string()]);
    }

    #[test]
    fn categorization_rules() {
        let import_change = Change {
            id: "a.py:hunk_0".to_string(),
            file: "a.py".to_string(),
            hunk_index: 0,
            kind: ChangeKind::Modify,
            symbols: vec![Symbol {
                name: "os".to_string(),
                kind: SymbolKind::Import,
                file: "a.py".to_string(),
                line: 1,
                role: SymbolRole::Definition,
                package: None,
                qualified_name: None,
                scope: None,
            }],
            line_range: (1, 2),
            content: String::new(),
            added_lines: 1,
            removed_lines: 0,
        };
        assert_eq!(categorize_patch(&[&import_change]), "refactor");

        let fn_change = Change {
            symbols: vec![Symbol::definition("f", SymbolKind::Function, "a.py", 1)],
            ..import_change.clone()
        };
        assert_eq!(categorize_patch(&[&fn_change]), "feature");

        let bare = Change {
            symbols: vec![],
            ..import_change
        };
        assert_eq!(categorize_patch(&[&bare]), "other");
    }

    #[test]
    fn change_descriptions() {
        let c = Change {
            id: "a.py:hunk_0".to_string(),
            file: "a.py".to_string(),
            hunk_index: 0,
            kind: ChangeKind::Add,
            symbols: vec![Symbol::definition("f", SymbolKind::Function, "a.py", 1)],
            line_range: (1, 4),
            content: String::new(),
            added_lines: 3,
            removed_lines: 0,
        };
        assert_eq!(describe_change(&c), "Adds f to a.py");

        let bare = Change {
            symbols: vec![],
            kind: ChangeKind::Delete,
            removed_lines: 7,
            ..c
        };
        assert_eq!(describe_change(&bare), "Removes 7 lines from a.py");
    }
}
