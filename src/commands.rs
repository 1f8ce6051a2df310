//! CLI command runners: diff sourcing, pipeline invocation, and export.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use owo_colors::OwoColorize;
use serde_json::json;
use tracing::warn;

use crate::cli::{AppContext, ResplitArgs, SplitArgs};
use crate::core::export::{RepositoryInfo, RunStamp, export_patches, resplit_patch};
use crate::core::git::{CommitInfo, GitAnalyzer, detect_language_from_diff, diff_stats};
use crate::core::model::SplitError;
use crate::core::pipeline::{AdditionalContext, SplitOptions, SplitPipeline};
use crate::infra::config::SourceConfig;
use crate::infra::llm::{LlmClient, LlmConfig};

/// How the diff was obtained, for the metadata manifest.
enum AnalysisMode {
    PatchFile(PathBuf),
    Commit(String),
    Branch(String),
    WorkingDirectory,
}

impl AnalysisMode {
    fn label(&self) -> &'static str {
        match self {
            Self::PatchFile(_) => "patch_file",
            Self::Commit(_) => "commit",
            Self::Branch(_) => "branch",
            Self::WorkingDirectory => "working_directory",
        }
    }

    /// Timestamped run directory name under the output root.
    fn run_dir_name(&self, stamp: &RunStamp) -> String {
        match self {
            Self::PatchFile(path) => {
                let base = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "patch".to_string());
                format!("patch_{base}_{}", stamp.file_tag)
            }
            Self::Commit(commit) => {
                let short: String = commit.chars().take(8).collect();
                format!("commit_{short}_{}", stamp.file_tag)
            }
            Self::Branch(branch) => {
                format!("branch_{}_{}", branch.replace('/', "_"), stamp.file_tag)
            }
            Self::WorkingDirectory => format!("uncommitted_{}", stamp.file_tag),
        }
    }
}

/// `dsp split`
pub fn split_run(args: SplitArgs, ctx: &AppContext) -> Result<()> {
    // Resolve the repository path
    let repo_path = match (&args.repo, &args.source_config) {
        (Some(repo), Some(config_path)) => SourceConfig::load(config_path)?.resolve(repo)?,
        (Some(repo), None) => {
            return Err(SplitError::UnknownRepo(repo.clone()))
                .context("--repo requires --source-config");
        }
        _ => std::env::current_dir().context("resolve current directory")?,
    };
    let repo_name = args
        .repo
        .clone()
        .or_else(|| {
            repo_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "repository".to_string());

    // Source the diff
    let (diff_text, mode, commit_info, language, current_branch) =
        source_diff(&args, &repo_path)?;
    if diff_text.trim().is_empty() {
        bail!(SplitError::EmptyDiff);
    }

    if ctx.verbose {
        let stats = diff_stats(&diff_text);
        println!(
            "Changes: {} {}",
            format!("+{}", stats.additions).green(),
            format!("-{}", stats.deletions).red()
        );
        println!("Files: {}", stats.files.len());
    }

    if args.dry_run {
        println!("{}", "Dry run complete - no patches generated".yellow());
        return Ok(());
    }

    // Enhancer setup: requires an API key unless disabled outright
    let llm = build_llm(args.no_llm, &args.api_key, &args.api_base, &args.model)?;

    let mut context = AdditionalContext::default();
    if let Some(info) = &commit_info {
        let mut message = info.summary.clone();
        if !info.body.is_empty() {
            message.push_str("\n\n");
            message.push_str(&info.body);
        }
        context.commit_message = Some(message);
    }

    let pipeline = SplitPipeline::new(llm).with_context(context);
    let options = SplitOptions {
        target_patch_size: args.target_size,
        max_patches: args.max_patches,
        cancel: None,
    };

    let result = pipeline.split_changes(&diff_text, &options)?;

    // Export under a timestamped subdirectory
    let stamp = RunStamp::now();
    let run_dir = args.output_dir.join(mode.run_dir_name(&stamp));

    let repository = RepositoryInfo {
        path: repo_path.to_string_lossy().into_owned(),
        name: repo_name.clone(),
        current_branch,
        source_repo_name: repo_name,
        language,
        description: commit_info.as_ref().map(|c| c.summary.clone()),
        analysis: json!({"mode": mode.label()}),
        base_branch: match &mode {
            AnalysisMode::PatchFile(_) => "N/A".to_string(),
            _ => args.base_branch.clone(),
        },
        commit_id: match &mode {
            AnalysisMode::Commit(commit) => Some(commit.clone()),
            _ => None,
        },
        patch_file: match &mode {
            AnalysisMode::PatchFile(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            _ => None,
        },
    };

    let export = export_patches(
        &result,
        &diff_text,
        &run_dir,
        &repository,
        pipeline.llm(),
        &stamp,
    )?;

    // Human summary
    println!("{}", "Patch generation complete".green().bold());
    println!("Output directory: {}", run_dir.display());
    println!("Patches created: {}", result.patches.len());
    println!("Total changes: {} hunks", result.metadata.num_changes);
    println!("Dependencies: {}", result.metadata.num_dependencies);

    if !export.integrity.is_clean() {
        println!(
            "{}",
            format!(
                "Hunk integrity check failed: {} missing, {} spurious",
                export.integrity.missing.len(),
                export.integrity.spurious.len()
            )
            .red()
        );
    }

    if !result.warnings.is_empty() {
        println!("Warnings: {}", result.warnings.len());
        for warning in result.warnings.iter().take(5) {
            println!("  - {warning}");
        }
        if result.warnings.len() > 5 {
            println!("  ... and {} more", result.warnings.len() - 5);
        }
    }

    println!("\nTo apply patches:");
    println!("  cd {}", run_dir.display());
    println!("  ./apply_patches.sh");

    Ok(())
}

/// `dsp resplit`
pub fn resplit_run(args: ResplitArgs, _ctx: &AppContext) -> Result<()> {
    let llm = build_llm(args.no_llm, &args.api_key, &args.api_base, &args.model)?;
    let pipeline = SplitPipeline::new(llm);
    let options = SplitOptions {
        target_patch_size: args.target_size,
        max_patches: args.max_patches,
        cancel: None,
    };

    let stamp = RunStamp::now();
    let dir = resplit_patch(
        &pipeline,
        &args.patch_split_dir,
        &args.patch_filename,
        &options,
        &stamp,
    )?;

    println!("{}", "Re-split complete".green().bold());
    println!("Updated directory: {}", dir.display());
    Ok(())
}

/// Source the diff per the selected mode, along with context for metadata.
fn source_diff(
    args: &SplitArgs,
    repo_path: &Path,
) -> Result<(String, AnalysisMode, Option<CommitInfo>, String, String)> {
    if let Some(patch) = &args.patch {
        if !patch.is_file() {
            bail!(SplitError::PatchFileNotFound(
                patch.to_string_lossy().into_owned()
            ));
        }
        let diff = std::fs::read_to_string(patch)
            .with_context(|| format!("read patch file {}", patch.display()))?;
        let language = detect_language_from_diff(&diff);
        return Ok((
            diff,
            AnalysisMode::PatchFile(patch.clone()),
            None,
            language,
            "N/A".to_string(),
        ));
    }

    let git = GitAnalyzer::new(repo_path)?;
    let language = git.detect_language();
    let current_branch = git.current_branch();

    if let Some(commit) = &args.commit {
        if let Some(branch) = &args.target_branch
            && !git.commit_exists_in_branch(commit, branch)
        {
            bail!(SplitError::CommitNotInBranch {
                commit: commit.clone(),
                branch: branch.clone(),
            });
        }
        let compare_ref = args
            .compare_with
            .clone()
            .unwrap_or_else(|| format!("{commit}^"));
        let diff = git.diff_between(&compare_ref, commit)?;
        let info = git.commit_info(commit);
        return Ok((
            diff,
            AnalysisMode::Commit(commit.clone()),
            info,
            language,
            current_branch,
        ));
    }

    if let Some(target) = &args.target_branch {
        let diff = git.diff_between(&args.base_branch, target)?;
        return Ok((
            diff,
            AnalysisMode::Branch(target.clone()),
            None,
            language,
            current_branch,
        ));
    }

    let untracked_list = (!args.untracked_files.is_empty()).then_some(args.untracked_files.as_slice());
    let diff = git.working_directory_diff(&args.base_branch, args.untracked, untracked_list)?;
    Ok((
        diff,
        AnalysisMode::WorkingDirectory,
        None,
        language,
        current_branch,
    ))
}

/// Build the enhancer client, or None when disabled or unconfigured.
fn build_llm(
    no_llm: bool,
    api_key: &Option<String>,
    api_base: &Option<String>,
    model: &Option<String>,
) -> Result<Option<LlmClient>> {
    if no_llm {
        return Ok(None);
    }
    let Some(api_key) = api_key else {
        warn!("no LLM API key provided, continuing with static analysis only");
        return Ok(None);
    };
    if api_base.is_none() {
        warn!("no --api-base provided, using the OpenAI default");
    }
    let client = LlmClient::new(LlmConfig {
        api_key: api_key.clone(),
        api_base: api_base.clone(),
        model: model.clone().unwrap_or_else(|| "gpt-4".to_string()),
    })?;
    Ok(Some(client))
}
