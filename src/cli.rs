use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Shared application context for global flags
#[derive(Clone, Debug)]
pub struct AppContext {
    pub verbose: bool, // global --verbose
    pub debug: bool,   // global --debug
}

#[derive(Parser)]
#[command(name = "diffsplit")]
#[command(about = "Split one large unified diff into dependency-ordered, reviewable patches")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose progress output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze a diff and split it into ordered patch files
    Split(SplitArgs),

    /// Re-split one emitted patch file within an existing output directory
    Resplit(ResplitArgs),
}

#[derive(Parser)]
pub struct SplitArgs {
    /// Path to the source repositories configuration file (YAML/JSON)
    #[arg(long)]
    pub source_config: Option<PathBuf>,

    /// Repository name from the source config to analyze
    #[arg(long)]
    pub repo: Option<String>,

    /// Base branch to compare against
    #[arg(short, long, default_value = "main")]
    pub base_branch: String,

    /// Target branch for comparison, or the branch a commit must belong to
    #[arg(short, long)]
    pub target_branch: Option<String>,

    /// Specific commit to analyze (compared against its parent)
    #[arg(long)]
    pub commit: Option<String>,

    /// Compare the commit with this ref instead of its parent
    #[arg(long)]
    pub compare_with: Option<String>,

    /// Analyze a literal patch file instead of git state
    #[arg(short, long)]
    pub patch: Option<PathBuf>,

    /// Output directory for patch sets
    #[arg(short, long, default_value = "./diff_splits")]
    pub output_dir: PathBuf,

    /// Target size for each patch in changed lines
    #[arg(short = 's', long, default_value_t = 200)]
    pub target_size: usize,

    /// Maximum number of patches
    #[arg(long)]
    pub max_patches: Option<usize>,

    /// Disable LLM-enhanced analysis
    #[arg(long)]
    pub no_llm: bool,

    /// API key for the LLM service
    #[arg(short = 'k', long)]
    pub api_key: Option<String>,

    /// Base URL for the LLM API
    #[arg(long)]
    pub api_base: Option<String>,

    /// LLM model name
    #[arg(short, long)]
    pub model: Option<String>,

    /// Analyze changes without generating patch files
    #[arg(long)]
    pub dry_run: bool,

    /// Include untracked (new) files in working-directory mode
    #[arg(long)]
    pub untracked: bool,

    /// Specific untracked files to include (all when omitted)
    #[arg(value_name = "UNTRACKED_FILES")]
    pub untracked_files: Vec<String>,
}

#[derive(Parser)]
pub struct ResplitArgs {
    /// Existing patch split directory
    pub patch_split_dir: PathBuf,

    /// Patch file within that directory to re-split
    pub patch_filename: String,

    /// Target size for each patch in changed lines
    #[arg(short = 's', long, default_value_t = 200)]
    pub target_size: usize,

    /// Maximum number of patches
    #[arg(long)]
    pub max_patches: Option<usize>,

    /// Disable LLM-enhanced analysis
    #[arg(long)]
    pub no_llm: bool,

    /// API key for the LLM service
    #[arg(short = 'k', long)]
    pub api_key: Option<String>,

    /// Base URL for the LLM API
    #[arg(long)]
    pub api_base: Option<String>,

    /// LLM model name
    #[arg(short, long)]
    pub model: Option<String>,
}
