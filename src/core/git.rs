//! Git integration: diff extraction, commit validation, and repository
//! introspection for the CLI front end.
//!
//! When the analyzed path is a subdirectory of the git root, diffs and
//! untracked listings are filtered down to that subtree.

use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

use crate::core::symbols::Language;

/// Commit details used for naming context and metadata.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub sha: String,
    pub short_sha: String,
    pub author: String,
    pub email: String,
    pub summary: String,
    pub body: String,
}

/// Line/file counts parsed out of a unified diff.
#[derive(Debug, Clone, Default)]
pub struct DiffStats {
    pub additions: usize,
    pub deletions: usize,
    pub files: Vec<String>,
}

/// Wrapper over the `git` binary rooted at one repository path.
pub struct GitAnalyzer {
    repo_path: PathBuf,
    relative_path: Option<String>,
}

impl GitAnalyzer {
    pub fn new(repo_path: &Path) -> Result<Self> {
        let repo_path = repo_path
            .canonicalize()
            .with_context(|| format!("resolve repository path {}", repo_path.display()))?;

        let mut analyzer = Self {
            repo_path,
            relative_path: None,
        };

        let root = analyzer
            .run_git(&["rev-parse", "--show-toplevel"])
            .with_context(|| {
                format!("not a git repository: {}", analyzer.repo_path.display())
            })?;
        let git_root = PathBuf::from(root.trim());

        analyzer.relative_path = analyzer
            .repo_path
            .strip_prefix(&git_root)
            .ok()
            .filter(|rel| !rel.as_os_str().is_empty())
            .map(|rel| rel.to_string_lossy().replace('\\', "/"));

        Ok(analyzer)
    }

    fn run_git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .args(args)
            .output()
            .context("failed to run git")?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Diff between two refs, filtered to the analyzed subtree.
    pub fn diff_between(&self, base: &str, target: &str) -> Result<String> {
        let diff = self
            .run_git(&["diff", base, target])
            .with_context(|| format!("failed to get diff between {base} and {target}"))?;
        Ok(self.filter_diff_by_path(&diff))
    }

    /// Working tree (staged + unstaged) against a base branch, optionally
    /// including untracked files as synthetic added-file diffs.
    pub fn working_directory_diff(
        &self,
        base_branch: &str,
        include_untracked: bool,
        untracked_list: Option<&[String]>,
    ) -> Result<String> {
        let tracked = self
            .run_git(&["diff", base_branch])
            .with_context(|| format!("failed to diff working tree against {base_branch}"))?;
        let tracked = self.filter_diff_by_path(&tracked);

        if !include_untracked {
            return Ok(tracked);
        }

        let untracked = match untracked_list {
            Some(list) if !list.is_empty() => list.to_vec(),
            _ => self.untracked_files(),
        };
        let untracked = self.filter_files_by_path(untracked);

        let mut sections: Vec<String> = Vec::new();
        if !tracked.trim().is_empty() {
            sections.push(tracked);
        }
        for file in untracked {
            if let Some(diff) = self.synthetic_new_file_diff(&file) {
                sections.push(diff);
            }
        }
        Ok(sections.join("\n"))
    }

    pub fn commit_info(&self, commit: &str) -> Option<CommitInfo> {
        let output = self
            .run_git(&["log", "-1", "--format=%H%n%h%n%an%n%ae%n%s%n%b", commit])
            .ok()?;
        let mut lines = output.lines();
        Some(CommitInfo {
            sha: lines.next()?.to_string(),
            short_sha: lines.next()?.to_string(),
            author: lines.next()?.to_string(),
            email: lines.next()?.to_string(),
            summary: lines.next()?.to_string(),
            body: lines.collect::<Vec<_>>().join("\n").trim().to_string(),
        })
    }

    pub fn current_branch(&self) -> String {
        self.run_git(&["rev-parse", "--abbrev-ref", "HEAD"])
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "HEAD".to_string())
    }

    /// Is `commit` an ancestor of `branch` (local or remote-tracking)?
    pub fn commit_exists_in_branch(&self, commit: &str, branch: &str) -> bool {
        let Ok(sha) = self.run_git(&["rev-parse", commit]) else {
            return false;
        };
        let sha = sha.trim();

        for args in [
            ["branch", "-r", "-l", "--contains", sha],
            ["branch", "-l", "--contains", sha, ""],
        ] {
            let args: Vec<&str> = args.iter().copied().filter(|a| !a.is_empty()).collect();
            let Ok(listing) = self.run_git(&args) else {
                continue;
            };
            for line in listing.lines() {
                let name = line.trim().trim_start_matches("* ").trim();
                if name == branch
                    || name == format!("origin/{branch}")
                    || name.ends_with(&format!("/{branch}"))
                {
                    return true;
                }
            }
        }
        false
    }

    fn untracked_files(&self) -> Vec<String> {
        self.run_git(&["ls-files", "--others", "--exclude-standard"])
            .map(|out| {
                out.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Render an untracked file as an all-additions unified diff.
    fn synthetic_new_file_diff(&self, file: &str) -> Option<String> {
        let full = self.repo_path.join(file);
        if !full.is_file() {
            return None;
        }
        // Binary or unreadable files are skipped silently
        let content = std::fs::read_to_string(&full).ok()?;
        let lines: Vec<&str> = content.split('\n').collect();

        let mut out = String::new();
        out.push_str(&format!("diff --git a/{file} b/{file}\n"));
        out.push_str("new file mode 100644\n");
        out.push_str("index 0000000..1111111\n");
        out.push_str("--- /dev/null\n");
        out.push_str(&format!("+++ b/{file}\n"));
        out.push_str(&format!("@@ -0,0 +1,{} @@\n", lines.len()));
        for line in &lines {
            out.push('+');
            out.push_str(line);
            out.push('\n');
        }
        Some(out)
    }

    /// Dominant language over tracked files, by extension frequency.
    pub fn detect_language(&self) -> String {
        let Ok(listing) = self.run_git(&["ls-files"]) else {
            return "unknown".to_string();
        };

        let mut counts: HashMap<&'static str, usize> = HashMap::new();
        for file in listing.lines() {
            let language = Language::from_path(file.trim());
            if language != Language::Unknown {
                *counts.entry(language.as_str()).or_insert(0) += 1;
            }
        }

        counts
            .into_iter()
            .max_by_key(|&(lang, count)| (count, std::cmp::Reverse(lang)))
            .map(|(lang, _)| lang.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn filter_files_by_path(&self, files: Vec<String>) -> Vec<String> {
        let Some(rel) = &self.relative_path else {
            return files;
        };
        let prefix = format!("{rel}/");
        files
            .into_iter()
            .filter(|f| f.starts_with(&prefix) || f == rel)
            .collect()
    }

    /// Keep only `diff --git` blocks whose path sits under the subtree.
    fn filter_diff_by_path(&self, diff: &str) -> String {
        let Some(rel) = &self.relative_path else {
            return diff.to_string();
        };
        if diff.trim().is_empty() {
            return diff.to_string();
        }
        let prefix = format!("{rel}/");

        let mut kept: Vec<&str> = Vec::new();
        let mut include = false;
        for line in diff.lines() {
            if let Some(rest) = line.strip_prefix("diff --git ") {
                let path = rest
                    .split_whitespace()
                    .next()
                    .map(|p| p.strip_prefix("a/").unwrap_or(p))
                    .unwrap_or("");
                include = path.starts_with(&prefix) || path == rel;
            }
            if include {
                kept.push(line);
            }
        }
        let mut out = kept.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }
}

/// Parse addition/deletion/file statistics out of a unified diff.
pub fn diff_stats(diff_text: &str) -> DiffStats {
    let mut stats = DiffStats::default();
    let mut files = std::collections::BTreeSet::new();

    for line in diff_text.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some(path) = rest
                .split_whitespace()
                .nth(1)
                .map(|p| p.strip_prefix("b/").unwrap_or(p))
            {
                files.insert(path.to_string());
            }
        } else if line.starts_with('+') && !line.starts_with("+++") {
            stats.additions += 1;
        } else if line.starts_with('-') && !line.starts_with("---") {
            stats.deletions += 1;
        }
    }

    stats.files = files.into_iter().collect();
    debug!(
        additions = stats.additions,
        deletions = stats.deletions,
        files = stats.files.len(),
        "diff stats"
    );
    stats
}

/// Dominant language of a patch file, from its diff header paths.
pub fn detect_language_from_diff(diff_text: &str) -> String {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    for line in diff_text.lines() {
        let Some(rest) = line.strip_prefix("diff --git ") else {
            continue;
        };
        for part in rest.split_whitespace() {
            let path = part
                .strip_prefix("a/")
                .or_else(|| part.strip_prefix("b/"))
                .unwrap_or(part);
            let language = Language::from_path(path);
            if language != Language::Unknown {
                *counts.entry(language.as_str()).or_insert(0) += 1;
            }
        }
    }
    counts
        .into_iter()
        .max_by_key(|&(lang, count)| (count, std::cmp::Reverse(lang)))
        .map(|(lang, _)| lang.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF: &str = "\
diff --git a/src/a.py b/src/a.py
--- a/src/a.py
+++ b/src/a.py
@@ -1,2 +1,3 @@
 keep
+added
-removed
diff --git a/src/b.py b/src/b.py
--- a/src/b.py
+++ b/src/b.py
@@ -1,1 +1,2 @@
 keep
+more
";

    #[test]
    fn stats_count_lines_and_files() {
        let stats = diff_stats(DIFF);
        assert_eq!(stats.additions, 2);
        assert_eq!(stats.deletions, 1);
        assert_eq!(stats.files, vec!["src/a.py".to_string(), "src/b.py".to_string()]);
    }

    #[test]
    fn language_detection_from_diff_headers() {
        assert_eq!(detect_language_from_diff(DIFF), "python");
        let go_diff = "diff --git a/x.go b/x.go\n";
        assert_eq!(detect_language_from_diff(go_diff), "go");
        assert_eq!(detect_language_from_diff("nothing"), "unknown");
    }
}
