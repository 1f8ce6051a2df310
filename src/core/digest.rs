//! Content digests for hunks and input/output conservation checking.
//!
//! The digest ignores the `@@` header and whitespace-only differences so a
//! hunk keeps its identity across line-number adjustments; comparison is
//! over multisets, so duplicated hunks are caught too.

use indexmap::IndexMap;
use xxhash_rust::xxh64::xxh64;

/// Stable digest of a hunk: strip the `@@` header, drop empty lines,
/// right-trim the rest, join with newlines, hash.
pub fn hunk_digest(content: &str) -> String {
    let normalized: Vec<&str> = content
        .lines()
        .filter(|line| !line.is_empty() && !line.starts_with("@@"))
        .map(str::trim_end)
        .collect();
    format!("{:016x}", xxh64(normalized.join("\n").as_bytes(), 0))
}

/// A hunk located inside a patch file, with its digest.
#[derive(Debug, Clone)]
pub struct HunkRecord {
    pub file: String,
    pub content: String,
    pub digest: String,
}

/// Scan a patch or diff file into (file, hunk, digest) records.
///
/// Tolerates the `#` header comment block our patch files start with.
pub fn extract_hunks(patch_content: &str) -> Vec<HunkRecord> {
    let mut records = Vec::new();
    let mut current_file: Option<String> = None;
    let mut hunk_lines: Vec<&str> = Vec::new();
    let mut in_hunk = false;

    let mut flush = |file: &Option<String>, lines: &mut Vec<&str>| {
        if let Some(file) = file
            && !lines.is_empty()
        {
            let content = lines.join("\n");
            records.push(HunkRecord {
                file: file.clone(),
                digest: hunk_digest(&content),
                content,
            });
        }
        lines.clear();
    };

    for line in patch_content.lines() {
        if line.starts_with('#') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("diff --git ") {
            flush(&current_file, &mut hunk_lines);
            current_file = rest
                .split_whitespace()
                .nth(1)
                .map(|p| p.strip_prefix("b/").unwrap_or(p).to_string());
            in_hunk = false;
            continue;
        }
        if line.starts_with("index ") || line.starts_with("--- ") || line.starts_with("+++ ")
            || line.starts_with("new file mode") || line.starts_with("deleted file mode")
        {
            continue;
        }
        if line.starts_with("@@") {
            flush(&current_file, &mut hunk_lines);
            hunk_lines.push(line);
            in_hunk = true;
            continue;
        }
        if in_hunk {
            hunk_lines.push(line);
        }
    }
    flush(&current_file, &mut hunk_lines);

    records
}

/// A digest present on one side of the comparison only.
#[derive(Debug, Clone)]
pub struct HunkMismatch {
    pub digest: String,
    pub file: String,
    pub preview: String,
}

/// Result of reconciling input hunks against emitted patch files.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub input_hunks: usize,
    pub output_hunks: usize,
    pub matched: usize,

    /// In the input only, i.e. lost by the split
    pub missing: Vec<HunkMismatch>,

    /// In the output only, i.e. fabricated by the split
    pub spurious: Vec<HunkMismatch>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.spurious.is_empty()
    }
}

fn preview(record: &HunkRecord) -> String {
    let first = record.content.lines().next().unwrap_or("");
    first.chars().take(60).collect()
}

/// Compare the multiset of hunk digests in the original diff against the
/// union of all emitted patch file contents.
pub fn verify_hunk_integrity(original_diff: &str, patch_contents: &[String]) -> IntegrityReport {
    let input = extract_hunks(original_diff);
    let output: Vec<HunkRecord> = patch_contents
        .iter()
        .flat_map(|content| extract_hunks(content))
        .collect();

    let mut input_counts: IndexMap<&str, (usize, &HunkRecord)> = IndexMap::new();
    for record in &input {
        input_counts
            .entry(record.digest.as_str())
            .or_insert((0, record))
            .0 += 1;
    }
    let mut output_counts: IndexMap<&str, (usize, &HunkRecord)> = IndexMap::new();
    for record in &output {
        output_counts
            .entry(record.digest.as_str())
            .or_insert((0, record))
            .0 += 1;
    }

    let mut report = IntegrityReport {
        input_hunks: input.len(),
        output_hunks: output.len(),
        ..Default::default()
    };

    for (digest, &(count, record)) in &input_counts {
        let out_count = output_counts.get(digest).map_or(0, |&(c, _)| c);
        report.matched += count.min(out_count);
        for _ in out_count..count {
            report.missing.push(HunkMismatch {
                digest: (*digest).to_string(),
                file: record.file.clone(),
                preview: preview(record),
            });
        }
    }
    for (digest, &(count, record)) in &output_counts {
        let in_count = input_counts.get(digest).map_or(0, |&(c, _)| c);
        for _ in in_count..count {
            report.spurious.push(HunkMismatch {
                digest: (*digest).to_string(),
                file: record.file.clone(),
                preview: preview(record),
            });
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF: &str = "\
diff --git a/a.py b/a.py
index 1234567..abcdefg 100644
--- a/a.py
+++ b/a.py
@@ -1,2 +1,3 @@
 import os
+x = 1
 y = 2
@@ -10,2 +11,2 @@
-old = 1
+new = 1
";

    #[test]
    fn digest_ignores_header_and_trailing_whitespace() {
        let a = "@@ -1,2 +1,3 @@\n line\n+added  \n";
        let b = "@@ -50,2 +60,3 @@\n line\n+added\n";
        assert_eq!(hunk_digest(a), hunk_digest(b));

        let c = "@@ -1,2 +1,3 @@\n line\n+different\n";
        assert_ne!(hunk_digest(a), hunk_digest(c));
    }

    #[test]
    fn digest_ignores_blank_lines() {
        let a = "+one\n\n+two\n";
        let b = "+one\n+two\n";
        assert_eq!(hunk_digest(a), hunk_digest(b));
    }

    #[test]
    fn extracts_all_hunks_with_files() {
        let records = extract_hunks(DIFF);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.file == "a.py"));
        assert!(records[0].content.starts_with("@@ -1,2 +1,3 @@"));
    }

    #[test]
    fn header_comments_are_skipped() {
        let patch = format!("# My patch\n# Description: something\n\n{DIFF}");
        let records = extract_hunks(&patch);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn clean_split_reconciles() {
        // Split the two hunks across two patch files
        let p1 = "\
diff --git a/a.py b/a.py
--- a/a.py
+++ b/a.py
@@ -1,2 +1,3 @@
 import os
+x = 1
 y = 2
"
        .to_string();
        let p2 = "\
diff --git a/a.py b/a.py
--- a/a.py
+++ b/a.py
@@ -10,2 +11,2 @@
-old = 1
+new = 1
"
        .to_string();

        let report = verify_hunk_integrity(DIFF, &[p1, p2]);
        assert!(report.is_clean());
        assert_eq!(report.input_hunks, 2);
        assert_eq!(report.output_hunks, 2);
        assert_eq!(report.matched, 2);
    }

    #[test]
    fn missing_and_spurious_are_reported() {
        let only_first = "\
diff --git a/a.py b/a.py
--- a/a.py
+++ b/a.py
@@ -1,2 +1,3 @@
 import os
+x = 1
 y = 2
diff --git a/ghost.py b/ghost.py
--- a/ghost.py
+++ b/ghost.py
@@ -1,1 +1,2 @@
 pass
+invented = True
"
        .to_string();

        let report = verify_hunk_integrity(DIFF, &[only_first]);
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.spurious.len(), 1);
        assert_eq!(report.spurious[0].file, "ghost.py");
    }

    #[test]
    fn duplicate_hunks_violate_the_multiset() {
        let doubled = vec![DIFF.to_string(), DIFF.to_string()];
        let report = verify_hunk_integrity(DIFF, &doubled);
        assert!(!report.is_clean());
        assert_eq!(report.spurious.len(), 2);
    }
}
