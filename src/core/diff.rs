//! Unified diff parsing into per-hunk `Change` records.
//!
//! The strict parser tracks hunk line budgets from the `@@` header, which is
//! how it detects structural corruption; any failure drops the whole input
//! to a tolerant scanner that only keys on `diff --git` and `@@` markers.

use anyhow::{Result, bail};
use regex::Regex;
use tracing::warn;

use crate::core::model::{Change, ChangeKind, Symbol, SymbolKind, SymbolRole};
use crate::core::symbols::{Extraction, Language};

/// `@@ -s[,l] +s[,l] @@ [section]`
fn hunk_header_re() -> Regex {
    Regex::new(r"^@@\s*-(\d+)(?:,(\d+))?\s+\+(\d+)(?:,(\d+))?\s*@@").expect("static hunk header")
}

/// Parse a unified diff into structured changes.
///
/// Malformed input never panics: the strict pass either succeeds or the
/// tolerant fallback takes over with best-effort line ranges.
pub fn parse_diff(diff_text: &str) -> Vec<Change> {
    match parse_strict(diff_text) {
        Ok(changes) => changes,
        Err(err) => {
            warn!(%err, "strict diff parsing failed, using fallback parser");
            parse_fallback(diff_text)
        }
    }
}

struct FileBlock {
    source: String,
    target: String,
}

impl FileBlock {
    /// Target-side path is canonical; deletions fall back to the source.
    fn canonical_path(&self) -> &str {
        if self.target.is_empty() || self.target == "/dev/null" {
            &self.source
        } else {
            &self.target
        }
    }
}

/// Strip the `a/` or `b/` VCS prefix from a diff path.
fn strip_vcs_prefix(path: &str) -> &str {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}

fn parse_strict(diff_text: &str) -> Result<Vec<Change>> {
    let header_re = hunk_header_re();
    let mut changes = Vec::new();

    let mut lines = diff_text.lines().peekable();
    let mut current: Option<FileBlock> = None;
    let mut hunk_index = 0usize;

    while let Some(line) = lines.next() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            let mut parts = rest.split_whitespace();
            let source = parts.next().map(strip_vcs_prefix).unwrap_or_default();
            let target = parts.next().map(strip_vcs_prefix).unwrap_or_default();
            current = Some(FileBlock {
                source: source.to_string(),
                target: target.to_string(),
            });
            hunk_index = 0;
            continue;
        }

        if let Some(rest) = line.strip_prefix("--- ") {
            if let Some(block) = current.as_mut() {
                let p = strip_vcs_prefix(rest.trim());
                if p != "/dev/null" {
                    block.source = p.to_string();
                }
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("+++ ") {
            if let Some(block) = current.as_mut() {
                block.target = strip_vcs_prefix(rest.trim()).to_string();
            }
            continue;
        }

        if line.starts_with("@@") {
            let Some(block) = current.as_ref() else {
                bail!("hunk header before any file block");
            };
            let Some(cap) = header_re.captures(line) else {
                bail!("malformed hunk header: {line}");
            };

            let old_len: usize = cap.get(2).map_or(1, |m| m.as_str().parse().unwrap_or(1));
            let new_start: usize = cap[3].parse().unwrap_or(0);
            let new_len: usize = cap.get(4).map_or(1, |m| m.as_str().parse().unwrap_or(1));

            let mut body: Vec<&str> = Vec::new();
            let mut old_remaining = old_len;
            let mut new_remaining = new_len;

            while old_remaining > 0 || new_remaining > 0 {
                let Some(&next) = lines.peek() else {
                    bail!("truncated hunk in {}", block.canonical_path());
                };
                let consumed = match next.as_bytes().first().copied() {
                    Some(b'+') if !next.starts_with("+++") => {
                        new_remaining = new_remaining.saturating_sub(1);
                        true
                    }
                    Some(b'-') if !next.starts_with("---") => {
                        old_remaining = old_remaining.saturating_sub(1);
                        true
                    }
                    Some(b' ') | None => {
                        old_remaining = old_remaining.saturating_sub(1);
                        new_remaining = new_remaining.saturating_sub(1);
                        true
                    }
                    Some(b'\\') => true, // "\ No newline at end of file"
                    _ => bail!(
                        "unexpected line inside hunk of {}: {next}",
                        block.canonical_path()
                    ),
                };
                if consumed {
                    body.push(next);
                    lines.next();
                }
            }
            // Trailing no-newline marker belongs to the hunk
            if lines.peek().is_some_and(|l| l.starts_with('\\')) {
                body.push(lines.next().unwrap_or_default());
            }

            let file = block.canonical_path().to_string();
            changes.push(build_change(&file, hunk_index, line, &body, new_start, new_len));
            hunk_index += 1;
        }
    }

    Ok(changes)
}

/// Tolerant scanner: recognizes `diff --git` and `@@` markers only,
/// best-effort extracting `+start,len` ranges from the header.
fn parse_fallback(diff_text: &str) -> Vec<Change> {
    let header_re = hunk_header_re();
    let mut changes = Vec::new();

    let mut current_file: Option<String> = None;
    let mut hunk_index = 0usize;
    let mut hunk_lines: Vec<&str> = Vec::new();

    let mut flush = |file: &Option<String>, index: &mut usize, body: &mut Vec<&str>| {
        let (Some(file), [header, rest @ ..]) = (file, body.as_slice()) else {
            body.clear();
            return;
        };
        let (new_start, new_len) = header_re
            .captures(header)
            .map(|cap| {
                (
                    cap[3].parse().unwrap_or(0),
                    cap.get(4).map_or(1, |m| m.as_str().parse().unwrap_or(1)),
                )
            })
            .unwrap_or((0, 0));
        changes.push(build_change(file, *index, header, rest, new_start, new_len));
        *index += 1;
        body.clear();
    };

    for line in diff_text.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            flush(&current_file, &mut hunk_index, &mut hunk_lines);
            current_file = rest
                .split_whitespace()
                .nth(1)
                .map(|p| strip_vcs_prefix(p).to_string());
            hunk_index = 0;
        } else if line.starts_with("@@") {
            flush(&current_file, &mut hunk_index, &mut hunk_lines);
            hunk_lines.push(line);
        } else if !hunk_lines.is_empty() {
            let keep =
                matches!(line.as_bytes().first().copied(), Some(b'+' | b'-' | b' ')) || line.is_empty();
            if keep && !line.starts_with("+++") && !line.starts_with("---") {
                hunk_lines.push(line);
            } else if !line.starts_with('\\') {
                flush(&current_file, &mut hunk_index, &mut hunk_lines);
            }
        }
    }
    flush(&current_file, &mut hunk_index, &mut hunk_lines);

    changes
}

/// Assemble one Change from a hunk header and its body lines.
fn build_change(
    file: &str,
    hunk_index: usize,
    header: &str,
    body: &[&str],
    new_start: usize,
    new_len: usize,
) -> Change {
    let added_lines = body
        .iter()
        .filter(|l| l.starts_with('+') && !l.starts_with("+++"))
        .count();
    let removed_lines = body
        .iter()
        .filter(|l| l.starts_with('-') && !l.starts_with("---"))
        .count();

    // Verbatim content: header plus body, every line newline-terminated
    let mut content = String::with_capacity(header.len() + body.iter().map(|l| l.len() + 1).sum::<usize>() + 1);
    content.push_str(header);
    content.push('\n');
    for line in body {
        content.push_str(line);
        content.push('\n');
    }

    let added_text: String = body
        .iter()
        .filter(|l| l.starts_with('+') && !l.starts_with("+++"))
        .map(|l| &l[1..])
        .collect::<Vec<_>>()
        .join("\n");

    let language = Language::from_path(file);
    let extraction = if added_text.is_empty() {
        Extraction::default()
    } else {
        language.extract_all(&added_text, file, new_start)
    };

    Change {
        id: Change::make_id(file, hunk_index),
        file: file.to_string(),
        hunk_index,
        kind: ChangeKind::from_counts(added_lines, removed_lines),
        symbols: flatten_symbols(extraction, file, new_start),
        line_range: (new_start, new_start + new_len),
        content,
        added_lines,
        removed_lines,
    }
}

/// Merge an extraction into the flat symbol list a Change carries:
/// definitions, usages, and one Import pseudo-symbol per import entry.
fn flatten_symbols(extraction: Extraction, file: &str, base_line: usize) -> Vec<Symbol> {
    let mut symbols = extraction.definitions;
    symbols.extend(extraction.usages);
    for (alias, path) in extraction.imports {
        symbols.push(Symbol {
            name: alias,
            kind: SymbolKind::Import,
            file: file.to_string(),
            line: base_line,
            role: SymbolRole::Definition,
            package: None,
            qualified_name: Some(path),
            scope: None,
        });
    }
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "\
diff --git a/app/util.py b/app/util.py
index 1234567..abcdefg 100644
--- a/app/util.py
+++ b/app/util.py
@@ -1,3 +1,5 @@
 import os
+def greet(name):
+    return f\"hi {name}\"

 x = 1
";

    #[test]
    fn single_hunk_parse() {
        let changes = parse_diff(SIMPLE);
        assert_eq!(changes.len(), 1);

        let c = &changes[0];
        assert_eq!(c.id, "app/util.py:hunk_0");
        assert_eq!(c.file, "app/util.py");
        assert_eq!(c.kind, ChangeKind::Add);
        assert_eq!(c.added_lines, 2);
        assert_eq!(c.removed_lines, 0);
        assert_eq!(c.line_range, (1, 6));
        assert!(c.content.starts_with("@@ -1,3 +1,5 @@\n"));
        assert!(c.content.ends_with('\n'));
        assert!(c.symbols.iter().any(|s| s.name == "greet"));
    }

    #[test]
    fn hunk_indices_are_contiguous_per_file() {
        let diff = "\
diff --git a/a.py b/a.py
--- a/a.py
+++ b/a.py
@@ -1,1 +1,2 @@
 x = 1
+y = 2
@@ -10,1 +11,2 @@
 z = 3
+w = 4
diff --git a/b.py b/b.py
--- a/b.py
+++ b/b.py
@@ -1,1 +1,2 @@
 a = 1
+b = 2
";
        let changes = parse_diff(diff);
        let ids: Vec<&str> = changes.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a.py:hunk_0", "a.py:hunk_1", "b.py:hunk_0"]);
    }

    #[test]
    fn deletion_uses_source_path() {
        let diff = "\
diff --git a/old.py b/old.py
deleted file mode 100644
--- a/old.py
+++ /dev/null
@@ -1,2 +0,0 @@
-def gone():
-    pass
";
        let changes = parse_diff(diff);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].file, "old.py");
        assert_eq!(changes[0].kind, ChangeKind::Delete);
        assert_eq!(changes[0].removed_lines, 2);
    }

    #[test]
    fn modify_kind_when_both_sides_change() {
        let diff = "\
diff --git a/x.go b/x.go
--- a/x.go
+++ b/x.go
@@ -1,3 +1,3 @@
 package x
-func Old() {}
+func New() {}
";
        let changes = parse_diff(diff);
        assert_eq!(changes[0].kind, ChangeKind::Modify);
    }

    #[test]
    fn fallback_recovers_line_ranges() {
        // Corrupt counts make the strict pass bail; the scanner still
        // recovers the hunk and its target range
        let diff = "\
diff --git a/a.py b/a.py
@@ -1,99 +5,3 @@
+one
+two
garbage line that ends the hunk
";
        let changes = parse_diff(diff);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].line_range.0, 5);
        assert_eq!(changes[0].added_lines, 2);
    }

    #[test]
    fn no_newline_marker_is_preserved() {
        let diff = "\
diff --git a/t.txt b/t.txt
--- a/t.txt
+++ b/t.txt
@@ -1,1 +1,1 @@
-old
+new
\\ No newline at end of file
";
        let changes = parse_diff(diff);
        assert_eq!(changes.len(), 1);
        assert!(changes[0].content.contains("\\ No newline at end of file"));
    }

    #[test]
    fn empty_input_yields_no_changes() {
        assert!(parse_diff("").is_empty());
        assert!(parse_diff("not a diff at all\n").is_empty());
    }
}
