//! Shared test utilities for integration tests
//!
//! Provides diff fixture builders and invariant checks used across
//! multiple test files.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};

use diffsplit::PatchSplitResult;

/// Build a single-file, all-additions hunk for a synthetic diff.
pub fn added_file_diff(path: &str, lines: &[&str]) -> String {
    let mut out = String::new();
    out.push_str(&format!("diff --git a/{path} b/{path}\n"));
    out.push_str("new file mode 100644\n");
    out.push_str("index 0000000..1111111\n");
    out.push_str("--- /dev/null\n");
    out.push_str(&format!("+++ b/{path}\n"));
    out.push_str(&format!("@@ -0,0 +1,{} @@\n", lines.len()));
    for line in lines {
        out.push_str(&format!("+{line}\n"));
    }
    out
}

/// Build a modify hunk with one context line on each side.
pub fn modify_hunk(old_start: usize, removed: &[&str], added: &[&str]) -> String {
    let old_len = removed.len() + 2;
    let new_len = added.len() + 2;
    let mut out = String::new();
    out.push_str(&format!(
        "@@ -{old_start},{old_len} +{old_start},{new_len} @@\n"
    ));
    out.push_str(" # context above\n");
    for line in removed {
        out.push_str(&format!("-{line}\n"));
    }
    for line in added {
        out.push_str(&format!("+{line}\n"));
    }
    out.push_str(" # context below\n");
    out
}

/// Wrap hunks into a `diff --git` block for one file.
pub fn file_block(path: &str, hunks: &[String]) -> String {
    let mut out = String::new();
    out.push_str(&format!("diff --git a/{path} b/{path}\n"));
    out.push_str("index 1234567..abcdefg 100644\n");
    out.push_str(&format!("--- a/{path}\n"));
    out.push_str(&format!("+++ b/{path}\n"));
    for hunk in hunks {
        out.push_str(hunk);
    }
    out
}

/// Assert the core result invariants: coverage, disjointness, dense ids,
/// prerequisite ordering, and atomic-group integrity.
pub fn assert_result_invariants(result: &PatchSplitResult, expected_change_ids: &[&str]) {
    // Dense ids 0..N-1 in dependency order
    let ids: Vec<usize> = result.patches.iter().map(|p| p.id).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(
        sorted,
        (0..result.patches.len()).collect::<Vec<_>>(),
        "patch ids must be dense"
    );
    assert_eq!(
        result.dependency_order.len(),
        result.patches.len(),
        "dependency order covers every patch"
    );

    // Prerequisites strictly smaller
    for patch in &result.patches {
        for &dep in &patch.depends_on {
            assert!(
                dep < patch.id,
                "patch {} has prerequisite {dep} that is not smaller",
                patch.id
            );
        }
    }

    // Coverage and disjointness
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for patch in &result.patches {
        for change in &patch.changes {
            *seen.entry(change.as_str()).or_insert(0) += 1;
        }
    }
    for (change, count) in &seen {
        assert_eq!(*count, 1, "change {change} appears {count} times");
    }
    let covered: BTreeSet<&str> = seen.keys().copied().collect();
    let expected: BTreeSet<&str> = expected_change_ids.iter().copied().collect();
    assert_eq!(covered, expected, "coverage mismatch");

    // Atomic groups land in exactly one patch
    for group in &result.atomic_groups {
        let holders: BTreeSet<usize> = result
            .patches
            .iter()
            .filter(|p| group.change_ids.iter().any(|id| p.changes.contains(id)))
            .map(|p| p.id)
            .collect();
        assert_eq!(
            holders.len(),
            1,
            "atomic group {} spans patches {holders:?}",
            group.id
        );
    }
}
