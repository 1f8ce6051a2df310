//! Property test: any generated diff survives the full split and export
//! with its hunk multiset intact.

mod util;

use diffsplit::core::export::{RepositoryInfo, RunStamp, export_patches};
use diffsplit::core::pipeline::{SplitOptions, split_changes};
use proptest::prelude::*;
use serde_json::json;
use util::modify_hunk;

/// Families of file paths exercising every layer/interface heuristic.
const FILE_POOL: &[&str] = &[
    "app/models/user.py",
    "app/util/helpers.py",
    "app/api/handlers/root.py",
    "core/engine.py",
    "core/worker.go",
    "web/components/view.ts",
];

/// Outer vec: files (by pool index); inner vec: per-hunk added-line counts.
fn diff_spec() -> impl Strategy<Value = Vec<(usize, Vec<usize>)>> {
    prop::collection::vec(
        (0..FILE_POOL.len(), prop::collection::vec(1usize..5, 1..4)),
        1..5,
    )
    .prop_map(|mut files| {
        // One block per file: duplicate picks collapse into the first
        files.sort_by_key(|(idx, _)| *idx);
        files.dedup_by_key(|(idx, _)| *idx);
        files
    })
}

fn build_diff(spec: &[(usize, Vec<usize>)]) -> String {
    let mut out = String::new();
    for (file_idx, hunks) in spec {
        let path = FILE_POOL[*file_idx];
        out.push_str(&format!("diff --git a/{path} b/{path}\n"));
        out.push_str("index 1234567..abcdefg 100644\n");
        out.push_str(&format!("--- a/{path}\n"));
        out.push_str(&format!("+++ b/{path}\n"));

        let mut start = 1usize;
        for (hunk_idx, added) in hunks.iter().enumerate() {
            let added_lines: Vec<String> = (0..*added)
                .map(|i| format!("value_{file_idx}_{hunk_idx}_{i} = {i}"))
                .collect();
            let refs: Vec<&str> = added_lines.iter().map(String::as_str).collect();
            out.push_str(&modify_hunk(start, &["placeholder = 0"], &refs));
            start += 50;
        }
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn split_and_export_conserve_every_hunk(spec in diff_spec(), target in 1usize..400) {
        let diff = build_diff(&spec);
        let options = SplitOptions {
            target_patch_size: target,
            ..Default::default()
        };
        let result = split_changes(&diff, &options).unwrap();

        // Dense ids and strictly-smaller prerequisites on every run
        let mut ids: Vec<usize> = result.patches.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        prop_assert_eq!(ids, (0..result.patches.len()).collect::<Vec<_>>());
        for patch in &result.patches {
            for &dep in &patch.depends_on {
                prop_assert!(dep < patch.id);
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let stamp = RunStamp::fixed("20250101_120000", 0);
        let repository = RepositoryInfo {
            path: "/tmp/prop".to_string(),
            name: "prop".to_string(),
            current_branch: "main".to_string(),
            source_repo_name: "prop".to_string(),
            language: "python".to_string(),
            description: None,
            analysis: json!({"mode": "patch_file"}),
            base_branch: "main".to_string(),
            commit_id: None,
            patch_file: None,
        };
        let export = export_patches(&result, &diff, dir.path(), &repository, None, &stamp).unwrap();

        prop_assert!(
            export.integrity.is_clean(),
            "missing {:?} spurious {:?}",
            export.integrity.missing,
            export.integrity.spurious
        );
    }
}
