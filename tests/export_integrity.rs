//! Export artifacts, hunk conservation, and re-split behavior.

mod util;

use std::fs;

use diffsplit::core::digest::{extract_hunks, verify_hunk_integrity};
use diffsplit::core::export::{RepositoryInfo, RunStamp, export_patches, resplit_patch};
use diffsplit::core::pipeline::{SplitOptions, SplitPipeline, split_changes};
use serde_json::json;
use util::{added_file_diff, file_block, modify_hunk};

fn test_repository() -> RepositoryInfo {
    RepositoryInfo {
        path: "/tmp/fixture".to_string(),
        name: "fixture".to_string(),
        current_branch: "main".to_string(),
        source_repo_name: "fixture".to_string(),
        language: "python".to_string(),
        description: None,
        analysis: json!({"mode": "patch_file"}),
        base_branch: "main".to_string(),
        commit_id: None,
        patch_file: None,
    }
}

fn sample_diff() -> String {
    format!(
        "{}{}{}",
        added_file_diff("app/models.py", &["class User:", "    id: int"]),
        added_file_diff(
            "app/views.py",
            &["from app.models import User", "def show():", "    return User()"],
        ),
        file_block(
            "app/legacy.py",
            &[modify_hunk(5, &["old = 1"], &["new = 1"])],
        ),
    )
}

#[test]
fn export_writes_every_artifact() {
    let diff = sample_diff();
    let result = split_changes(&diff, &SplitOptions::default()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let stamp = RunStamp::fixed("20250101_120000", 1_735_732_800);
    let export =
        export_patches(&result, &diff, dir.path(), &test_repository(), None, &stamp).unwrap();

    assert!(export.integrity.is_clean());
    assert_eq!(export.patch_files.len(), result.patches.len());

    // Zero-padded, id-prefixed patch files
    for (i, name) in export.patch_files.iter().enumerate() {
        assert!(name.starts_with(&format!("{i:02}_")), "bad filename {name}");
        assert!(dir.path().join(name).is_file());
    }

    let metadata_path = dir.path().join("metadata_20250101_120000.json");
    assert!(metadata_path.is_file());
    let metadata: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&metadata_path).unwrap()).unwrap();
    assert_eq!(metadata["generated_at"], 1_735_732_800);
    assert_eq!(
        metadata["total_patches"].as_u64().unwrap() as usize,
        result.patches.len()
    );
    assert_eq!(
        metadata["patches"].as_array().unwrap().len(),
        result.patches.len()
    );
    for entry in metadata["patches"].as_array().unwrap() {
        assert!(entry["annotations"].is_array());
        assert!(entry["category"].is_string());
    }

    assert!(dir.path().join("summary_20250101_120000.md").is_file());
    let script = dir.path().join("apply_patches.sh");
    assert!(script.is_file());
    let script_body = fs::read_to_string(&script).unwrap();
    assert!(script_body.starts_with("#!/bin/bash"));
    assert!(script_body.contains("git apply"));
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&script).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111, "apply script must be executable");
    }
}

#[test]
fn patch_file_headers_carry_the_comment_block() {
    let diff = sample_diff();
    let result = split_changes(&diff, &SplitOptions::default()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let stamp = RunStamp::fixed("20250101_120000", 0);
    let export =
        export_patches(&result, &diff, dir.path(), &test_repository(), None, &stamp).unwrap();

    let body = fs::read_to_string(dir.path().join(&export.patch_files[0])).unwrap();
    let mut lines = body.lines();
    assert!(lines.next().unwrap().starts_with("# "));
    assert!(body.contains("# Category: "));
    assert!(body.contains("# Priority: "));
    assert!(body.contains("# Generated: 20250101_120000"));
    assert!(body.contains("# Files: "));
    assert!(body.contains("# Description: "));
    assert!(body.contains("diff --git "));
}

#[test]
fn definition_file_precedes_usage_file_inside_a_patch() {
    // models defines User; views imports and uses it. The critical edge
    // merges them into one patch, where models.py must render first.
    let diff = format!(
        "{}{}",
        added_file_diff("app/views.py", &["from app.models import User", "u = User()"]),
        file_block(
            "app/models.py",
            &[modify_hunk(1, &["class User(Old):"], &["class User(New):"])],
        ),
    );
    let result = split_changes(&diff, &SplitOptions::default()).unwrap();

    let holder = result
        .patches
        .iter()
        .find(|p| p.changes.contains(&"app/views.py:hunk_0".to_string()))
        .unwrap();
    assert!(
        holder.changes.contains(&"app/models.py:hunk_0".to_string()),
        "critical edge should have merged the pair"
    );

    let dir = tempfile::tempdir().unwrap();
    let stamp = RunStamp::fixed("20250101_120000", 0);
    let export =
        export_patches(&result, &diff, dir.path(), &test_repository(), None, &stamp).unwrap();

    let merged_file = export
        .patch_files
        .iter()
        .map(|f| fs::read_to_string(dir.path().join(f)).unwrap())
        .find(|body| body.contains("app/models.py") && body.contains("app/views.py"))
        .expect("merged patch file");
    let models_at = merged_file.find("diff --git a/app/models.py").unwrap();
    let views_at = merged_file.find("diff --git a/app/views.py").unwrap();
    assert!(models_at < views_at, "definition file must come first");
}

#[test]
fn emitted_hunks_conserve_the_input_multiset() {
    let diff = sample_diff();
    let result = split_changes(&diff, &SplitOptions::default()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let stamp = RunStamp::fixed("20250101_120000", 0);
    let export =
        export_patches(&result, &diff, dir.path(), &test_repository(), None, &stamp).unwrap();

    let emitted: Vec<String> = export
        .patch_files
        .iter()
        .map(|f| fs::read_to_string(dir.path().join(f)).unwrap())
        .collect();
    let report = verify_hunk_integrity(&diff, &emitted);
    assert!(report.is_clean(), "missing: {:?}", report.missing);
    assert_eq!(report.input_hunks, extract_hunks(&diff).len());
}

#[test]
fn resplit_preserves_the_directory_hunk_multiset() {
    // Patch 0 holds two same-file hunks merged by file proximity; patch 1
    // holds an unrelated file. Re-splitting patch 0 with a tiny target
    // breaks it back apart and shifts the later patch.
    let diff = format!(
        "{}{}",
        file_block(
            "m/alpha.py",
            &[
                modify_hunk(1, &["a = 1"], &["a = 2"]),
                modify_hunk(60, &["b = 1"], &["b = 2"]),
            ],
        ),
        file_block(
            "z/other.py",
            &[modify_hunk(1, &["c = 1"], &["c = 2"])],
        ),
    );
    let result = split_changes(&diff, &SplitOptions::default()).unwrap();
    assert_eq!(result.patches.len(), 2);
    assert_eq!(result.patches[0].changes.len(), 2);

    let dir = tempfile::tempdir().unwrap();
    let stamp = RunStamp::fixed("20250101_120000", 100);
    let export =
        export_patches(&result, &diff, dir.path(), &test_repository(), None, &stamp).unwrap();

    let collect_hunks = |root: &std::path::Path| -> Vec<String> {
        let mut digests: Vec<String> = fs::read_dir(root)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "patch"))
            .flat_map(|p| extract_hunks(&fs::read_to_string(p).unwrap()))
            .map(|r| r.digest)
            .collect();
        digests.sort();
        digests
    };
    let before = collect_hunks(dir.path());

    // Re-split the first emitted patch with a tiny target
    let pipeline = SplitPipeline::new(None);
    let options = SplitOptions {
        target_patch_size: 1,
        ..Default::default()
    };
    let restamp = RunStamp::fixed("20250101_130000", 200);
    resplit_patch(
        &pipeline,
        dir.path(),
        &export.patch_files[0],
        &options,
        &restamp,
    )
    .unwrap();

    let after = collect_hunks(dir.path());
    assert_eq!(before, after, "re-split must conserve the hunk multiset");

    // The manifest was rewritten under the new stamp with dense ids
    let metadata_path = dir.path().join("metadata_20250101_130000.json");
    assert!(metadata_path.is_file());
    assert!(!dir.path().join("metadata_20250101_120000.json").exists());
    let metadata: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&metadata_path).unwrap()).unwrap();
    let entries = metadata["patches"].as_array().unwrap();
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry["id"].as_u64().unwrap() as usize, i);
        let filename = entry["filename"].as_str().unwrap();
        assert!(filename.starts_with(&format!("{i:02}_")));
        assert!(dir.path().join(filename).is_file(), "missing {filename}");
    }
}
