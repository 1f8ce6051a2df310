//! CLI integration tests driving the `dsp` binary.

use assert_cmd::Command;
use assert_fs::prelude::*;
use predicates::prelude::*;

const FIXTURE_DIFF: &str = "\
diff --git a/app/models.py b/app/models.py
new file mode 100644
index 0000000..1111111
--- /dev/null
+++ b/app/models.py
@@ -0,0 +1,2 @@
+class User:
+    id = 0
diff --git a/app/views.py b/app/views.py
new file mode 100644
index 0000000..1111111
--- /dev/null
+++ b/app/views.py
@@ -0,0 +1,2 @@
+from app.models import User
+u = User()
";

fn dsp() -> Command {
    Command::cargo_bin("dsp").expect("binary builds")
}

#[test]
fn help_lists_subcommands() {
    dsp()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("split"))
        .stdout(predicate::str::contains("resplit"));
}

#[test]
fn split_patch_file_produces_run_directory() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let patch = tmp.child("changes.diff");
    patch.write_str(FIXTURE_DIFF).unwrap();
    let out = tmp.child("out");

    dsp()
        .args(["split", "--no-llm", "--patch"])
        .arg(patch.path())
        .arg("--output-dir")
        .arg(out.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Patch generation complete"));

    // One timestamped run directory, prefixed by the patch file stem
    let runs: Vec<_> = std::fs::read_dir(out.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(runs.len(), 1);
    let run_dir = runs[0].path();
    assert!(
        run_dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("patch_changes_")
    );

    let names: Vec<String> = std::fs::read_dir(&run_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(names.iter().any(|n| n.ends_with(".patch")));
    assert!(names.iter().any(|n| n.starts_with("metadata_") && n.ends_with(".json")));
    assert!(names.iter().any(|n| n.starts_with("summary_") && n.ends_with(".md")));
    assert!(names.iter().any(|n| n == "apply_patches.sh"));
}

#[test]
fn split_missing_patch_file_fails() {
    dsp()
        .args(["split", "--no-llm", "--patch", "/nonexistent/file.diff"])
        .assert()
        .failure();
}

#[test]
fn split_empty_patch_file_fails() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let patch = tmp.child("empty.diff");
    patch.write_str("").unwrap();

    dsp()
        .args(["split", "--no-llm", "--patch"])
        .arg(patch.path())
        .assert()
        .failure();
}

#[test]
fn dry_run_stops_before_writing() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let patch = tmp.child("changes.diff");
    patch.write_str(FIXTURE_DIFF).unwrap();
    let out = tmp.child("out");

    dsp()
        .args(["split", "--no-llm", "--dry-run", "--patch"])
        .arg(patch.path())
        .arg("--output-dir")
        .arg(out.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run complete"));

    assert!(!out.path().exists());
}

#[test]
fn resplit_roundtrip_keeps_directory_consistent() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let patch = tmp.child("changes.diff");
    patch.write_str(FIXTURE_DIFF).unwrap();
    let out = tmp.child("out");

    dsp()
        .args(["split", "--no-llm", "--patch"])
        .arg(patch.path())
        .arg("--output-dir")
        .arg(out.path())
        .assert()
        .success();

    let run_dir = std::fs::read_dir(out.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .next()
        .unwrap()
        .path();
    let first_patch = std::fs::read_dir(&run_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".patch"))
        .min()
        .unwrap();

    dsp()
        .args(["resplit"])
        .arg(&run_dir)
        .arg(&first_patch)
        .args(["--no-llm", "--target-size", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Re-split complete"));

    // Patch ids in the rewritten metadata stay dense and on disk
    let metadata_name = std::fs::read_dir(&run_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .find(|n| n.starts_with("metadata_"))
        .unwrap();
    let metadata: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(run_dir.join(metadata_name)).unwrap(),
    )
    .unwrap();
    for (i, entry) in metadata["patches"].as_array().unwrap().iter().enumerate() {
        assert_eq!(entry["id"].as_u64().unwrap() as usize, i);
        let filename = entry["filename"].as_str().unwrap();
        assert!(run_dir.join(filename).is_file(), "missing {filename}");
    }
}
