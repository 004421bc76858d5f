use crate::plugins::loader::discover;
use crate::plugins::manifest::{PluginScope, MANIFEST_FILE};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_manifest(root: &Path, dir_name: &str, yaml: &str) {
    let dir = root.join(dir_name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(MANIFEST_FILE), yaml).unwrap();
}

fn valid_manifest(name: &str) -> String {
    format!(
        "version: 1\nname: {}\ntype: workflow\nprotocol: 1\nexecutable:\n  path: ./run.sh\nworkflow: {{}}\n",
        name
    )
}

#[test]
fn test_discover_collects_valid_and_skips_broken() {
    let temp = TempDir::new().unwrap();
    write_manifest(temp.path(), "approval", &valid_manifest("approval"));
    // Declared workflow type but no workflow block.
    write_manifest(
        temp.path(),
        "broken",
        "version: 1\nname: broken\ntype: workflow\nprotocol: 1\nexecutable:\n  path: ./run.sh\n",
    );
    // A stray file and a directory without a manifest are both ignored.
    fs::write(temp.path().join("notes.txt"), "not a plugin").unwrap();
    fs::create_dir_all(temp.path().join("empty")).unwrap();

    let report = discover(&[(temp.path().to_path_buf(), PluginScope::Global)]);

    assert_eq!(report.manifests.len(), 1);
    assert_eq!(report.manifests[0].name, "approval");
    assert_eq!(report.manifests[0].scope, PluginScope::Global);
    assert_eq!(report.manifests[0].dir, temp.path().join("approval"));

    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].reason.contains("workflow"));
}

#[test]
fn test_discover_missing_root_is_empty() {
    let temp = TempDir::new().unwrap();
    let report = discover(&[(temp.path().join("nope"), PluginScope::Project)]);
    assert!(report.manifests.is_empty());
    assert!(report.skipped.is_empty());
}

#[test]
fn test_global_plugins_shadow_project_duplicates() {
    let global = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    write_manifest(global.path(), "approval", &valid_manifest("approval"));
    write_manifest(project.path(), "approval", &valid_manifest("approval"));
    write_manifest(project.path(), "lint-gate", &valid_manifest("lint-gate"));

    let report = discover(&[
        (global.path().to_path_buf(), PluginScope::Global),
        (project.path().to_path_buf(), PluginScope::Project),
    ]);

    assert_eq!(report.manifests.len(), 2);
    let approval = report.manifests.iter().find(|m| m.name == "approval").unwrap();
    assert_eq!(approval.scope, PluginScope::Global);
    let lint = report.manifests.iter().find(|m| m.name == "lint-gate").unwrap();
    assert_eq!(lint.scope, PluginScope::Project);

    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].reason.contains("duplicate"));
}
