use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::{self, write};
use std::path::Path;
use tempfile::{tempdir, NamedTempFile};

/// Writes a config that "builds" with a shell script and publishes into `site_root`.
fn create_config(script: &str, site_root: &Path) -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    let yaml = format!(
        "default_branch: main\nbuild:\n  command: sh\n  args: [\"-c\", \"{script}\"]\n  exclude_dependencies: false\n  output_dir: out\npublish:\n  kind: directory\n  root: {}\n  branch: site\n",
        site_root.display()
    );
    write(config.path(), yaml).expect("Writing temp config failed");
    config
}

fn docpub() -> Command {
    let mut cmd = Command::cargo_bin("docpub").expect("Binary exists");
    for var in ["GITHUB_EVENT_NAME", "GITHUB_REF", "GITHUB_SHA", "DOCPUB_TOKEN", "GITHUB_TOKEN"] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn run_on_main_publishes_built_docs() {
    let source = tempdir().unwrap();
    let site = tempdir().unwrap();
    let config = create_config("mkdir -p out/api && echo hi > out/index.html && echo m > out/api/mod.html", site.path());

    docpub()
        .arg("run")
        .arg("--config")
        .arg(config.path())
        .args(["--event", "push", "--ref", "refs/heads/main", "--revision", "abc123"])
        .arg("--source-root")
        .arg(source.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("published 2 file(s)").and(predicate::str::contains("deploy: abc123")));

    let content = site.path().join("site/content");
    assert_eq!(fs::read_to_string(content.join("index.html")).unwrap(), "hi\n");
    assert!(content.join("api/mod.html").exists());
}

#[test]
fn run_on_feature_branch_is_skipped() {
    let source = tempdir().unwrap();
    let site = tempdir().unwrap();
    let config = create_config("mkdir -p out && echo hi > out/index.html", site.path());

    docpub()
        .arg("run")
        .arg("--config")
        .arg(config.path())
        .args(["--event", "push", "--ref", "refs/heads/feature-x"])
        .arg("--source-root")
        .arg(source.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("skipped"));

    assert!(!site.path().join("site").exists());
    assert!(!source.path().join("out").exists(), "build must not run when skipping");
}

#[test]
fn failed_build_exits_non_zero_with_diagnostics() {
    let source = tempdir().unwrap();
    let site = tempdir().unwrap();
    let config = create_config("echo missing toolchain >&2; exit 2", site.path());

    docpub()
        .arg("run")
        .arg("--config")
        .arg(config.path())
        .args(["--event", "workflow_dispatch", "--ref", "main"])
        .arg("--source-root")
        .arg(source.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("build failed").and(predicate::str::contains("missing toolchain")));

    assert!(!site.path().join("site").exists());
}

#[test]
fn check_reads_trigger_from_ci_environment() {
    let site = tempdir().unwrap();
    let config = create_config("true", site.path());

    docpub()
        .arg("check")
        .arg("--config")
        .arg(config.path())
        .env("GITHUB_EVENT_NAME", "push")
        .env("GITHUB_REF", "refs/heads/main")
        .assert()
        .success()
        .stdout(predicate::str::contains("publish: refs/heads/main"));

    docpub()
        .arg("check")
        .arg("--config")
        .arg(config.path())
        .args(["--ref", "refs/heads/feature-x"])
        .assert()
        .success()
        .stdout(predicate::str::contains("skip"));
}

#[test]
fn missing_config_file_is_an_error() {
    docpub()
        .args(["run", "--config", "/definitely/not/here.yaml", "--ref", "main"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}
