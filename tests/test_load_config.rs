use std::env;
use std::fs::write;
use std::path::PathBuf;

use serial_test::serial;
use tempfile::NamedTempFile;

use docpub::config::{BuildPolicy, OverwritePolicy};
use docpub::load_config::{load_config, parse_config, Destination};

fn clear_token_env() {
    env::remove_var("DOCPUB_TOKEN");
    env::remove_var("GITHUB_TOKEN");
}

/// A static config plus a token in the environment produces a complete git destination.
#[test]
#[serial]
fn test_load_config_git_destination_injects_token() {
    let config_yaml = r#"
default_branch: main
build:
  command: cargo
  args: [doc, --all-features]
publish:
  kind: git
  repository: https://github.com/example/crate.git
  branch: gh-pages
  author:
    name: docs-bot
    email: docs-bot@example.com
"#;
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), config_yaml).unwrap();

    clear_token_env();
    env::set_var("GITHUB_TOKEN", "fallback-token");
    env::set_var("DOCPUB_TOKEN", "top-secret-test-token");

    let config = load_config(config_file.path()).expect("Config should load");

    assert_eq!(config.default_branch, "main");
    assert_eq!(config.pipeline.build_policy, BuildPolicy::PublishOnly);
    assert_eq!(config.build.args, vec!["doc", "--all-features"]);
    assert!(config.build.exclude_dependencies);
    assert_eq!(config.build.output_dir, PathBuf::from("target/doc"));

    assert_eq!(config.target.branch_or_location, "gh-pages");
    assert_eq!(config.target.author.email, "docs-bot@example.com");
    assert_eq!(config.target.overwrite_policy, OverwritePolicy::ReplaceAll);
    assert!(config.target.disable_processing);
    assert_eq!(config.target.publish_dir, PathBuf::from("."));

    match config.destination {
        Destination::Git(remote) => {
            assert_eq!(remote.url, "https://github.com/example/crate.git");
            assert_eq!(remote.token.as_deref(), Some("top-secret-test-token"));
        }
        other => panic!("expected git destination, got {other:?}"),
    }
    clear_token_env();
}

#[test]
#[serial]
fn test_load_config_falls_back_to_github_token() {
    clear_token_env();
    env::set_var("GITHUB_TOKEN", "fallback-token");
    let config = parse_config(
        "publish:\n  kind: git\n  repository: https://github.com/example/crate.git\n",
    )
    .expect("Config should parse");
    match config.destination {
        Destination::Git(remote) => assert_eq!(remote.token.as_deref(), Some("fallback-token")),
        other => panic!("expected git destination, got {other:?}"),
    }
    clear_token_env();
}

#[test]
#[serial]
fn test_load_config_directory_destination_and_options() {
    clear_token_env();
    let config = parse_config(
        r#"
default_branch: trunk
build_policy: always
build:
  exclude_dependencies: false
  output_dir: site
publish:
  kind: directory
  root: /srv/docs
  branch: latest
  publish_dir: html
  disable_processing: false
  commit_message: "docs for {revision}"
"#,
    )
    .expect("Config should parse");

    assert_eq!(config.default_branch, "trunk");
    assert_eq!(config.pipeline.build_policy, BuildPolicy::Always);
    assert!(!config.build.exclude_dependencies);
    assert_eq!(config.build.command, "cargo");
    assert_eq!(config.target.publish_dir, PathBuf::from("html"));
    assert!(!config.target.disable_processing);
    assert_eq!(config.target.commit_message.as_deref(), Some("docs for {revision}"));
    match config.destination {
        Destination::Directory { root } => assert_eq!(root, PathBuf::from("/srv/docs")),
        other => panic!("expected directory destination, got {other:?}"),
    }
}

#[test]
#[serial]
fn test_load_config_git_requires_repository() {
    let err = parse_config("publish:\n  kind: git\n").unwrap_err();
    assert!(
        err.to_string().contains("publish.repository"),
        "got: {err}"
    );
}

#[test]
#[serial]
fn test_load_config_rejects_escaping_publish_dir() {
    let err = parse_config("publish:\n  kind: directory\n  root: out\n  publish_dir: ../etc\n")
        .unwrap_err();
    assert!(err.to_string().contains("publish_dir"), "got: {err}");
}

/// If the config file is not valid YAML, loading errors and reports as such.
#[test]
#[serial]
fn test_load_config_errors_for_invalid_file() {
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), b"not-yaml: [:::").unwrap();

    let err = load_config(config_file.path()).unwrap_err();
    let msg = err.to_string();
    assert!(
        msg.contains("parse") || msg.contains("YAML"),
        "Parse error expected, got: {msg}"
    );
}

#[test]
#[serial]
fn test_load_config_errors_for_missing_file() {
    let err = load_config("/definitely/not/here/docpub.yaml").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"), "got: {err}");
}
