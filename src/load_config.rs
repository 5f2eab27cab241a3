//! `load_config` module: loads a static YAML config file and injects secrets from the
//! environment, producing the typed configuration the CLI hands to the pipeline.
//!
//! The YAML file never holds credentials. A push token, when needed, comes from
//! `DOCPUB_TOKEN`, falling back to `GITHUB_TOKEN`.
//!
//! ```yaml
//! default_branch: main
//! build_policy: publish_only      # or: always
//! build:
//!   command: cargo
//!   args: [doc]
//!   exclude_dependencies: true
//!   output_dir: target/doc
//! publish:
//!   kind: git                     # or: directory (with `root:`)
//!   repository: https://github.com/org/repo.git
//!   branch: gh-pages
//!   publish_dir: .
//!   disable_processing: true
//!   author: { name: docs-bot, email: docs-bot@example.com }
//!   commit_message: "deploy: {revision}"
//! ```

use serde::Deserialize;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{error, info};

use crate::config::{
    AuthorIdentity, BuildConfig, BuildPolicy, OverwritePolicy, PipelineOptions, PublishTarget,
};
use crate::publish::GitRemote;

pub const TOKEN_ENV: &str = "DOCPUB_TOKEN";
pub const FALLBACK_TOKEN_ENV: &str = "GITHUB_TOKEN";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Where a configured run publishes to.
#[derive(Debug, Clone)]
pub enum Destination {
    Git(GitRemote),
    Directory { root: PathBuf },
}

/// Fully merged configuration for one CLI invocation.
#[derive(Debug, Clone)]
pub struct DocpubConfig {
    pub default_branch: String,
    pub pipeline: PipelineOptions,
    pub build: BuildConfig,
    pub target: PublishTarget,
    pub destination: Destination,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_branch")]
    default_branch: String,
    #[serde(default)]
    build_policy: BuildPolicy,
    #[serde(default)]
    build: BuildSection,
    publish: PublishSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct BuildSection {
    command: String,
    args: Vec<String>,
    exclude_dependencies: bool,
    output_dir: PathBuf,
}

impl Default for BuildSection {
    fn default() -> Self {
        let d = BuildConfig::default();
        Self {
            command: d.command,
            args: d.args,
            exclude_dependencies: d.exclude_dependencies,
            output_dir: d.output_dir,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum DestinationKind {
    Git,
    Directory,
}

#[derive(Debug, Deserialize)]
struct PublishSection {
    kind: DestinationKind,
    #[serde(default)]
    repository: Option<String>,
    #[serde(default)]
    root: Option<PathBuf>,
    #[serde(default = "default_publish_branch")]
    branch: String,
    #[serde(default = "default_publish_dir")]
    publish_dir: PathBuf,
    #[serde(default = "default_true")]
    disable_processing: bool,
    #[serde(default)]
    author: AuthorIdentity,
    #[serde(default)]
    overwrite_policy: OverwritePolicy,
    #[serde(default)]
    commit_message: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_publish_branch() -> String {
    "gh-pages".to_string()
}

fn default_publish_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_true() -> bool {
    true
}

fn token_from_env() -> Option<String> {
    [TOKEN_ENV, FALLBACK_TOKEN_ENV]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
}

/// Loads a static YAML config file (no secrets) and injects the push token from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<DocpubConfig, ConfigError> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        ConfigError::Read {
            path: path_ref.to_path_buf(),
            source: e,
        }
    })?;

    let config = parse_config(&content)?;
    info!(
        config_path = ?path_ref,
        default_branch = %config.default_branch,
        destination = %config.target.branch_or_location,
        "Config loaded and merged successfully"
    );
    Ok(config)
}

/// Parses YAML text into a [`DocpubConfig`], injecting secrets from the environment.
pub fn parse_config(content: &str) -> Result<DocpubConfig, ConfigError> {
    let raw: RawConfig = serde_yaml::from_str(content).map_err(|e| {
        error!(error = ?e, "Failed to parse config YAML");
        ConfigError::Parse(e)
    })?;

    let publish = raw.publish;
    if publish.branch.trim().is_empty() {
        return Err(ConfigError::Invalid("publish.branch must not be empty".into()));
    }
    if publish
        .publish_dir
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(ConfigError::Invalid(format!(
            "publish.publish_dir must be a relative path inside the artifact, got {:?}",
            publish.publish_dir
        )));
    }

    let destination = match publish.kind {
        DestinationKind::Git => {
            let url = publish.repository.ok_or_else(|| {
                ConfigError::Invalid("publish.repository is required for kind: git".into())
            })?;
            let remote = GitRemote::new(url);
            match token_from_env() {
                Some(token) => {
                    info!("Push token found in env");
                    Destination::Git(remote.with_token(token))
                }
                None => {
                    info!("No push token in env, relying on ambient git credentials");
                    Destination::Git(remote)
                }
            }
        }
        DestinationKind::Directory => Destination::Directory {
            root: publish.root.ok_or_else(|| {
                ConfigError::Invalid("publish.root is required for kind: directory".into())
            })?,
        },
    };

    let target = PublishTarget {
        branch_or_location: publish.branch,
        author: publish.author,
        overwrite_policy: publish.overwrite_policy,
        publish_dir: publish.publish_dir,
        disable_processing: publish.disable_processing,
        commit_message: publish.commit_message,
    };
    target.trace_loaded();

    Ok(DocpubConfig {
        default_branch: raw.default_branch,
        pipeline: PipelineOptions {
            build_policy: raw.build_policy,
        },
        build: BuildConfig {
            command: raw.build.command,
            args: raw.build.args,
            exclude_dependencies: raw.build.exclude_dependencies,
            output_dir: raw.build.output_dir,
        },
        target,
        destination,
    })
}
