// docpub/src/config.rs

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::{debug, info};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(revision|ref)\}").expect("static regex"));

/// What initiated a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Manual,
    Push,
    Other,
}

impl EventKind {
    /// Maps a CI event name (`workflow_dispatch`, `push`, ...) to an event kind.
    pub fn from_event_name(name: &str) -> Self {
        match name {
            "workflow_dispatch" | "manual" => EventKind::Manual,
            "push" => EventKind::Push,
            _ => EventKind::Other,
        }
    }
}

/// One pipeline invocation. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunContext {
    pub event_kind: EventKind,
    pub ref_name: String,
    pub is_default_publish_branch: bool,
    /// Source commit the run was started for, if known.
    pub revision: Option<String>,
}

impl RunContext {
    /// Builds a context, deciding `is_default_publish_branch` by comparing the
    /// branch name of `ref_name` with `default_branch`.
    pub fn new(event_kind: EventKind, ref_name: impl Into<String>, default_branch: &str) -> Self {
        let ref_name = ref_name.into();
        let is_default_publish_branch = branch_name(&ref_name) == default_branch;
        Self {
            event_kind,
            ref_name,
            is_default_publish_branch,
            revision: None,
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn trace_loaded(&self) {
        info!(
            event_kind = ?self.event_kind,
            ref_name = %self.ref_name,
            is_default_publish_branch = self.is_default_publish_branch,
            revision = self.revision.as_deref().unwrap_or("unknown"),
            "Loaded RunContext"
        );
    }
}

/// Strips a `refs/heads/` prefix. Tags and other refs are returned whole so they
/// never match a branch name.
pub fn branch_name(ref_name: &str) -> &str {
    ref_name.strip_prefix("refs/heads/").unwrap_or(ref_name)
}

/// Name/email pair attributed to each publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorIdentity {
    pub name: String,
    pub email: String,
}

impl Default for AuthorIdentity {
    fn default() -> Self {
        Self {
            name: "github-actions[bot]".to_string(),
            email: "github-actions[bot]@users.noreply.github.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverwritePolicy {
    /// Every publish fully supersedes the previous destination content.
    #[default]
    ReplaceAll,
}

/// Where and how artifacts are published. Static for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishTarget {
    pub branch_or_location: String,
    pub author: AuthorIdentity,
    pub overwrite_policy: OverwritePolicy,
    /// Directory inside the artifact whose contents become the destination content.
    pub publish_dir: PathBuf,
    /// Tell the host not to run its own processing (e.g. Jekyll) on the content.
    pub disable_processing: bool,
    /// Message template; `{revision}` and `{ref}` are substituted. The pipeline
    /// replaces it with the rendered text before handing the target to a
    /// publisher, which records it verbatim.
    pub commit_message: Option<String>,
}

impl PublishTarget {
    pub fn new(branch_or_location: impl Into<String>, author: AuthorIdentity) -> Self {
        Self {
            branch_or_location: branch_or_location.into(),
            author,
            overwrite_policy: OverwritePolicy::ReplaceAll,
            publish_dir: PathBuf::from("."),
            disable_processing: true,
            commit_message: None,
        }
    }

    /// Renders the message recorded with a publish. Placeholders are substituted
    /// in one pass, so braces inside the revision or ref are left alone.
    pub fn render_message(&self, context: Option<&RunContext>) -> String {
        let revision = context
            .and_then(|c| c.revision.as_deref())
            .unwrap_or("local");
        let git_ref = context.map(|c| c.ref_name.as_str()).unwrap_or("");
        let template = self.commit_message.as_deref().unwrap_or("deploy: {revision}");
        PLACEHOLDER
            .replace_all(template, |caps: &Captures| match &caps[1] {
                "revision" => revision.to_string(),
                _ => git_ref.to_string(),
            })
            .into_owned()
    }

    /// Message a publisher records: the already rendered message, or the
    /// default rendering when the target was never passed through a pipeline.
    pub fn message(&self) -> String {
        match &self.commit_message {
            Some(message) => message.clone(),
            None => self.render_message(None),
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            location = %self.branch_or_location,
            author = %self.author.name,
            publish_dir = %self.publish_dir.display(),
            disable_processing = self.disable_processing,
            "Loaded PublishTarget"
        );
        debug!(?self, "PublishTarget loaded (full debug)");
    }
}

/// Whether the build runs when the trigger declines to publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPolicy {
    /// Build only when the run is going to publish.
    #[default]
    PublishOnly,
    /// Always build; publishing is still gated on the trigger.
    Always,
}

/// Settings for the command-driven artifact builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Build only the primary unit's docs (`--no-deps`).
    pub exclude_dependencies: bool,
    /// Artifact directory, relative to the source root.
    pub output_dir: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: "cargo".to_string(),
            args: vec!["doc".to_string()],
            exclude_dependencies: true,
            output_dir: PathBuf::from("target/doc"),
        }
    }
}

/// Coordinator options that are not part of the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    pub build_policy: BuildPolicy,
}
