use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, error, info};

use super::{classify_io, content_root, copy_tree, manifest};
use crate::config::PublishTarget;
use crate::contract::{PublishError, PublishRecord, PublishedFile, Publisher};

static UNAUTHORIZED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)authentication failed|permission denied|permission to .* denied|could not read username|invalid username or password|returned error: 40[13]|not authorized",
    )
    .expect("static regex")
});

static UNREACHABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)could not resolve host|connection refused|connection timed out|failed to connect|network is unreachable|does not appear to be a git repository|could not read from remote repository|unable to access",
    )
    .expect("static regex")
});

/// Remote a [`GitBranchPublisher`] pushes to. The token, if any, is used as
/// `x-access-token` credentials for `https://` remotes.
#[derive(Clone)]
pub struct GitRemote {
    pub url: String,
    pub token: Option<String>,
}

impl GitRemote {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn authenticated_url(&self) -> String {
        match (&self.token, self.url.strip_prefix("https://")) {
            (Some(token), Some(rest)) if !token.is_empty() => {
                format!("https://x-access-token:{token}@{rest}")
            }
            _ => self.url.clone(),
        }
    }

    fn redact(&self, text: &str) -> String {
        match &self.token {
            Some(token) if !token.is_empty() => text.replace(token.as_str(), "***"),
            _ => text.to_string(),
        }
    }
}

impl fmt::Debug for GitRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitRemote")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Maps git's stderr to a publish error.
pub(crate) fn classify_git_failure(stderr: &str) -> PublishError {
    let message = stderr.trim().to_string();
    if UNAUTHORIZED.is_match(stderr) {
        PublishError::Unauthorized(message)
    } else if UNREACHABLE.is_match(stderr) {
        PublishError::DestinationUnreachable(message)
    } else {
        PublishError::Rejected(message)
    }
}

/// Replaces the content of a branch on a git remote with one commit per publish.
///
/// Work happens in a throwaway clone; the remote only changes when the final
/// push lands, and the push is a fast-forward, so a concurrent publish to the same
/// branch makes it fail rather than drop a commit.
pub struct GitBranchPublisher {
    remote: GitRemote,
}

impl GitBranchPublisher {
    pub fn new(remote: GitRemote) -> Self {
        Self { remote }
    }

    async fn git(&self, workdir: &Path, args: &[&str]) -> Result<String, PublishError> {
        debug!(args = ?self.remote.redact(&args.join(" ")), "[PUBLISH][GIT] git");
        let output = Command::new("git")
            .args(args)
            .current_dir(workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                error!(error = ?e, "[PUBLISH][GIT] Failed to launch git");
                PublishError::Io(e)
            })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }
        let stderr = self.remote.redact(&String::from_utf8_lossy(&output.stderr));
        error!(
            status = %output.status,
            command = %args.first().copied().unwrap_or(""),
            stderr = %stderr.trim(),
            "[PUBLISH][GIT] git exited with non-zero code"
        );
        Err(classify_git_failure(&stderr))
    }

    /// Checks that the commit at HEAD holds exactly the artifact files with
    /// their exact bytes (plus the processing marker when requested).
    async fn verify_committed(
        &self,
        dir: &Path,
        source: &Path,
        files: &[PublishedFile],
        marker: bool,
    ) -> Result<(), PublishError> {
        let listing = self
            .git(dir, &["-c", "core.quotePath=false", "ls-tree", "-r", "-z", "HEAD"])
            .await?;
        let mut committed: BTreeMap<&str, &str> = BTreeMap::new();
        for entry in listing.split('\0').filter(|e| !e.is_empty()) {
            let Some((meta, path)) = entry.split_once('\t') else {
                continue;
            };
            let blob = meta.split_whitespace().nth(2).unwrap_or_default();
            committed.insert(path, blob);
        }
        if marker && !files.iter().any(|f| f.path == PROCESSING_MARKER) {
            committed.remove(PROCESSING_MARKER);
        }

        let expected: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        let missing: Vec<&str> = expected
            .iter()
            .copied()
            .filter(|p| !committed.contains_key(p))
            .collect();
        let unexpected: Vec<&str> = committed
            .keys()
            .copied()
            .filter(|p| !expected.contains(p))
            .collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            error!(?missing, ?unexpected, "[PUBLISH][GIT] Committed tree differs from artifact");
            return Err(PublishError::InvalidArtifact {
                path: source.to_path_buf(),
                reason: format!(
                    "committed tree differs from artifact (missing: {missing:?}, unexpected: {unexpected:?})"
                ),
            });
        }

        let raw = raw_blob_ids(self, dir, source, &expected).await?;
        let altered: Vec<&str> = expected
            .iter()
            .zip(&raw)
            .filter(|(path, id)| committed.get(*path) != Some(&id.as_str()))
            .map(|(path, _)| *path)
            .collect();
        if !altered.is_empty() || raw.len() != expected.len() {
            error!(?altered, "[PUBLISH][GIT] Committed content differs from artifact bytes");
            return Err(PublishError::InvalidArtifact {
                path: source.to_path_buf(),
                reason: format!("committed content differs from artifact bytes: {altered:?}"),
            });
        }
        debug!(files = expected.len(), "[PUBLISH][GIT] Committed tree matches artifact");
        Ok(())
    }
}

/// Removes everything in the work tree except the repository itself.
fn clear_worktree(work: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(work)? {
        let entry = entry?;
        if entry.file_name() == ".git" {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(path)?;
        } else {
            fs::remove_file(path)?;
        }
    }
    Ok(())
}

/// Written next to the content when host processing is disabled.
const PROCESSING_MARKER: &str = ".nojekyll";

/// Repository settings that stop git from translating or skipping content.
const RAW_CONTENT_CONFIG: [(&str, &str); 2] =
    [("core.autocrlf", "false"), ("core.safecrlf", "false")];

/// Overrides any `.gitattributes` shipped in the artifact so blobs are stored
/// byte for byte. Ignore rules are bypassed separately with `add --force`.
fn neutralise_checkout_rules(work: &Path) -> std::io::Result<()> {
    let info = work.join(".git").join("info");
    fs::create_dir_all(&info)?;
    fs::write(
        info.join("attributes"),
        "* -text -eol -filter -ident -working-tree-encoding\n",
    )
}

/// Runs blocking filesystem work off the async runtime.
async fn blocking<T, F>(work: F) -> Result<T, PublishError>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PublishError::Io(std::io::Error::other(e)))?
        .map_err(classify_io)
}

/// Blob ids of `paths` hashed straight from disk, without any git filters.
async fn raw_blob_ids(
    publisher: &GitBranchPublisher,
    dir: &Path,
    source: &Path,
    paths: &[&str],
) -> Result<Vec<String>, PublishError> {
    let mut ids = Vec::with_capacity(paths.len());
    for chunk in paths.chunks(256) {
        let mut args = vec!["hash-object", "--no-filters", "--"];
        let full: Vec<String> = chunk
            .iter()
            .map(|p| source.join(p).display().to_string())
            .collect();
        args.extend(full.iter().map(String::as_str));
        let out = publisher.git(dir, &args).await?;
        ids.extend(out.lines().map(str::to_string));
    }
    Ok(ids)
}

#[async_trait]
impl Publisher for GitBranchPublisher {
    async fn publish(
        &self,
        artifact_path: &Path,
        target: &PublishTarget,
    ) -> Result<PublishRecord, PublishError> {
        let source = content_root(artifact_path, target)?;
        let branch = target.branch_or_location.as_str();
        let files = blocking({
            let source = source.clone();
            move || manifest(&source, &[])
        })
        .await?;
        info!(
            remote = %self.remote.redact(&self.remote.url),
            branch,
            files = files.len(),
            "[PUBLISH][GIT] Publishing artifact to branch"
        );

        let work = tempfile::tempdir()?;
        let dir = work.path();
        let url = self.remote.authenticated_url();

        self.git(dir, &["init", "-q"]).await?;
        neutralise_checkout_rules(dir).map_err(classify_io)?;
        for (key, value) in RAW_CONTENT_CONFIG {
            self.git(dir, &["config", key, value]).await?;
        }
        self.git(dir, &["remote", "add", "origin", url.as_str()])
            .await?;

        let head_ref = format!("refs/heads/{branch}");
        let heads = self
            .git(dir, &["ls-remote", "origin", head_ref.as_str()])
            .await?;
        if heads.is_empty() {
            info!(branch, "[PUBLISH][GIT] Branch does not exist yet, starting orphan history");
            self.git(dir, &["symbolic-ref", "HEAD", head_ref.as_str()])
                .await?;
        } else {
            self.git(dir, &["fetch", "-q", "origin", branch]).await?;
            self.git(dir, &["checkout", "-q", "-B", branch, "FETCH_HEAD"])
                .await?;
        }

        blocking({
            let (source, dir) = (source.clone(), dir.to_path_buf());
            let marker = target.disable_processing;
            move || {
                clear_worktree(&dir)?;
                copy_tree(&source, &dir)?;
                if marker && !dir.join(PROCESSING_MARKER).exists() {
                    fs::write(dir.join(PROCESSING_MARKER), b"")?;
                }
                Ok(())
            }
        })
        .await?;

        let message = target.message();
        let name = format!("user.name={}", target.author.name);
        let email = format!("user.email={}", target.author.email);
        self.git(dir, &["add", "--all", "--force"]).await?;
        self.git(
            dir,
            &[
                "-c",
                name.as_str(),
                "-c",
                email.as_str(),
                "-c",
                "commit.gpgsign=false",
                "commit",
                "-q",
                "--allow-empty",
                "--no-verify",
                "-m",
                message.as_str(),
            ],
        )
        .await?;
        self.verify_committed(dir, &source, &files, target.disable_processing)
            .await?;

        let id = self.git(dir, &["rev-parse", "HEAD"]).await?;
        let sequence = self
            .git(dir, &["rev-list", "--count", "HEAD"])
            .await?
            .parse::<u64>()
            .map_err(|e| PublishError::Rejected(format!("unexpected rev-list output: {e}")))?;

        let refspec = format!("HEAD:{head_ref}");
        self.git(dir, &["push", "-q", "origin", refspec.as_str()])
            .await?;

        info!(id = %id, branch, sequence, "[PUBLISH][GIT] Branch publish complete");
        Ok(PublishRecord {
            id,
            sequence,
            destination: format!("{}#{branch}", self.remote.redact(&self.remote.url)),
            author: target.author.clone(),
            message,
            published_at: Utc::now(),
            files,
        })
    }
}
