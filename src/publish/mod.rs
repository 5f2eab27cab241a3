//! Publishers: the destinations an artifact can replace.
//!
//! - [`DirectoryPublisher`] keeps live content and an append-only history on a
//!   local or mounted filesystem.
//! - [`GitBranchPublisher`] commits the content to a branch of a git remote
//!   (the classic `gh-pages` layout) and pushes it.
//!
//! Both resolve the content root the same way and describe what they wrote
//! with the same [`PublishedFile`] manifest, so records from either destination
//! can be compared against the artifact byte for byte.

mod directory;
mod git;

pub use directory::DirectoryPublisher;
pub use git::{GitBranchPublisher, GitRemote};

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, error};
use walkdir::WalkDir;

use crate::config::PublishTarget;
use crate::contract::{PublishError, PublishedFile};

/// Directory inside `artifact_path` whose contents are published.
///
/// Errors with [`PublishError::InvalidArtifact`] if it is missing, not a
/// directory, or empty.
pub fn content_root(artifact_path: &Path, target: &PublishTarget) -> Result<PathBuf, PublishError> {
    let root = artifact_path.join(&target.publish_dir);
    let invalid = |reason: &str| PublishError::InvalidArtifact {
        path: root.clone(),
        reason: reason.to_string(),
    };

    if !root.exists() {
        error!(path = %root.display(), "[PUBLISH] Artifact directory does not exist");
        return Err(invalid("does not exist"));
    }
    if !root.is_dir() {
        error!(path = %root.display(), "[PUBLISH] Artifact path is not a directory");
        return Err(invalid("not a directory"));
    }
    let mut entries = fs::read_dir(&root).map_err(|e| invalid(&format!("unreadable: {e}")))?;
    if entries.next().is_none() {
        error!(path = %root.display(), "[PUBLISH] Artifact directory is empty");
        return Err(invalid("directory is empty"));
    }
    Ok(root)
}

/// Recursively copies the contents of `from` into `to` (which must exist).
pub(crate) fn copy_tree(from: &Path, to: &Path) -> io::Result<u64> {
    let mut copied = 0;
    for entry in WalkDir::new(from).min_depth(1).follow_links(true) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(io::Error::other)?;
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &dest)?;
            copied += 1;
        }
    }
    debug!(from = %from.display(), to = %to.display(), files = copied, "Copied tree");
    Ok(copied)
}

/// Describes every regular file under `root`, sorted by path. Entries whose
/// top-level name is in `exclude` are skipped.
pub fn manifest(root: &Path, exclude: &[&str]) -> io::Result<Vec<PublishedFile>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| {
            !(e.depth() == 1 && exclude.iter().any(|x| e.file_name() == *x))
        });
    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).map_err(io::Error::other)?;
        let path = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let mut hasher = Sha256::new();
        let mut file = fs::File::open(entry.path())?;
        let mut buf = [0u8; 8192];
        let mut size = 0u64;
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            size += n as u64;
            hasher.update(&buf[..n]);
        }

        files.push(PublishedFile {
            path,
            size,
            sha256: format!("{:x}", hasher.finalize()),
        });
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Local filesystem errors: permission problems are authorization failures,
/// everything else stays an I/O error.
pub(crate) fn classify_io(e: io::Error) -> PublishError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => PublishError::Unauthorized(e.to_string()),
        _ => PublishError::Io(e),
    }
}
