//! # contract: the two collaborator seams of the pipeline
//!
//! The coordinator never builds documentation or writes to a destination itself.
//! It talks to an [`ArtifactBuilder`] and a [`Publisher`], both injected, so that
//! the toolchain and the destination can be swapped for stubs in tests.
//!
//! ## Mocking & Testing
//! - Both traits are annotated for `mockall`; with the `test-export-mocks`
//!   feature (on by default) `MockArtifactBuilder` and `MockPublisher` are
//!   exported for integration tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use mockall::automock;

use crate::config::{AuthorIdentity, PublishTarget};

/// Output of one build invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    /// Location of the generated files.
    pub artifact_path: PathBuf,
    pub success: bool,
    /// Passed through verbatim; never parsed.
    pub diagnostics: Vec<String>,
}

impl BuildResult {
    pub fn succeeded(artifact_path: impl Into<PathBuf>) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            success: true,
            diagnostics: Vec::new(),
        }
    }

    pub fn failed(artifact_path: impl Into<PathBuf>, diagnostics: Vec<String>) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            success: false,
            diagnostics,
        }
    }
}

/// One file of published content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedFile {
    /// Path relative to the destination root, `/`-separated.
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

/// One durable, attributed version of the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRecord {
    /// Commit id or version id, depending on the destination.
    pub id: String,
    /// 1-based position in the destination history.
    pub sequence: u64,
    pub destination: String,
    pub author: AuthorIdentity,
    pub message: String,
    pub published_at: DateTime<Utc>,
    /// Sorted by path.
    pub files: Vec<PublishedFile>,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("destination rejected credentials: {0}")]
    Unauthorized(String),
    #[error("destination unreachable: {0}")]
    DestinationUnreachable(String),
    #[error("invalid artifact at {path}: {reason}")]
    InvalidArtifact { path: PathBuf, reason: String },
    #[error("destination refused the write: {0}")]
    Rejected(String),
    #[error("I/O error while publishing: {0}")]
    Io(#[from] std::io::Error),
    /// A publish failed and the previous content could not be put back.
    #[error("{cause}; restoring the previous content failed: {restore}")]
    RollbackFailed {
        cause: Box<PublishError>,
        restore: String,
    },
}

/// Produces a documentation artifact from a source tree.
///
/// Potentially slow and potentially failing; failure is reported through
/// [`BuildResult::success`], never as an `Err`.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ArtifactBuilder: Send + Sync {
    async fn build(&self, source_root: &Path) -> BuildResult;
}

/// Replaces all content of a destination with an artifact directory.
///
/// Implementors must be all-or-nothing: on `Err` the destination content and
/// history are exactly as before the call, or the error is
/// [`PublishError::RollbackFailed`]. Gating is the caller's job; a
/// publisher does not re-check the trigger or the build result.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        artifact_path: &Path,
        target: &PublishTarget,
    ) -> Result<PublishRecord, PublishError>;
}
