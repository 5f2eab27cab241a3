//! High-level pipeline: trigger → build → publish.
//!
//! [`Pipeline::run`] is a small state machine:
//!
//! - **Start**: evaluate the trigger. A declined trigger ends in
//!   [`RunOutcome::Skipped`]; with [`BuildPolicy::Always`] the build still runs
//!   first so a broken build is reported on every ref.
//! - **Building**: invoke the [`ArtifactBuilder`]. `success = false` ends in
//!   [`Failure::Build`] with the diagnostics untouched.
//! - **Publishing**: invoke the [`Publisher`]. Ends in
//!   [`RunOutcome::Published`] or [`Failure::Publish`].
//!
//! Every error is terminal for the run; nothing is retried here. Cancelling the
//! token before publishing starts ends in [`RunOutcome::Cancelled`] and the
//! publisher is never called.

use std::fmt;
use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{BuildPolicy, PipelineOptions, PublishTarget, RunContext};
use crate::contract::{ArtifactBuilder, BuildResult, PublishError, PublishRecord, Publisher};
use crate::trigger::should_publish;

#[derive(Debug)]
pub enum Failure {
    Build { diagnostics: Vec<String> },
    Publish(PublishError),
}

/// Terminal state of one run.
#[derive(Debug)]
pub enum RunOutcome {
    Skipped,
    Published(PublishRecord),
    Failed(Failure),
    Cancelled,
}

impl RunOutcome {
    /// Process exit code the surrounding environment should use.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Published(_) | RunOutcome::Skipped => 0,
            RunOutcome::Failed(_) => 1,
            RunOutcome::Cancelled => 130,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == 0
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Skipped => write!(f, "skipped: ref is not the publish branch"),
            RunOutcome::Published(record) => write!(
                f,
                "published {} file(s) to {} as {} (#{})",
                record.files.len(),
                record.destination,
                record.id,
                record.sequence
            ),
            RunOutcome::Failed(Failure::Build { diagnostics }) => {
                write!(f, "build failed ({} diagnostic line(s))", diagnostics.len())
            }
            RunOutcome::Failed(Failure::Publish(e)) => write!(f, "publish failed: {e}"),
            RunOutcome::Cancelled => write!(f, "cancelled before publishing"),
        }
    }
}

/// Coordinates one builder and one publisher.
pub struct Pipeline<'a, B: ?Sized, P: ?Sized> {
    builder: &'a B,
    publisher: &'a P,
    options: PipelineOptions,
    cancel: CancellationToken,
}

impl<'a, B, P> Pipeline<'a, B, P>
where
    B: ArtifactBuilder + ?Sized,
    P: Publisher + ?Sized,
{
    pub fn new(builder: &'a B, publisher: &'a P) -> Self {
        Self {
            builder,
            publisher,
            options: PipelineOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Token whose cancellation abandons the run before anything is published.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(
        &self,
        context: &RunContext,
        source_root: &Path,
        target: &PublishTarget,
    ) -> RunOutcome {
        context.trace_loaded();
        let publish = should_publish(context);

        if !publish && self.options.build_policy == BuildPolicy::PublishOnly {
            info!(ref_name = %context.ref_name, "[RUN] Trigger declined, skipping build and publish");
            return RunOutcome::Skipped;
        }

        let Some(build) = self.build(source_root).await else {
            return RunOutcome::Cancelled;
        };
        if !build.success {
            error!(
                diagnostics = build.diagnostics.len(),
                "[RUN] Build failed, nothing will be published"
            );
            return RunOutcome::Failed(Failure::Build {
                diagnostics: build.diagnostics,
            });
        }

        if !publish {
            info!(ref_name = %context.ref_name, "[RUN] Build verified, trigger declined publishing");
            return RunOutcome::Skipped;
        }
        if self.cancel.is_cancelled() {
            warn!("[RUN] Cancelled after build, destination left untouched");
            return RunOutcome::Cancelled;
        }

        let mut target = target.clone();
        target.commit_message = Some(target.render_message(Some(context)));

        info!(
            artifact = %build.artifact_path.display(),
            destination = %target.branch_or_location,
            "[RUN] Publishing"
        );
        match self.publisher.publish(&build.artifact_path, &target).await {
            Ok(record) => {
                info!(id = %record.id, sequence = record.sequence, "[RUN] Published");
                RunOutcome::Published(record)
            }
            Err(e) => {
                error!(error = %e, "[RUN] Publish failed");
                RunOutcome::Failed(Failure::Publish(e))
            }
        }
    }

    /// Runs the builder, racing it against cancellation. `None` means cancelled.
    async fn build(&self, source_root: &Path) -> Option<BuildResult> {
        if self.cancel.is_cancelled() {
            warn!("[RUN] Cancelled before build");
            return None;
        }
        info!(source_root = %source_root.display(), "[RUN] Building artifact");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!("[RUN] Cancelled during build, abandoning run");
                None
            }
            result = self.builder.build(source_root) => Some(result),
        }
    }
}
