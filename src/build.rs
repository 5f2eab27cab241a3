use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::BuildConfig;
use crate::contract::{ArtifactBuilder, BuildResult};

/// Builds documentation by running an external command (by default `cargo doc --no-deps`)
/// inside the source tree and pointing at its output directory.
pub struct CommandBuilder {
    config: BuildConfig,
}

impl CommandBuilder {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    /// Full argument list handed to the command.
    pub fn args(&self) -> Vec<String> {
        let mut args = self.config.args.clone();
        if self.config.exclude_dependencies && !args.iter().any(|a| a == "--no-deps") {
            args.push("--no-deps".to_string());
        }
        args
    }
}

#[async_trait]
impl ArtifactBuilder for CommandBuilder {
    async fn build(&self, source_root: &Path) -> BuildResult {
        let artifact_path = source_root.join(&self.config.output_dir);
        let args = self.args();
        info!(
            command = %self.config.command,
            args = ?args,
            source_root = %source_root.display(),
            "[BUILD] Invoking documentation build"
        );

        // kill_on_drop: a cancelled run must not leave the build running.
        let output = Command::new(&self.config.command)
            .args(&args)
            .current_dir(source_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(o) => o,
            Err(e) => {
                error!(error = ?e, command = %self.config.command, "[BUILD] Failed to launch build command");
                return BuildResult::failed(
                    artifact_path,
                    vec![format!("failed to launch `{}`: {e}", self.config.command)],
                );
            }
        };

        let mut diagnostics: Vec<String> = String::from_utf8_lossy(&output.stderr)
            .lines()
            .map(str::to_owned)
            .collect();
        debug!(lines = diagnostics.len(), "[BUILD] Captured build diagnostics");

        if !output.status.success() {
            error!(status = %output.status, "[BUILD] Build command exited unsuccessfully");
            diagnostics.push(format!("`{}` exited with {}", self.config.command, output.status));
            return BuildResult::failed(artifact_path, diagnostics);
        }

        if !artifact_path.is_dir() {
            error!(path = %artifact_path.display(), "[BUILD] Build succeeded but produced no artifact directory");
            diagnostics.push(format!(
                "artifact directory {} was not produced",
                artifact_path.display()
            ));
            return BuildResult::failed(artifact_path, diagnostics);
        }

        info!(path = %artifact_path.display(), "[BUILD] Documentation built");
        BuildResult {
            artifact_path,
            success: true,
            diagnostics,
        }
    }
}
