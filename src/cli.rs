//! CLI glue for the `docpub` binary: argument parsing, wiring configured
//! collaborators into a [`Pipeline`], and operator-facing output.
//!
//! Trigger information comes from flags, falling back to the variables a CI
//! runner exports (`GITHUB_EVENT_NAME`, `GITHUB_REF`, `GITHUB_SHA`).
//! All pipeline logic lives in the library modules; [`run`] only returns the
//! outcome, `main` turns it into an exit code.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::build::CommandBuilder;
use crate::config::{EventKind, RunContext};
use crate::contract::Publisher;
use crate::load_config::{load_config, Destination, DocpubConfig};
use crate::pipeline::{Failure, Pipeline, RunOutcome};
use crate::publish::{DirectoryPublisher, GitBranchPublisher};
use crate::trigger::should_publish;

/// CLI for docpub: build API documentation and publish it from the default branch.
#[derive(Parser)]
#[clap(
    name = "docpub",
    version,
    about = "Build API documentation and publish it to a hosting branch or directory"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the documentation and publish it if the trigger allows
    Run {
        #[clap(flatten)]
        trigger: TriggerArgs,
        /// Root of the source checkout
        #[clap(long, default_value = ".")]
        source_root: PathBuf,
    },
    /// Print whether a run with the given trigger would publish
    Check {
        #[clap(flatten)]
        trigger: TriggerArgs,
    },
}

#[derive(Args)]
pub struct TriggerArgs {
    /// Path to the YAML config file
    #[clap(long)]
    pub config: PathBuf,
    /// Event that started the run (push, workflow_dispatch, ...)
    #[clap(long, env = "GITHUB_EVENT_NAME", default_value = "manual")]
    pub event: String,
    /// Branch or ref the run was started for
    #[clap(long = "ref", env = "GITHUB_REF")]
    pub git_ref: String,
    /// Source commit, recorded in the publish message
    #[clap(long, env = "GITHUB_SHA")]
    pub revision: Option<String>,
}

impl TriggerArgs {
    fn context(&self, config: &DocpubConfig) -> RunContext {
        let context = RunContext::new(
            EventKind::from_event_name(&self.event),
            self.git_ref.clone(),
            &config.default_branch,
        );
        match &self.revision {
            Some(rev) if !rev.is_empty() => context.with_revision(rev.clone()),
            _ => context,
        }
    }
}

fn publisher_for(destination: &Destination) -> Box<dyn Publisher> {
    match destination {
        Destination::Git(remote) => Box::new(GitBranchPublisher::new(remote.clone())),
        Destination::Directory { root } => Box::new(DirectoryPublisher::new(root.clone())),
    }
}

/// Async CLI entrypoint for integration tests and main(). Returns the run outcome;
/// configuration problems are errors.
pub async fn run(cli: Cli, cancel: CancellationToken) -> Result<RunOutcome> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Check { trigger } => {
            let config = load_config(&trigger.config)
                .with_context(|| format!("loading {}", trigger.config.display()))?;
            let context = trigger.context(&config);
            if should_publish(&context) {
                println!("publish: {} is the publish branch", context.ref_name);
            } else {
                println!(
                    "skip: {} is not the publish branch ({})",
                    context.ref_name, config.default_branch
                );
            }
            Ok(RunOutcome::Skipped)
        }
        Commands::Run {
            trigger,
            source_root,
        } => {
            let config = load_config(&trigger.config)
                .with_context(|| format!("loading {}", trigger.config.display()))?;
            let context = trigger.context(&config);
            tracing::info!(command = "run", ref_name = %context.ref_name, "Starting pipeline run");

            let builder = CommandBuilder::new(config.build.clone());
            let publisher = publisher_for(&config.destination);
            let pipeline = Pipeline::new(&builder, publisher.as_ref())
                .with_options(config.pipeline)
                .with_cancellation(cancel);

            let outcome = pipeline.run(&context, &source_root, &config.target).await;
            report(&outcome)?;
            Ok(outcome)
        }
    }
}

fn report(outcome: &RunOutcome) -> Result<()> {
    match outcome {
        RunOutcome::Published(record) => {
            println!("{outcome}");
            println!(
                "{}",
                serde_json::to_string_pretty(record).context("serialising publish record")?
            );
        }
        RunOutcome::Failed(Failure::Build { diagnostics }) => {
            eprintln!("[ERROR] {outcome}");
            for line in diagnostics {
                eprintln!("{line}");
            }
        }
        RunOutcome::Failed(Failure::Publish(_)) | RunOutcome::Cancelled => {
            eprintln!("[ERROR] {outcome}");
        }
        RunOutcome::Skipped => println!("{outcome}"),
    }
    Ok(())
}
