use anyhow::Result;
use clap::Parser;
use docpub::cli::{run, Cli};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing for the CLI; RUST_LOG filters.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    tracing::info!("CLI arguments parsed, invoking run");
    match run(cli, cancel).await {
        Ok(outcome) => {
            tracing::info!(exit_code = outcome.exit_code(), "CLI completed");
            std::process::exit(outcome.exit_code());
        }
        Err(e) => {
            tracing::error!(error = %e, "CLI exited with error");
            Err(e)
        }
    }
}
