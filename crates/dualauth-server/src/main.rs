//! dualauth-server entry point

#![warn(clippy::all)]

use std::process::ExitCode;

use clap::Parser;
use dualauth_server::cli::Cli;
use tracing::{error, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    cli.init_tracing();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "dualauth-server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> dualauth_server::ServerResult<()> {
    let state = cli.app_state()?;
    let listener = cli.bind().await?;
    dualauth_server::serve(listener, state, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}
