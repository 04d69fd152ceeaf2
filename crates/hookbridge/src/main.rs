//! `hookbridge` — Hook Dispatch & Orchestration Core unified launcher.

mod cli;
mod server;

use clap::Parser;
use cli::{Cli, Commands};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let app_name = "hookbridge";
    let tui_mode = false;
    if let Err(e) = hookbridge_logging::init_logging(hookbridge_logging::LogConfig {
        app_name,
        verbose: cli.verbose,
        tui_mode,
    }) {
        eprintln!("failed to initialize logging: {e:#}");
    }

    let is_start = matches!(cli.command, Commands::Start { .. });

    match cli::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("hookbridge: {err}");
            if is_start {
                tracing::error!(error = %err, "hookbridge exited with an error");
            }
            err.exit_code()
        }
    }
}
