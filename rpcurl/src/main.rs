//! # Rpcurl CLI Entry Point
//!
//! The main executable for the rpcurl tool. This file drives the application lifecycle:
//!
//! 1. **Initialization**: Parses command-line arguments using [`cli::Cli`] and validates them
//!    into a [`config::Config`].
//! 2. **Execution**: Runs [`app::run`] under the optional `--max-time` deadline, racing it
//!    against Ctrl-C.
//! 3. **Termination**: Releases the [`session::Session`] and exits with the code of the outcome.
mod app;
mod cli;
mod config;
mod error;
mod formatter;
mod handler;
mod session;

use clap::Parser;
use cli::Cli;
use config::Config;
use error::{CliError, Outcome};
use formatter::{FormattedString, Warning};
use rpcurl_core::timing::Timing;
use session::Session;
use std::io::IsTerminal;
use std::process;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if !std::io::stdout().is_terminal() || !std::io::stderr().is_terminal() {
        colored::control::set_override(false);
    }

    let config = match Config::from_cli(cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", FormattedString::from(&err));
            process::exit(err.exit_code());
        }
    };

    for warning in &config.warnings {
        eprintln!("{}", FormattedString::from(Warning(warning)));
    }

    let timing = if config.verbosity > 1 {
        Timing::root("Timing Data")
    } else {
        Timing::Disabled
    };
    let deadline = config
        .max_time
        .and_then(|max_time| Instant::now().checked_add(max_time));

    let mut session = Session::default();

    let result = tokio::select! {
        result = with_deadline(deadline, app::run(&config, &mut session, &timing, deadline)) => result,
        _ = interrupted() => Err(CliError::Fatal(anyhow::anyhow!("Interrupted"))),
    };

    let code = match result {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            eprintln!("{}", FormattedString::from(&err));
            err.exit_code()
        }
    };

    timing.done();
    if let Some(text) = timing.render() {
        print!("{text}");
    }

    session.finish(code, |code| process::exit(code));
}

async fn with_deadline(
    deadline: Option<Instant>,
    run: impl Future<Output = Result<Outcome, CliError>>,
) -> Result<Outcome, CliError> {
    let Some(deadline) = deadline else {
        return run.await;
    };

    tokio::time::timeout_at(deadline, run)
        .await
        .unwrap_or_else(|_| {
            Err(CliError::Fatal(anyhow::anyhow!(
                "Operation did not complete within --max-time"
            )))
        })
}

/// Resolves on Ctrl-C. Never resolves when the signal handler cannot be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "warn,rpcurl=info,rpcurl_core=info",
        _ => "warn,rpcurl=debug,rpcurl_core=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
