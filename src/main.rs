//! toolbridge
//!
//! Command line front end for MCP tool servers spoken to over stdio.

mod bridge;
mod cli;
mod cmd_shell;
mod cmd_tools;

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use toolbridge_config::{ConfigLoader, ConfigValidator, LoggingConfig};
use toolbridge_mcp::{BridgeError, BridgeSession};

use crate::cli::{Cli, Commands};

fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = logging.resolved_directory();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(logging.file_prefix.as_str())
        .filename_suffix("log")
        .max_log_files(30)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard stops the writer thread.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // Console logs go to stderr; stdout carries command output.
    let console = logging
        .console
        .then(|| fmt::layer().with_target(true).with_writer(std::io::stderr));
    let file = fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();

    Ok(())
}

fn report(err: &(dyn std::error::Error + 'static)) {
    match err.downcast_ref::<BridgeError>() {
        Some(bridge) => eprintln!("error: {}", bridge.user_message()),
        None => eprintln!("error: {}", err),
    }
}

async fn run(
    command: Commands,
    session: &BridgeSession,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match command {
        Commands::Tools { format } => cmd_tools::list_tools(session, format),
        Commands::Schema => cmd_tools::print_schema(session),
        Commands::Call { tool, args } => cmd_tools::call(session, &tool, &args).await,
        Commands::Shell => cmd_shell::run_shell(session).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match ConfigLoader::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    bridge::apply_overrides(&mut config, &cli);

    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("warning: logging disabled: {}", e);
    }

    match ConfigValidator::validate(&config).and_then(|result| result.into_result()) {
        Ok(warnings) => {
            for warning in warnings {
                warn!(path = %warning.path, "{}", warning.message);
            }
        }
        Err(e) => {
            error!("Invalid configuration: {}", e);
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    }

    info!(
        command = %config.server.command,
        args = ?config.server.args,
        "Starting tool server"
    );
    let mut session = match bridge::session_builder(&config).start().await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to start tool server: {}", e);
            report(&e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = tokio::select! {
        outcome = run(cli.command, &session) => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down");
            Ok(ExitCode::from(130))
        }
    };

    if let Err(e) = session.close().await {
        warn!("Error while closing session: {}", e);
    }
    info!(session = %session.id(), "Session closed");

    match outcome {
        Ok(code) => code,
        Err(e) => {
            report(e.as_ref());
            ExitCode::FAILURE
        }
    }
}
