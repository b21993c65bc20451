//! Turning configuration and command line flags into a session.

use toolbridge_config::{Config, ConfigLoader};
use toolbridge_mcp::{BridgeSession, SessionBuilder};

use crate::cli::Cli;

/// Apply command line overrides on top of the loaded config.
pub(crate) fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(command) = &cli.server_cmd {
        config.server.command = command.clone();
        config.server.args = cli.server_args.clone();
    } else if !cli.server_args.is_empty() {
        config.server.args = cli.server_args.clone();
    }
    if let Some(dir) = &cli.work_dir {
        config.server.working_dir = Some(dir.clone());
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeouts.tool_call_ms = timeout_ms;
    }
}

pub(crate) fn session_builder(config: &Config) -> SessionBuilder {
    let mut builder = BridgeSession::builder(config.server.command.clone())
        .name(config.server.name.clone())
        .args(config.server.args.iter().cloned())
        .envs(config.server.env.clone())
        .client_info(config.client.name.clone(), config.client.version.clone())
        .protocol_version(config.client.protocol_version.clone())
        .handshake_timeout(config.timeouts.handshake())
        .request_timeout(config.timeouts.request())
        .tool_call_timeout(config.timeouts.tool_call());

    if let Some(dir) = &config.server.working_dir {
        builder = builder.working_dir(ConfigLoader::expand_path(&dir.to_string_lossy()));
    }
    builder
}
