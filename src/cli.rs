//! CLI definitions for toolbridge.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// toolbridge CLI.
#[derive(Parser)]
#[command(name = "toolbridge")]
#[command(about = "Launch an MCP tool server over stdio and call its tools")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (optional)
    #[arg(short, long, default_value = "toolbridge.toml", global = true, env = "TOOLBRIDGE_CONFIG")]
    pub config: PathBuf,

    /// Working directory for the tool server
    #[arg(short, long, global = true)]
    pub work_dir: Option<PathBuf>,

    /// Tool server command, replacing the configured one
    #[arg(long, global = true)]
    pub server_cmd: Option<String>,

    /// Argument for the tool server command (repeatable)
    #[arg(long = "server-arg", global = true, allow_hyphen_values = true)]
    pub server_args: Vec<String>,

    /// Tool call timeout in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// List the tools the server exposes
    Tools {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Print every tool as a function-calling schema
    Schema,

    /// Call one tool and print its result
    Call {
        /// Tool name
        tool: String,

        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// Interactive loop: `<tool> <json-args>` per line
    Shell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Table,
    Json,
}
