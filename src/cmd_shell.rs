//! Interactive tool shell.

use std::io::Write;
use std::process::ExitCode;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use toolbridge_mcp::BridgeSession;

use crate::cmd_tools::{parse_arguments, render_result};

#[derive(Debug, PartialEq)]
enum ShellCommand {
    Empty,
    Exit,
    Help,
    Call { tool: String, args: Value },
}

fn parse_line(line: &str) -> Result<ShellCommand, String> {
    let line = line.trim();
    match line {
        "" => return Ok(ShellCommand::Empty),
        "exit" | "quit" => return Ok(ShellCommand::Exit),
        "help" | "tools" => return Ok(ShellCommand::Help),
        _ => {}
    }

    let (tool, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    Ok(ShellCommand::Call {
        tool: tool.to_string(),
        args: parse_arguments(rest)?,
    })
}

fn print_help(session: &BridgeSession) {
    println!("Usage: <tool> [json-args]   e.g. subnet_calculator {{\"cidr\": \"10.0.0.0/24\"}}");
    println!("       exit                 leave the shell");
    println!("Tools:");
    for tool in session.tools() {
        println!("  {}", tool.name);
    }
}

/// Read `<tool> <json-args>` lines until `exit` or end of input.
pub(crate) async fn run_shell(
    session: &BridgeSession,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    println!(
        "Connected to {} with {} tools. Type `help` for usage, `exit` to quit.",
        session.name(),
        session.tools().len()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        let (tool, args) = match parse_line(&line) {
            Ok(ShellCommand::Empty) => continue,
            Ok(ShellCommand::Exit) => break,
            Ok(ShellCommand::Help) => {
                print_help(session);
                continue;
            }
            Ok(ShellCommand::Call { tool, args }) => (tool, args),
            Err(message) => {
                eprintln!("error: {}", message);
                continue;
            }
        };

        debug!(tool = %tool, "Shell call");
        match session.call_tool(&tool, args).await {
            Ok(result) => {
                println!("{}", render_result(&result));
                if result.is_failure() {
                    eprintln!("(tool reported failure)");
                }
            }
            Err(e) if e.is_fatal() => {
                warn!("Leaving shell: {}", e);
                return Err(e.into());
            }
            Err(e) => eprintln!("error: {}", e.user_message()),
        }
    }

    Ok(ExitCode::SUCCESS)
}
