//! One-shot subcommands: `tools`, `schema`, `call`.

use std::process::ExitCode;

use serde_json::Value;
use tracing::info;

use toolbridge_mcp::{BridgeSession, ToolCallResult, ToolDescriptor};

use crate::cli::OutputFormat;

/// List discovered tools.
pub(crate) fn list_tools(
    session: &BridgeSession,
    format: OutputFormat,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let tools = session.tools();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(tools)?);
        }
        OutputFormat::Table => {
            if tools.is_empty() {
                println!("No tools found.");
                return Ok(ExitCode::SUCCESS);
            }
            println!("{:<32} {:<40} {}", "NAME", "PARAMETERS", "DESCRIPTION");
            println!("{}", "-".repeat(100));
            for tool in tools {
                println!(
                    "{:<32} {:<40} {}",
                    tool.name,
                    format_parameters(tool),
                    first_line(tool.description.as_deref().unwrap_or("-"))
                );
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Print every tool in function-calling form.
pub(crate) fn print_schema(
    session: &BridgeSession,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let schemas = session.caller_schemas();
    println!("{}", serde_json::to_string_pretty(&schemas)?);
    Ok(ExitCode::SUCCESS)
}

/// Call one tool. A failure reported inside the payload exits non-zero.
pub(crate) async fn call(
    session: &BridgeSession,
    tool: &str,
    args: &str,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let arguments = parse_arguments(args)?;
    let result = session.call_tool(tool, arguments).await?;

    println!("{}", render_result(&result));
    if result.is_failure() {
        info!(tool, "Tool reported failure");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Parse call arguments; blank input means no arguments.
pub(crate) fn parse_arguments(text: &str) -> Result<Value, String> {
    if text.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let value: Value =
        serde_json::from_str(text).map_err(|e| format!("Arguments are not valid JSON: {}", e))?;
    if !value.is_object() {
        return Err("Arguments must be a JSON object".to_string());
    }
    Ok(value)
}

/// Human-readable rendering of a call result.
pub(crate) fn render_result(result: &ToolCallResult) -> String {
    if let Some(structured) = result.structured() {
        if let Ok(pretty) = serde_json::to_string_pretty(&structured) {
            return pretty;
        }
    }
    if let Some(text) = result.text() {
        return text;
    }
    serde_json::to_string_pretty(&result.raw).unwrap_or_else(|_| result.raw.to_string())
}

fn format_parameters(tool: &ToolDescriptor) -> String {
    let params = tool.parameters();
    if params.is_empty() {
        return "-".to_string();
    }
    params
        .iter()
        .map(|p| {
            if p.required {
                format!("{}: {}", p.name, p.param_type)
            } else {
                format!("{}?: {}", p.name, p.param_type)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments("").unwrap(), json!({}));
        assert_eq!(parse_arguments("  ").unwrap(), json!({}));
        assert_eq!(
            parse_arguments(r#"{"cidr": "10.0.0.0/24"}"#).unwrap(),
            json!({"cidr": "10.0.0.0/24"})
        );
        assert!(parse_arguments("{cidr}").unwrap_err().contains("not valid JSON"));
        assert!(parse_arguments("[1, 2]").unwrap_err().contains("JSON object"));
    }

    #[test]
    fn test_render_prefers_structured() {
        let result = ToolCallResult::new(
            "subnet_calculator",
            json!({"content": [{"type": "text", "text": "{\"num_addresses\": 256}"}]}),
        );
        let rendered = render_result(&result);
        assert!(rendered.contains("\"num_addresses\": 256"));
    }

    #[test]
    fn test_render_plain_text_and_raw() {
        let text = ToolCallResult::new(
            "t",
            json!({"content": [
                {"type": "text", "text": "line one"},
                {"type": "text", "text": "line two"}
            ]}),
        );
        assert_eq!(render_result(&text), "line one\nline two");

        let raw = ToolCallResult::new("t", json!({"devices": ["r1"]}));
        assert!(render_result(&raw).contains("\"devices\""));
    }

    #[test]
    fn test_format_parameters() {
        let tool = ToolDescriptor::new("pyats_run_show_command").with_input_schema(json!({
            "properties": {
                "command": {"type": "string"},
                "device_name": {"type": "string"}
            },
            "required": ["device_name"]
        }));
        assert_eq!(
            format_parameters(&tool),
            "command?: string, device_name: string"
        );
        assert_eq!(format_parameters(&ToolDescriptor::new("ping")), "-");
    }

    #[test]
    fn test_first_line() {
        assert_eq!(first_line("Run a show command.\n\nArgs: ..."), "Run a show command.");
        assert_eq!(first_line(""), "");
    }
}
