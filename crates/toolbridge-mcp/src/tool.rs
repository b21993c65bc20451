//! Tool descriptors and call results.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Tool definition from MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    /// JSON-Schema `type`, or `"any"` when undeclared.
    pub param_type: String,
    pub description: Option<String>,
    pub required: bool,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: Value::Null,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Declared parameters. Malformed schemas yield an empty list.
    pub fn parameters(&self) -> Vec<ParameterSpec> {
        let required = required_names(&self.input_schema);
        let Some(properties) = self
            .input_schema
            .get("properties")
            .and_then(Value::as_object)
        else {
            return Vec::new();
        };

        properties
            .iter()
            .map(|(name, prop)| ParameterSpec {
                name: name.clone(),
                param_type: prop
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("any")
                    .to_string(),
                description: prop
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                required: required.iter().any(|r| r == name),
            })
            .collect()
    }
}

/// String entries of the schema's `required` array; anything else is ignored.
pub(crate) fn required_names(schema: &Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Parse the `result` of a `tools/list` call.
///
/// Entries that are not objects with a string `name` are skipped, so one bad
/// descriptor does not hide the rest.
pub fn parse_tool_list(result: &Value) -> Vec<ToolDescriptor> {
    let Some(entries) = result.get("tools").and_then(Value::as_array) else {
        warn!("tools/list result has no 'tools' array");
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| match serde_json::from_value::<ToolDescriptor>(entry.clone()) {
            Ok(tool) => Some(tool),
            Err(e) => {
                warn!("Skipping malformed tool descriptor: {}", e);
                None
            }
        })
        .collect()
}

/// Content types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
}

/// Payload of a successful `tools/call`.
///
/// The envelope succeeded; whether the tool itself succeeded is reported
/// in-band through `isError` or a `status` field, see [`ToolCallResult::is_failure`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    pub tool: String,
    pub raw: Value,
}

impl ToolCallResult {
    pub fn new(tool: impl Into<String>, raw: Value) -> Self {
        Self {
            tool: tool.into(),
            raw,
        }
    }

    /// Recognized content blocks; unknown block types are left out.
    pub fn content(&self) -> Vec<McpContent> {
        self.raw
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| serde_json::from_value(b.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All text blocks joined with newlines.
    pub fn text(&self) -> Option<String> {
        let texts: Vec<String> = self
            .content()
            .into_iter()
            .filter_map(|c| match c {
                McpContent::Text { text } => Some(text),
                _ => None,
            })
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        }
    }

    /// Structured output, falling back to a text block that parses as JSON.
    pub fn structured(&self) -> Option<Value> {
        if let Some(structured) = self.raw.get("structuredContent") {
            return Some(structured.clone());
        }
        self.text()
            .and_then(|t| serde_json::from_str::<Value>(&t).ok())
            .filter(Value::is_object)
    }

    /// The MCP `isError` flag.
    pub fn is_error(&self) -> bool {
        self.raw
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// A domain-level `status`, at the top level or inside the structured output.
    pub fn status(&self) -> Option<String> {
        if let Some(status) = self.raw.get("status").and_then(Value::as_str) {
            return Some(status.to_string());
        }
        self.structured()
            .and_then(|s| s.get("status").and_then(Value::as_str).map(str::to_string))
    }

    /// True when the tool ran but reported failure in its payload.
    pub fn is_failure(&self) -> bool {
        self.is_error() || self.status().is_some_and(|s| s.eq_ignore_ascii_case("error"))
    }
}
