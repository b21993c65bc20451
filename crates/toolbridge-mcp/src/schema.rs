//! Conversion of discovered tools into function-calling specs for an LLM.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tool::{required_names, ToolDescriptor};

/// A tool as the calling model sees it, in OpenAI `tools=[...]` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallerToolSpec {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionSpec,
}

/// The `function` half of [`CallerToolSpec`].
///
/// On its own this is the legacy `functions=[...]` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Map a descriptor to its caller-facing spec.
///
/// Never fails: a missing or malformed `properties` becomes `{}`, a missing or
/// malformed `required` becomes `[]`.
pub fn to_caller_schema(tool: &ToolDescriptor) -> CallerToolSpec {
    let properties = tool
        .input_schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_else(Map::new);
    let required: Vec<Value> = required_names(&tool.input_schema)
        .into_iter()
        .map(Value::String)
        .collect();

    CallerToolSpec {
        tool_type: "function".to_string(),
        function: FunctionSpec {
            name: tool.name.clone(),
            description: tool.description.clone().unwrap_or_default(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        },
    }
}

pub fn to_caller_schemas(tools: &[ToolDescriptor]) -> Vec<CallerToolSpec> {
    tools.iter().map(to_caller_schema).collect()
}
