//! json_parse 工具：解析 JSON 字符串

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::registry::{required_str, Params, Tool, ToolError};

pub struct JsonParseTool;

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[async_trait]
impl Tool for JsonParseTool {
    fn name(&self) -> &str {
        "json_parse"
    }

    fn description(&self) -> &str {
        "Parse JSON string. Parameters: json_string (str)"
    }

    async fn execute(&self, params: Params) -> Result<Params, ToolError> {
        let raw = required_str(&params, "json_string")?;
        let data: Value = serde_json::from_str(raw).map_err(|e| {
            let preview: String = raw.chars().take(100).collect();
            format!("JSON parse error: {e} (input: {preview})")
        })?;

        let mut out = Params::new();
        out.insert("type".into(), json!(type_name(&data)));
        out.insert("parsed_data".into(), data);
        Ok(out)
    }
}
