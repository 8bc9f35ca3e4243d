//! web_search 工具：模拟搜索
//!
//! 不访问网络，按查询生成确定性的结构化结果（title / url / snippet）；
//! 真实搜索可通过注册同名工具替换。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::registry::{required_str, Params, Tool, ToolError};

/// 模拟返回的结果条数
const SIMULATED_RESULTS: usize = 2;

pub struct WebSearchTool;

fn encode_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("+")
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Parameters: query (str). Note: This is a simulated search."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Params) -> Result<Params, ToolError> {
        let query = required_str(&params, "query")?.trim();
        if query.is_empty() {
            return Err("Empty query".into());
        }
        tracing::info!(query = %query, "web_search tool execute");

        let encoded = encode_query(query);
        let results: Vec<Value> = (1..=SIMULATED_RESULTS)
            .map(|i| {
                json!({
                    "title": format!("Result {i} for: {query}"),
                    "url": format!("https://example.com/result{i}?q={encoded}"),
                    "snippet": format!("Simulated search result {i} for '{query}'."),
                })
            })
            .collect();

        let mut out = Params::new();
        out.insert("query".into(), json!(query));
        out.insert("count".into(), json!(results.len()));
        out.insert("results".into(), Value::Array(results));
        out.insert(
            "note".into(),
            json!("This is a simulated search. Register a real 'web_search' tool to replace it."),
        );
        Ok(out)
    }
}
