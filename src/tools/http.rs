//! api_call 工具：HTTP 请求
//!
//! 支持 GET / POST / PUT / PATCH / DELETE；请求带超时与 User-Agent，
//! 响应正文超过 max_response_chars 时截断并追加 ...[truncated]。

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};

use crate::tools::registry::{optional_str, required_str, Params, Tool, ToolError};

const USER_AGENT: &str = concat!("agentic/", env!("CARGO_PKG_VERSION"));

pub struct ApiCallTool {
    client: Client,
    max_response_chars: usize,
}

impl ApiCallTool {
    pub fn new(timeout_secs: u64, max_response_chars: usize) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            max_response_chars,
        }
    }
}

fn parse_method(raw: &str) -> Result<Method, String> {
    match raw.to_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        other => Err(format!("Unsupported HTTP method: {other}")),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...[truncated]", s.chars().take(max).collect::<String>())
    }
}

#[async_trait]
impl Tool for ApiCallTool {
    fn name(&self) -> &str {
        "api_call"
    }

    fn description(&self) -> &str {
        "Make HTTP API call. Parameters: url (str), method (str, default='GET'), headers (object, optional), data (object, optional)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string"},
                "method": {"type": "string", "enum": ["GET", "POST", "PUT", "PATCH", "DELETE"]},
                "headers": {"type": "object"},
                "data": {"type": "object"}
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, params: Params) -> Result<Params, ToolError> {
        let url = required_str(&params, "url")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(format!("Invalid URL: {url}").into());
        }
        let method = parse_method(optional_str(&params, "method", "GET"))?;
        tracing::info!(url = %url, method = %method, "api_call tool execute");

        let mut request = self.client.request(method.clone(), url);
        if let Some(Value::Object(headers)) = params.get("headers") {
            for (k, v) in headers {
                let value = v.as_str().map(String::from).unwrap_or_else(|| v.to_string());
                request = request.header(k.as_str(), value);
            }
        }
        if method != Method::GET && method != Method::DELETE {
            if let Some(data) = params.get("data").filter(|d| !d.is_null()) {
                request = request.json(data);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;
        let status = response.status();
        let headers: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    json!(v.to_str().unwrap_or_default()),
                )
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| format!("Read body failed: {e}"))?;

        let mut out = Params::new();
        out.insert("status_code".into(), json!(status.as_u16()));
        out.insert("url".into(), json!(url));
        out.insert("method".into(), json!(method.as_str()));
        out.insert(
            "response".into(),
            json!(truncate_chars(&body, self.max_response_chars)),
        );
        out.insert("headers".into(), Value::Object(headers));
        Ok(out)
    }
}
