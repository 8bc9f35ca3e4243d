//! 参数模板解析
//!
//! 两种引用形式：
//! - 整值引用 `${path}`：整个字符串替换为上下文中 path 处的值（可为任意 JSON 类型），找不到时为 null；
//! - 内嵌引用 `{{path}}`：字符串中每处替换为值的文本形式，找不到时保留原文。
//!
//! 其他值原样透传。

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::plan::context::ExecutionContext;
use crate::tools::Params;

static EMBEDDED_RE: OnceLock<Regex> = OnceLock::new();

fn embedded_re() -> &'static Regex {
    EMBEDDED_RE.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").expect("embedded reference regex"))
}

/// 若字符串恰为 `${path}` 形式则返回 path
fn whole_reference(s: &str) -> Option<&str> {
    let path = s.strip_prefix("${")?.strip_suffix('}')?;
    if path.is_empty() || path.contains(|c: char| c == '{' || c == '}') {
        return None;
    }
    Some(path.trim())
}

/// 值的文本形式：字符串原样，其余为紧凑 JSON
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 展开字符串中的所有 `{{path}}`；未解析的引用保留原文
pub fn render_template(template: &str, context: &ExecutionContext) -> String {
    embedded_re()
        .replace_all(template, |caps: &Captures| {
            match context.get_path(caps[1].trim()) {
                Some(v) if !v.is_null() => render(v),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// 解析单个参数值
pub fn resolve_value(value: &Value, context: &ExecutionContext) -> Value {
    let Value::String(s) = value else {
        return value.clone();
    };
    if let Some(path) = whole_reference(s) {
        return match context.get_path(path) {
            Some(v) => v.clone(),
            None => {
                tracing::debug!(path = %path, "unresolved whole-value reference");
                Value::Null
            }
        };
    }
    if s.contains("{{") {
        return Value::String(render_template(s, context));
    }
    value.clone()
}

/// 解析整组参数
pub fn resolve_parameters(params: &Params, context: &ExecutionContext) -> Params {
    params
        .iter()
        .map(|(k, v)| (k.clone(), resolve_value(v, context)))
        .collect()
}
