//! 关键词分解策略
//!
//! 基于关键词与正则把一句任务描述映射为工具步骤：文件读/写/列举、API 调用、搜索、计算。
//! 含 then / after that / next 或编号列表的任务按段拆分，后段步骤依赖前段全部步骤。
//! 空内容的 file_write 会接到前一个产出步骤的上下文键上（如 `{{calculation_result}}`）。
//! 什么都没匹配到时返回一个兜底步骤，保证计划非空。

use std::sync::OnceLock;

use regex::Regex;

use crate::plan::context::ExecutionContext;
use crate::plan::planner::DecompositionPolicy;
use crate::plan::types::{Step, StepId};

const WRITE_WORDS: &[&str] = &["write", "save", "create file", "store"];
const READ_WORDS: &[&str] = &["read", "load"];
const LIST_WORDS: &[&str] = &["list", "directory", "folder", "files"];
const API_WORDS: &[&str] = &["api", "http", "request", "call", "fetch", "get data"];
const SEARCH_WORDS: &[&str] = &["search", "find", "lookup", "information about"];
const CALC_WORDS: &[&str] = &["calculate", "compute", "math", "add", "multiply"];

const SEARCH_PREFIXES: &[&str] = &["search for", "find", "lookup", "information about", "search"];

static FILE_PATH_RES: OnceLock<Vec<Regex>> = OnceLock::new();
static DIRECTORY_RES: OnceLock<Vec<Regex>> = OnceLock::new();
static CONTENT_HINT_RES: OnceLock<Vec<Regex>> = OnceLock::new();
static QUOTED_RES: OnceLock<Vec<Regex>> = OnceLock::new();
static URL_RE: OnceLock<Regex> = OnceLock::new();
static METHOD_RE: OnceLock<Regex> = OnceLock::new();
static CALC_KEYWORD_RE: OnceLock<Regex> = OnceLock::new();
static ARITHMETIC_RE: OnceLock<Regex> = OnceLock::new();
static NUMBERED_RE: OnceLock<Regex> = OnceLock::new();
static SEQUENCE_RE: OnceLock<Regex> = OnceLock::new();

fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("heuristic regex"))
        .collect()
}

fn file_path_res() -> &'static [Regex] {
    FILE_PATH_RES.get_or_init(|| {
        compile_all(&[
            r#""([^"]+\.\w+)""#,
            r"'([^']+\.\w+)'",
            r"(\S+\.(?:txt|json|csv|py|md|html|xml))",
        ])
    })
}

fn directory_res() -> &'static [Regex] {
    DIRECTORY_RES.get_or_init(|| {
        compile_all(&[
            r#"(?i)\bin\s+["']([^"']+)["']"#,
            r#"(?i)directory\s+["']([^"']+)["']"#,
            r#"(?i)folder\s+["']([^"']+)["']"#,
        ])
    })
}

fn content_hint_res() -> &'static [Regex] {
    CONTENT_HINT_RES.get_or_init(|| {
        compile_all(&[
            r#"(?i)containing\s+["']([^"']+)["']"#,
            r#"(?i)with\s+content\s+["']([^"']+)["']"#,
        ])
    })
}

fn quoted_res() -> &'static [Regex] {
    QUOTED_RES.get_or_init(|| {
        compile_all(&[
            r#"(?i)with\s+["']([^"']+)["']"#,
            r#"["']([^"']+)["']"#,
        ])
    })
}

fn url_re() -> &'static Regex {
    URL_RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]]+"#).expect("url regex"))
}

fn method_re() -> &'static Regex {
    METHOD_RE.get_or_init(|| {
        Regex::new(r"(?i)\b(GET|POST|PUT|DELETE|PATCH)\b").expect("http method regex")
    })
}

fn calc_keyword_re() -> &'static Regex {
    CALC_KEYWORD_RE.get_or_init(|| {
        Regex::new(r"(?i)(?:calculate|compute)\s+([0-9+\-*/.()\s]+)").expect("calc regex")
    })
}

fn arithmetic_re() -> &'static Regex {
    ARITHMETIC_RE.get_or_init(|| {
        Regex::new(r"[\d(][\d+\-*/.()\s]*[\d)]").expect("arithmetic regex")
    })
}

fn numbered_re() -> &'static Regex {
    NUMBERED_RE.get_or_init(|| Regex::new(r"(?:^|\s)\d+\.\s+").expect("numbered list regex"))
}

fn sequence_re() -> &'static Regex {
    SEQUENCE_RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:and\s+then|after\s+that|then|next)\b").expect("sequence regex")
    })
}

fn matches_any(task_lower: &str, words: &[&str]) -> bool {
    words.iter().any(|w| task_lower.contains(w))
}

fn first_capture(res: &[Regex], text: &str) -> Option<String> {
    res.iter()
        .find_map(|re| re.captures(text))
        .map(|caps| caps[1].trim().to_string())
}

/// 单个词且含 '.'，看起来像文件名
fn looks_like_path(s: &str) -> bool {
    s.contains('.') && s.split_whitespace().count() == 1
}

fn extract_file_path(task: &str) -> Option<String> {
    first_capture(file_path_res(), task)
}

fn infer_file_path(task_lower: &str) -> &'static str {
    if task_lower.contains("report") {
        "report.txt"
    } else if task_lower.contains("data") {
        "data.json"
    } else if task_lower.contains("summary") {
        "summary.md"
    } else {
        "output.txt"
    }
}

fn extract_directory(task: &str) -> Option<String> {
    first_capture(directory_res(), task)
}

fn extract_content(task: &str) -> Option<String> {
    if let Some(hint) = first_capture(content_hint_res(), task) {
        return Some(hint);
    }
    quoted_res().iter().find_map(|re| {
        re.captures_iter(task)
            .map(|caps| caps[1].to_string())
            .find(|s| !looks_like_path(s))
    })
}

fn extract_url(task: &str) -> Option<String> {
    url_re().find(task).map(|m| m.as_str().to_string())
}

fn infer_api_endpoint(task_lower: &str) -> &'static str {
    if task_lower.contains("weather") {
        "https://api.openweathermap.org/data/2.5/weather"
    } else if task_lower.contains("user") {
        "https://jsonplaceholder.typicode.com/users/1"
    } else {
        "https://jsonplaceholder.typicode.com/posts/1"
    }
}

fn extract_http_method(task: &str) -> Option<String> {
    method_re()
        .captures(task)
        .map(|caps| caps[1].to_ascii_uppercase())
}

fn extract_search_query(task: &str) -> String {
    let lower = task.to_lowercase();
    let mut query = task;
    for prefix in SEARCH_PREFIXES {
        if lower.starts_with(prefix) {
            query = task.get(prefix.len()..).unwrap_or("").trim();
            break;
        }
    }
    let query = query.trim_matches(|c: char| c == '"' || c == '\'');
    if query.is_empty() {
        task.to_string()
    } else {
        query.to_string()
    }
}

fn is_expression(candidate: &str) -> bool {
    candidate.contains(|c: char| matches!(c, '+' | '-' | '*' | '/'))
        && candidate.chars().any(|c| c.is_ascii_digit())
}

fn extract_expression(task: &str) -> Option<String> {
    if let Some(caps) = calc_keyword_re().captures(task) {
        let expr = caps[1].trim();
        if is_expression(expr) {
            return Some(expr.to_string());
        }
    }
    arithmetic_re()
        .find_iter(task)
        .map(|m| m.as_str().trim())
        .find(|m| is_expression(m))
        .map(str::to_string)
}

/// 编号列表或顺序连接词
fn is_multi_step(task: &str) -> bool {
    numbered_re().is_match(task) || sequence_re().is_match(task)
}

fn clean_part(part: &str) -> &str {
    let part = part.trim().trim_end_matches(|c: char| c == ',' || c == ';').trim_end();
    let cut = part.len().saturating_sub(4);
    match part.get(cut..) {
        Some(tail) if tail.eq_ignore_ascii_case(" and") => part[..cut].trim_end(),
        _ => part,
    }
}

fn split_parts(task: &str) -> Vec<&str> {
    let parts: Vec<&str> = if numbered_re().is_match(task) {
        // 第一个编号之前的引导语不构成步骤
        numbered_re().split(task).skip(1).collect()
    } else {
        sequence_re().split(task).collect()
    };
    parts
        .into_iter()
        .map(clean_part)
        .filter(|p| !p.is_empty())
        .collect()
}

/// 产出步骤的工具 → 后续步骤引用的上下文键
fn produced_key(tool: &str) -> Option<&'static str> {
    match tool {
        "calculate" => Some("calculation_result"),
        "file_read" => Some("content"),
        "api_call" => Some("api_response"),
        "web_search" => Some("search_results"),
        _ => None,
    }
}

/// 单段任务的识别结果（局部 id 从 0 开始）
fn single_pass(task: &str) -> Vec<Step> {
    let lower = task.to_lowercase();
    let mut steps: Vec<Step> = Vec::new();

    if matches_any(&lower, READ_WORDS) && !matches_any(&lower, &["write", "save"]) {
        if let Some(path) = extract_file_path(task) {
            steps.push(
                Step::new(steps.len(), format!("Read file: {path}"), "file_read")
                    .with_param("file_path", path),
            );
        }
    }

    if matches_any(&lower, LIST_WORDS) {
        let directory = extract_directory(task).unwrap_or_else(|| ".".to_string());
        steps.push(
            Step::new(steps.len(), format!("List files in: {directory}"), "file_list")
                .with_param("directory", directory),
        );
    }

    if matches_any(&lower, API_WORDS) {
        let url = extract_url(task).unwrap_or_else(|| infer_api_endpoint(&lower).to_string());
        let method = extract_http_method(task).unwrap_or_else(|| "GET".to_string());
        steps.push(
            Step::new(steps.len(), format!("Make API call: {method} {url}"), "api_call")
                .with_param("url", url)
                .with_param("method", method),
        );
    }

    if matches_any(&lower, SEARCH_WORDS) {
        let query = extract_search_query(task);
        steps.push(
            Step::new(steps.len(), format!("Search for: {query}"), "web_search")
                .with_param("query", query),
        );
    }

    if matches_any(&lower, CALC_WORDS) {
        if let Some(expression) = extract_expression(task) {
            steps.push(
                Step::new(steps.len(), format!("Calculate: {expression}"), "calculate")
                    .with_param("expression", expression),
            );
        }
    }

    // 写文件放在本段最后，依赖本段内的产出步骤
    if matches_any(&lower, WRITE_WORDS) && !matches_any(&lower, &["read"]) {
        let path = extract_file_path(task).unwrap_or_else(|| infer_file_path(&lower).to_string());
        let content = extract_content(task).unwrap_or_default();
        let producers: Vec<StepId> = steps
            .iter()
            .filter(|s| produced_key(&s.tool).is_some())
            .map(|s| s.id)
            .collect();
        steps.push(
            Step::new(steps.len(), format!("Write to file: {path}"), "file_write")
                .with_param("file_path", path)
                .with_param("content", content)
                .depends_on(producers),
        );
    }

    steps
}

/// 兜底步骤
fn generic_step(task: &str) -> Step {
    let lower = task.to_lowercase();
    let description = format!("Process task: {task}");
    if lower.contains("file") {
        Step::new(0, description, "file_list").with_param("directory", ".")
    } else if ["data", "information", "get"].iter().any(|w| lower.contains(w)) {
        Step::new(0, description, "web_search").with_param("query", task)
    } else {
        let text: String = task
            .chars()
            .filter(|c| !matches!(*c, '\'' | '"' | '`' | '$' | '\\' | ';' | '&' | '|' | '<' | '>'))
            .collect();
        Step::new(0, description, "system_command").with_param("command", format!("echo '{text}'"))
    }
}

/// 空内容的写步骤接到它之前最近的产出步骤
fn wire_write_content(steps: &mut [Step]) {
    let mut last_key: Option<(StepId, &'static str)> = None;
    for step in steps.iter_mut() {
        if step.tool == "file_write" {
            let empty = step
                .parameters
                .get("content")
                .and_then(|v| v.as_str())
                .is_some_and(str::is_empty);
            if let (true, Some((producer, key))) = (empty, last_key) {
                step.parameters
                    .insert("content".into(), format!("{{{{{key}}}}}").into());
                step.dependencies.insert(producer);
            }
        }
        if let Some(key) = produced_key(&step.tool) {
            last_key = Some((step.id, key));
        }
    }
}

/// 按关键词把任务映射为工具步骤
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordPolicy;

impl KeywordPolicy {
    pub fn new() -> Self {
        Self
    }

    fn decompose_task(&self, task: &str) -> Vec<Step> {
        let task = task.trim();
        let mut steps: Vec<Step> = Vec::new();

        if is_multi_step(task) {
            let parts = split_parts(task);
            if parts.len() > 1 {
                for part in parts {
                    let earlier: Vec<StepId> = steps.iter().map(|s| s.id).collect();
                    let offset = steps.len();
                    for mut sub in single_pass(part) {
                        sub.id += offset;
                        sub.dependencies = sub
                            .dependencies
                            .iter()
                            .map(|d| d + offset)
                            .chain(earlier.iter().copied())
                            .collect();
                        steps.push(sub);
                    }
                }
            }
        }

        if steps.is_empty() {
            steps = single_pass(task);
        }
        if steps.is_empty() {
            steps.push(generic_step(task));
        }

        wire_write_content(&mut steps);
        steps
    }
}

impl DecompositionPolicy for KeywordPolicy {
    fn decompose(&self, task: &str, _context: &ExecutionContext) -> Vec<Step> {
        self.decompose_task(task)
    }

    /// API 调用失败时改用搜索
    fn alternative(&self, failed: &Step) -> Option<Step> {
        (failed.tool == "api_call").then(|| {
            Step::new(
                0,
                format!("Alternative approach for: {}", failed.description),
                "web_search",
            )
            .with_param("query", failed.description.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan(task: &str) -> Vec<Step> {
        KeywordPolicy::new().decompose(task, &ExecutionContext::new())
    }

    fn tools(steps: &[Step]) -> Vec<&str> {
        steps.iter().map(|s| s.tool.as_str()).collect()
    }

    fn deps(step: &Step) -> Vec<StepId> {
        step.dependencies.iter().copied().collect()
    }

    #[test]
    fn test_read_file() {
        let steps = plan("Read \"notes.txt\"");
        assert_eq!(tools(&steps), vec!["file_read"]);
        assert_eq!(steps[0].parameters["file_path"], json!("notes.txt"));
    }

    #[test]
    fn test_list_directory() {
        let steps = plan("List files in 'src'");
        assert_eq!(tools(&steps), vec!["file_list"]);
        assert_eq!(steps[0].parameters["directory"], json!("src"));
    }

    #[test]
    fn test_api_call_with_url_and_method() {
        let steps = plan("Fetch https://api.example.com/items with POST");
        assert_eq!(tools(&steps), vec!["api_call"]);
        assert_eq!(steps[0].parameters["url"], json!("https://api.example.com/items"));
        assert_eq!(steps[0].parameters["method"], json!("POST"));
    }

    #[test]
    fn test_api_call_inferred_endpoint() {
        let steps = plan("fetch the weather");
        assert_eq!(
            steps[0].parameters["url"],
            json!("https://api.openweathermap.org/data/2.5/weather")
        );
        assert_eq!(steps[0].parameters["method"], json!("GET"));
    }

    #[test]
    fn test_search_query_prefix_stripped() {
        let steps = plan("search for rust async runtimes");
        assert_eq!(tools(&steps), vec!["web_search"]);
        assert_eq!(steps[0].parameters["query"], json!("rust async runtimes"));
    }

    #[test]
    fn test_calculate_expression() {
        let steps = plan("Calculate (2 + 3) * 4");
        assert_eq!(tools(&steps), vec!["calculate"]);
        assert_eq!(steps[0].parameters["expression"], json!("(2 + 3) * 4"));
    }

    #[test]
    fn test_write_with_explicit_content() {
        let steps = plan("Write a file \"hello.txt\" containing 'hi there'");
        assert_eq!(tools(&steps), vec!["file_write"]);
        assert_eq!(steps[0].parameters["file_path"], json!("hello.txt"));
        assert_eq!(steps[0].parameters["content"], json!("hi there"));
    }

    #[test]
    fn test_write_infers_path() {
        let steps = plan("save the report");
        assert_eq!(steps[0].parameters["file_path"], json!("report.txt"));
    }

    #[test]
    fn test_multi_step_wires_calculation_into_write() {
        let steps = plan("Calculate 6 * 7 then save the result to \"answer.txt\"");
        assert_eq!(tools(&steps), vec!["calculate", "file_write"]);
        assert_eq!(steps[1].parameters["content"], json!("{{calculation_result}}"));
        assert_eq!(deps(&steps[1]), vec![0]);
    }

    #[test]
    fn test_numbered_list_later_parts_depend_on_earlier() {
        let steps = plan("1. Read \"a.txt\" 2. search for rust 3. Write \"b.txt\"");
        assert_eq!(tools(&steps), vec!["file_read", "web_search", "file_write"]);
        assert_eq!(deps(&steps[1]), vec![0]);
        assert_eq!(deps(&steps[2]), vec![0, 1]);
        assert_eq!(steps[2].parameters["content"], json!("{{search_results}}"));
    }

    #[test]
    fn test_ids_dense_and_dependencies_earlier() {
        let steps = plan("read \"in.txt\" and then calculate 1 + 1 after that write \"out.txt\"");
        for (i, step) in steps.iter().enumerate() {
            assert_eq!(step.id, i);
            assert!(step.dependencies.iter().all(|&d| d < i));
        }
    }

    #[test]
    fn test_fallback_never_empty() {
        let steps = plan("hello world");
        assert_eq!(tools(&steps), vec!["system_command"]);
        assert_eq!(steps[0].parameters["command"], json!("echo 'hello world'"));

        assert_eq!(tools(&plan("tidy the file")), vec!["file_list"]);
        assert_eq!(tools(&plan("")), vec!["system_command"]);
    }

    #[test]
    fn test_fallback_strips_shell_metacharacters() {
        let steps = plan("say hi; ls && pwd");
        assert_eq!(steps[0].parameters["command"], json!("echo 'say hi ls  pwd'"));
    }

    #[test]
    fn test_alternative_for_api_call_only() {
        let policy = KeywordPolicy::new();
        let api = Step::new(3, "Make API call: GET https://x", "api_call");
        let alt = policy.alternative(&api).unwrap();
        assert_eq!(alt.tool, "web_search");
        assert_eq!(alt.parameters["query"], json!("Make API call: GET https://x"));
        assert!(policy.alternative(&Step::new(0, "calc", "calculate")).is_none());
    }
}
