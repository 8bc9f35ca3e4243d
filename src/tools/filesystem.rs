//! 沙箱文件系统工具
//!
//! SafeFs 绑定 root_dir，所有路径必须是根下的相对路径（禁止绝对路径与 ../ 逃逸），
//! 且 canonicalize 后仍在根下（禁止符号链接逃逸）；
//! FileReadTool / FileWriteTool / FileListTool 基于 SafeFs 提供 file_read / file_write / file_list。
//! 失败结果带上 file_path / directory，供重试前写入上下文。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::core::AgentError;
use crate::tools::registry::{optional_str, required_str, Params, Tool, ToolError};

/// 沙箱文件系统：绑定根目录，校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 词法校验：只接受根下的相对路径
    fn join_checked(&self, path: &str) -> Result<PathBuf, AgentError> {
        let path = path.trim();
        if path.is_empty() {
            return Err(AgentError::InvalidParameter(
                "path".to_string(),
                "empty path".to_string(),
            ));
        }
        let rel = Path::new(path);
        let escapes = rel.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(AgentError::PathEscape(path.to_string())); // 如 ../../etc/passwd
        }
        Ok(self.root_dir.join(rel))
    }

    /// 解析已存在的路径；canonicalize 后再次确认在根下（防符号链接逃逸）
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let full = self.join_checked(path)?;
        let canonical = full
            .canonicalize()
            .map_err(|_| AgentError::ToolExecutionFailed(format!("Path not found: {path}")))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(AgentError::PathEscape(path.to_string()))
        }
    }

    /// 解析待写入的路径（文件可以尚不存在）
    ///
    /// 取最深的已存在祖先（含悬空链接）做 canonicalize，确认在根下后再拼回其余部分；
    /// 其余部分尚不存在，会作为普通目录 / 文件创建。
    pub fn resolve_for_write(&self, path: &str) -> Result<PathBuf, AgentError> {
        let full = self.join_checked(path)?;
        let existing = full
            .ancestors()
            .find(|p| p.symlink_metadata().is_ok())
            .unwrap_or(self.root_dir.as_path());
        let canonical = existing
            .canonicalize()
            .map_err(|_| AgentError::PathEscape(path.to_string()))?;
        if !canonical.starts_with(&self.root_dir) {
            return Err(AgentError::PathEscape(path.to_string()));
        }
        let rest = full.strip_prefix(existing).unwrap_or(Path::new(""));
        Ok(canonical.join(rest))
    }

    /// 相对根目录的展示路径
    fn display(&self, path: &Path) -> String {
        path.strip_prefix(&self.root_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }
}

/// file_read：读取文件内容
pub struct FileReadTool {
    fs: SafeFs,
}

impl FileReadTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }

    async fn read(&self, file_path: &str) -> Result<String, ToolError> {
        let resolved = self.fs.resolve(file_path)?;
        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| format!("Read failed: {e}"))?;
        Ok(content)
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read content from a file. Parameters: file_path (str)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "File path relative to workspace"}
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, params: Params) -> Result<Params, ToolError> {
        let file_path = required_str(&params, "file_path")?;
        tracing::info!(path = %file_path, "file_read tool execute");
        let content = self
            .read(file_path)
            .await
            .map_err(|e| e.with_field("file_path", file_path))?;

        let mut out = Params::new();
        out.insert("content".into(), json!(content));
        out.insert("file_path".into(), json!(file_path));
        Ok(out)
    }
}

/// file_write：写入文件，自动创建父目录
pub struct FileWriteTool {
    fs: SafeFs,
}

impl FileWriteTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }

    async fn write(&self, file_path: &str, content: &str) -> Result<(), ToolError> {
        let target = self.fs.resolve_for_write(file_path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Create dir failed: {e}"))?;
        }
        tokio::fs::write(&target, content.as_bytes())
            .await
            .map_err(|e| format!("Write failed: {e}"))?;
        Ok(())
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a file. Parameters: file_path (str), content (str)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "File path relative to workspace"},
                "content": {"type": "string", "description": "Text to write"}
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(&self, params: Params) -> Result<Params, ToolError> {
        let file_path = required_str(&params, "file_path")?;
        // 非字符串内容（如上一步的数值结果）按 JSON 文本写入
        let content = match params.get("content") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => {
                return Err(ToolError::from(AgentError::InvalidParameter(
                    "content".to_string(),
                    "missing".to_string(),
                ))
                .with_field("file_path", file_path))
            }
            Some(other) => other.to_string(),
        };
        tracing::info!(path = %file_path, bytes = content.len(), "file_write tool execute");

        self.write(file_path, &content)
            .await
            .map_err(|e| e.with_field("file_path", file_path))?;

        let mut out = Params::new();
        out.insert("file_path".into(), json!(file_path));
        out.insert("bytes_written".into(), json!(content.len()));
        Ok(out)
    }
}

/// file_list：列出目录，可递归、可按 glob 过滤文件名
pub struct FileListTool {
    fs: SafeFs,
}

impl FileListTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }

    async fn list(
        &self,
        directory: &str,
        recursive: bool,
        pattern: Option<glob::Pattern>,
    ) -> Result<Vec<Value>, ToolError> {
        let base = if directory.is_empty() || directory == "." {
            self.fs.root().to_path_buf()
        } else {
            self.fs.resolve(directory)?
        };
        if !base.is_dir() {
            return Err(format!("Not a directory: {directory}").into());
        }

        // 目录遍历是阻塞 IO，在阻塞线程池中执行
        let fs = self.fs.clone();
        tokio::task::spawn_blocking(move || walk(&fs, &base, recursive, pattern.as_ref()))
            .await
            .map_err(|e| format!("List failed: {e}"))?
    }
}

#[async_trait]
impl Tool for FileListTool {
    fn name(&self) -> &str {
        "file_list"
    }

    fn description(&self) -> &str {
        "List files in a directory. Parameters: directory (str, optional, default='.'), recursive (bool, optional), pattern (glob, optional)"
    }

    async fn execute(&self, params: Params) -> Result<Params, ToolError> {
        let directory = optional_str(&params, "directory", ".");
        let recursive = params
            .get("recursive")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let pattern = match params.get("pattern").and_then(|v| v.as_str()) {
            Some(p) => Some(glob::Pattern::new(p).map_err(|e| format!("Invalid pattern: {e}"))?),
            None => None,
        };
        tracing::info!(directory = %directory, recursive, "file_list tool execute");

        let files = self
            .list(directory, recursive, pattern)
            .await
            .map_err(|e| e.with_field("directory", directory))?;

        let mut out = Params::new();
        out.insert("directory".into(), json!(directory));
        out.insert("count".into(), json!(files.len()));
        out.insert("files".into(), Value::Array(files));
        Ok(out)
    }
}

fn walk(
    fs: &SafeFs,
    base: &Path,
    recursive: bool,
    pattern: Option<&glob::Pattern>,
) -> Result<Vec<Value>, ToolError> {
    let walker = WalkDir::new(base)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .sort_by_file_name();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| format!("List failed: {e}"))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(p) = pattern {
            if !p.matches(&name) {
                continue;
            }
        }
        let is_directory = entry.file_type().is_dir();
        let size = if entry.file_type().is_file() {
            entry.metadata().ok().map(|m| json!(m.len())).unwrap_or(Value::Null)
        } else {
            Value::Null
        };
        files.push(json!({
            "name": name,
            "path": fs.display(entry.path()),
            "is_directory": is_directory,
            "size": size,
        }));
    }
    Ok(files)
}
