//! system_command 工具：白名单命令，禁止危险操作
//!
//! 仅允许配置中的命令名（首词，如 ls、echo、date）；禁止 rm -rf、wget、chmod 777 等子串；
//! 执行通过 sh -c / cmd /C，带自身超时与 tracing 审计。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::tools::registry::{required_str, Params, Tool, ToolError};

/// 禁止的命令/子串（即使白名单中有同名，也不允许带这些参数）
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "rm -r",
    "wget ",
    "curl | sh",
    "chmod 777",
    "chmod +s",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    ":(){ :|:& };:", // fork bomb
];

/// 默认允许的命令
pub fn default_allowed_commands() -> Vec<String> {
    ["ls", "dir", "pwd", "echo", "date", "whoami"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// system_command 工具：仅允许白名单内命令
pub struct SystemCommandTool {
    allowed_commands: HashSet<String>,
    timeout: Duration,
}

impl SystemCommandTool {
    pub fn new(allowed_commands: Vec<String>, timeout_secs: u64) -> Self {
        let allowed_commands = allowed_commands
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect();
        Self {
            allowed_commands,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn is_allowed(&self, raw: &str) -> Result<(), String> {
        let raw_lower = raw.to_lowercase();
        for forbidden in FORBIDDEN_SUBSTR {
            if raw_lower.contains(forbidden) {
                return Err(format!("Forbidden pattern: {forbidden}"));
            }
        }
        let name = raw_lower.split_whitespace().next().unwrap_or("");
        if name.is_empty() {
            return Err("Empty command".to_string());
        }
        if self.allowed_commands.contains(name) {
            return Ok(());
        }
        let mut allowed: Vec<_> = self.allowed_commands.iter().cloned().collect();
        allowed.sort();
        Err(format!(
            "Command '{name}' not in safe list. Allowed: {allowed:?}"
        ))
    }
}

#[async_trait]
impl Tool for SystemCommandTool {
    fn name(&self) -> &str {
        "system_command"
    }

    fn description(&self) -> &str {
        "Execute a whitelisted system command. Parameters: command (str)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute (must be in allowlist)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: Params) -> Result<Params, ToolError> {
        let command = required_str(&params, "command")?.trim();
        self.is_allowed(command)?;

        tracing::info!(command = %command, "system_command tool execute");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| format!("Command timed out after {:?}", self.timeout))?
            .map_err(|e| format!("Execution failed: {e}"))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(format!("Exit {:?}\nstderr: {}", output.status.code(), stderr.trim()).into());
        }

        let mut out = Params::new();
        out.insert("command".into(), json!(command));
        out.insert("stdout".into(), json!(stdout));
        out.insert("stderr".into(), json!(stderr));
        out.insert("return_code".into(), json!(output.status.code()));
        Ok(out)
    }
}
