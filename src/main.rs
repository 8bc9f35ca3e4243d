//! Agentic - 命令行入口
//!
//! 用法：`agentic "<task>"`。加载配置、构建 Agent、执行任务，以 JSON 输出结果；成功退出码 0，否则 1。

use agentic::core::create_agent_builder;
use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    agentic::observability::init();

    let task = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if task.trim().is_empty() {
        anyhow::bail!("usage: agentic \"<task>\"");
    }

    let mut agent = create_agent_builder(None).build();
    let outcome = agent.run(&task, None).await;

    let json = serde_json::to_string_pretty(&outcome).context("Failed to serialize run outcome")?;
    println!("{json}");

    if !outcome.success {
        std::process::exit(1);
    }
    Ok(())
}
