//! 工具 trait
//!
//! Agent 可持有一个外部工具（PubMed 检索、网页读取）；工具先执行，结果再交给 LLM 整理。

use async_trait::async_trait;
use serde_json::{json, Value};

/// 工具 trait：名称、描述、从自然语言指令构造参数、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 从 Agent 收到的指令中提取工具参数；默认整条指令作为 query
    fn args_from_instruction(&self, instruction: &str) -> Value {
        json!({ "query": instruction.trim() })
    }

    /// 执行工具，返回文本（通常为 JSON 字符串）
    async fn execute(&self, args: Value) -> Result<String, String>;
}
