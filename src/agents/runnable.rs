//! Agent 统一能力接口
//!
//! 每个 Agent 只需实现 run(instruction)：接收一条自然语言指令，返回结构化值或文本。

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;

/// Agent 回复
#[derive(Debug, Clone, PartialEq)]
pub enum AgentResponse {
    /// 已结构化的输出（通常是 JSON 对象）
    Structured(Value),
    /// 自由文本，执行器会尝试从中提取 JSON 对象
    Text(String),
}

#[async_trait]
pub trait Runnable: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, instruction: &str) -> Result<AgentResponse, AgentError>;
}
