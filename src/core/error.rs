//! 错误类型
//!
//! 三层错误：LlmError（LLM 层）、AgentError（Agent / 工具）、PipelineError（编排核心）。
//! 每个组件只有一个 Result 边界，回退策略由 create_plan / synthesize / process_message 统一决定。

use std::path::PathBuf;

use thiserror::Error;

/// LLM 调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// 未配置 API Key 或显式关闭（NullLlmClient）
    #[error("LLM not configured")]
    NotConfigured,

    #[error("LLM API error: {0}")]
    Api(String),

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),

    #[error("LLM returned an empty response")]
    EmptyResponse,
}

/// Agent 与工具错误
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// 懒加载构造失败；错误只对该 agent 生效
    #[error("Agent '{name}' failed to initialize: {reason}")]
    InitFailed { name: String, reason: String },

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    #[error("Invalid instruction: {0}")]
    InvalidInstruction(String),
}

/// 编排核心错误
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("Cannot create database directory {}: {source}", path.display())]
    StoreDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl From<LlmError> for PipelineError {
    fn from(e: LlmError) -> Self {
        PipelineError::Agent(AgentError::Llm(e))
    }
}
