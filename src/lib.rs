//! Rescope - 研究助理编排系统
//!
//! 模块划分：
//! - **agents**: 研究 Agent（PICOT、文献检索、引用校验、综合、网页阅读、样本量、时间线）与注册表
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、熔断器、编排器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Null / Mock）
//! - **memory**: 会话上下文与 SQLite 持久化
//! - **pipeline**: 规划 → 执行 → 综合 流水线
//! - **router**: 查询意图分类
//! - **tools**: PubMed 检索、网页读取

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod pipeline;
pub mod router;
pub mod tools;

pub use crate::core::{Orchestrator, TurnResponse};
pub use memory::ConversationContext;
