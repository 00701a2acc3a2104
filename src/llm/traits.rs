//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Null / Mock）实现 LlmClient。
//! Planner 与 Synthesizer 通过构造函数注入客户端；is_configured() 为 false 时直接走确定性回退。

use async_trait::async_trait;

use crate::core::LlmError;
use crate::memory::Message;

/// LLM 客户端 trait：system + user 消息对的非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 是否有可用的后端；NullLlmClient 返回 false
    fn is_configured(&self) -> bool {
        true
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 无后端时的空对象：永远返回 NotConfigured，保证回退路径无需改环境变量即可测试
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLlmClient;

#[async_trait]
impl LlmClient for NullLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
        Err(LlmError::NotConfigured)
    }

    fn is_configured(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_client_never_configured() {
        let client = NullLlmClient;
        assert!(!client.is_configured());
        let err = client.complete(&[Message::user("hi")]).await.unwrap_err();
        assert_eq!(err, LlmError::NotConfigured);
    }
}
