//! 带熔断保护的 LLM 客户端
//!
//! 包装任意 LlmClient：连续失败达到阈值后直接返回错误（不再请求远端），
//! Planner / Synthesizer 随即走各自的确定性回退。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{CircuitBreaker, CircuitBreakerError, LlmError};
use crate::llm::LlmClient;
use crate::memory::Message;

pub struct GuardedLlmClient {
    inner: Arc<dyn LlmClient>,
    breaker: CircuitBreaker,
}

impl GuardedLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, breaker: CircuitBreaker) -> Self {
        Self { inner, breaker }
    }
}

#[async_trait]
impl LlmClient for GuardedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        match self.breaker.execute(|| self.inner.complete(messages)).await {
            Ok(content) => Ok(content),
            Err(CircuitBreakerError::Open(name)) => {
                let snapshot = self.breaker.snapshot();
                tracing::warn!(
                    breaker = %snapshot.name,
                    failures = snapshot.failure_count,
                    opened_at = ?snapshot.opened_at,
                    "LLM call skipped, circuit open"
                );
                Err(LlmError::Api(format!("{name} {}", crate::core::SERVICE_UNAVAILABLE)))
            }
            Err(CircuitBreakerError::Failed(e)) => Err(e),
        }
    }

    fn is_configured(&self) -> bool {
        self.inner.is_configured()
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
