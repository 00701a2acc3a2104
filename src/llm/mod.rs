//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Null / Mock / 熔断包装）

pub mod deepseek;
pub mod guarded;
pub mod mock;
pub mod openai;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use guarded::GuardedLlmClient;
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, NullLlmClient};
