//! 核心编排层：错误类型、熔断器、主控编排器

pub mod circuit_breaker;
pub mod error;
pub mod orchestrator;

pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
    SERVICE_UNAVAILABLE,
};
pub use error::{AgentError, LlmError, PipelineError};
pub use orchestrator::{create_llm_from_config, open_store, Orchestrator, TurnResponse};
