//! 编排器：一轮对话的入口
//!
//! process_message：记录用户消息 → 规划 → 执行 → 综合 → 记录回复 → 生成建议。
//! 空计划直接返回澄清提示；轮内任何意外错误都被记录并转成道歉回复，从不向调用方返回错误。

use std::sync::Arc;

use serde::Serialize;

use crate::agents::{build_default_registry, AgentRegistry};
use crate::config::AppConfig;
use crate::core::{CircuitBreaker, PipelineError};
use crate::llm::{create_deepseek_client, GuardedLlmClient, LlmClient, NullLlmClient, OpenAiClient};
use crate::memory::{ConversationContext, ConversationStore, Role};
use crate::pipeline::suggestions::static_suggestions;
use crate::pipeline::{execute_plan, suggest, Planner, Synthesizer, Task};

pub const CLARIFICATION: &str = "I'm not sure what you'd like me to do. Could you describe your research topic, \
or ask for something specific such as a PICOT question, a literature search, a sample size calculation or your next deadline?";

pub const APOLOGY: &str =
    "Sorry, something went wrong while handling your request. Please try again.";

/// 一轮对话的结果
#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub text: String,
    pub suggestions: Vec<String>,
    /// 本轮执行的计划（澄清 / 出错时为空）
    pub plan: Vec<Task>,
}

pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    planner: Planner,
    synthesizer: Synthesizer,
    registry: Arc<AgentRegistry>,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<AgentRegistry>) -> Self {
        Self {
            planner: Planner::new(llm.clone(), &registry),
            synthesizer: Synthesizer::new(llm.clone()),
            llm,
            registry,
        }
    }

    /// 按配置组装：默认注册表 + 规划 / 综合参数
    pub fn from_config(
        cfg: &AppConfig,
        llm: Arc<dyn LlmClient>,
        store: Option<Arc<ConversationStore>>,
        project: &str,
    ) -> Self {
        let registry = Arc::new(build_default_registry(cfg, llm.clone(), store, project));
        Self {
            planner: Planner::new(llm.clone(), &registry)
                .with_history(cfg.planner.history_turns, cfg.planner.history_chars),
            synthesizer: Synthesizer::new(llm.clone())
                .with_max_output_chars(cfg.synthesis.max_output_chars),
            llm,
            registry,
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub async fn process_message(&self, context: &mut ConversationContext, message: &str) -> TurnResponse {
        match self.run_turn(context, message).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, project = %context.project_name, "turn failed");
                TurnResponse {
                    text: APOLOGY.to_string(),
                    suggestions: static_suggestions(),
                    plan: Vec::new(),
                }
            }
        }
    }

    async fn run_turn(
        &self,
        context: &mut ConversationContext,
        message: &str,
    ) -> Result<TurnResponse, PipelineError> {
        let message = message.trim();
        context.add_message(Role::User, message)?;

        let plan = self.planner.create_plan(message, context).await;
        if plan.is_empty() {
            tracing::info!("empty plan, asking for clarification");
            context.add_message(Role::Assistant, CLARIFICATION)?;
            return Ok(TurnResponse {
                text: CLARIFICATION.to_string(),
                suggestions: static_suggestions(),
                plan,
            });
        }

        let results = execute_plan(&plan, context, &self.registry).await;
        let text = self
            .synthesizer
            .synthesize(message, &plan, &results, context)
            .await;
        context.add_message(Role::Assistant, text.clone())?;

        let suggestions = suggest(context, &plan);
        let (prompt_tokens, completion_tokens, total_tokens) = self.llm.token_usage();
        tracing::info!(
            tasks = plan.len(),
            failed = results.iter().filter(|(_, r)| !r.success).count(),
            prompt_tokens,
            completion_tokens,
            total_tokens,
            "turn completed"
        );
        Ok(TurnResponse {
            text,
            suggestions,
            plan,
        })
    }
}

/// 根据配置与环境变量选择 LLM 后端；无 Key 或 provider = none 时返回 NullLlmClient
///
/// 真实后端统一包一层 llm 熔断器。
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = cfg.llm.timeouts.request;
    let deepseek_key = std::env::var("DEEPSEEK_API_KEY").ok();
    let openai_key = std::env::var("OPENAI_API_KEY").ok();

    let inner: Arc<dyn LlmClient> = match provider.as_str() {
        "none" => {
            tracing::info!("LLM disabled by config, using deterministic fallbacks");
            return Arc::new(NullLlmClient);
        }
        "deepseek" => match deepseek_api_key(deepseek_key, openai_key) {
            Some(key) => {
                let client = create_deepseek_client(&key, cfg.llm.model.as_deref(), timeout);
                tracing::info!("Using DeepSeek LLM ({})", client.model());
                Arc::new(client)
            }
            None => {
                tracing::warn!("No API key set, using deterministic fallbacks");
                return Arc::new(NullLlmClient);
            }
        },
        "openai" => match openai_key {
            Some(key) => {
                let model = cfg.llm.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
                tracing::info!("Using OpenAI LLM ({})", model);
                Arc::new(OpenAiClient::new(cfg.llm.base_url.as_deref(), &model, &key, timeout))
            }
            None => {
                tracing::warn!("OPENAI_API_KEY not set, using deterministic fallbacks");
                return Arc::new(NullLlmClient);
            }
        },
        other => {
            tracing::warn!(provider = %other, "unknown LLM provider, using deterministic fallbacks");
            return Arc::new(NullLlmClient);
        }
    };

    Arc::new(GuardedLlmClient::new(
        inner,
        CircuitBreaker::new("llm", cfg.breakers.llm.to_breaker_config()),
    ))
}

/// DeepSeek 后端使用的 Key：优先 DEEPSEEK_API_KEY，缺失时退到 OPENAI_API_KEY 并告警
fn deepseek_api_key(deepseek: Option<String>, openai: Option<String>) -> Option<String> {
    deepseek.or_else(|| {
        openai.inspect(|_| {
            tracing::warn!("DEEPSEEK_API_KEY not set, sending OPENAI_API_KEY to the DeepSeek endpoint")
        })
    })
}

/// 配置了 db_path 时打开 SQLite store
pub fn open_store(cfg: &AppConfig) -> Result<Option<Arc<ConversationStore>>, PipelineError> {
    match &cfg.app.db_path {
        Some(path) => {
            let store = ConversationStore::open(path)?;
            tracing::info!(path = %path.display(), "conversation store opened");
            Ok(Some(Arc::new(store)))
        }
        None => Ok(None),
    }
}
