//! Synthesizer：把各任务结果汇总成一段回复
//!
//! - 全部失败：固定模板列出每个错误与重试建议，不调用 LLM
//! - 主路径：LLM 依据计划与各任务输出（每个截断到 max_output_chars）写总结
//! - 回退：拼接成功任务的 text 字段，以 `---` 分隔

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::core::PipelineError;
use crate::llm::LlmClient;
use crate::memory::{ConversationContext, Message};
use crate::pipeline::{PlanResults, Task};

pub const TRUNCATION_MARKER: &str = "...[truncated]";

pub const COULD_NOT_COMPLETE: &str =
    "I couldn't complete your request this time. Please try rephrasing it or ask about a specific step.";

const SYNTHESIS_SYSTEM: &str = "You are a research assistant summarising the results of several tool-using agents. \
Summarise faithfully and concisely. Use only the facts present in the task outputs; \
do not invent citations, PMIDs, statistics or authors. If a step returned nothing useful, say so briefly.";

/// 按字符截断并追加标记
pub fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// 全部任务失败时的回复
pub fn failure_summary(plan: &[Task], results: &PlanResults) -> String {
    let mut lines = vec!["I wasn't able to complete any step of your request:".to_string()];
    for (task_id, result) in results.iter() {
        let label = plan
            .iter()
            .find(|t| t.task_id == task_id)
            .map(|t| format!("{}.{}", t.agent_name, t.action))
            .unwrap_or_else(|| format!("{}.{}", result.agent, result.action));
        lines.push(format!(
            "- {task_id} ({label}): {}",
            result.error.as_deref().unwrap_or("unknown error")
        ));
    }
    lines.push(String::new());
    lines.push(
        "Please try again in a moment. External services may be temporarily unavailable; \
         you can also rephrase the request or narrow the topic."
            .to_string(),
    );
    lines.join("\n")
}

fn output_text(output: &Map<String, Value>) -> String {
    match output.get("text") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        _ => serde_json::to_string_pretty(output).unwrap_or_default(),
    }
}

/// 不依赖 LLM 的回退总结
pub fn fallback_summary(results: &PlanResults) -> String {
    let parts: Vec<String> = results
        .successes()
        .filter_map(|(_, r)| r.output.as_ref())
        .map(output_text)
        .filter(|t| !t.trim().is_empty())
        .collect();
    if parts.is_empty() {
        COULD_NOT_COMPLETE.to_string()
    } else {
        parts.join("\n\n---\n\n")
    }
}

pub struct Synthesizer {
    llm: Arc<dyn LlmClient>,
    max_output_chars: usize,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            max_output_chars: 2000,
        }
    }

    pub fn with_max_output_chars(mut self, max_output_chars: usize) -> Self {
        self.max_output_chars = max_output_chars;
        self
    }

    fn user_payload(&self, user_message: &str, plan: &[Task], results: &PlanResults) -> String {
        let mut payload = format!("User request: {user_message}\n\nPlan:\n");
        for task in plan {
            payload.push_str(&format!("- {task}\n"));
        }
        payload.push_str("\nResults:\n");
        for (task_id, result) in results.iter() {
            match (&result.output, &result.error) {
                (Some(output), _) if result.success => {
                    let json = serde_json::to_string(output).unwrap_or_default();
                    payload.push_str(&format!(
                        "### {task_id} ({}.{})\n{}\n\n",
                        result.agent,
                        result.action,
                        truncate_with_marker(&json, self.max_output_chars)
                    ));
                }
                (_, error) => payload.push_str(&format!(
                    "### {task_id} ({}.{}) failed: {}\n\n",
                    result.agent,
                    result.action,
                    error.as_deref().unwrap_or("unknown error")
                )),
            }
        }
        payload
    }

    /// LLM 总结；空回复视为失败
    pub async fn llm_summary(
        &self,
        user_message: &str,
        plan: &[Task],
        results: &PlanResults,
        context: &ConversationContext,
    ) -> Result<String, PipelineError> {
        let system = format!(
            "{SYNTHESIS_SYSTEM}\nProject: {} (phase: {}).",
            context.project_name, context.current_phase
        );
        let messages = [
            Message::system(system),
            Message::user(self.user_payload(user_message, plan, results)),
        ];
        let reply = self.llm.complete(&messages).await?;
        if reply.trim().is_empty() {
            return Err(PipelineError::Synthesis("empty LLM reply".to_string()));
        }
        Ok(reply)
    }

    /// 生成最终回复，永不失败
    pub async fn synthesize(
        &self,
        user_message: &str,
        plan: &[Task],
        results: &PlanResults,
        context: &ConversationContext,
    ) -> String {
        if results.all_failed() {
            tracing::warn!(tasks = results.len(), "all tasks failed");
            return failure_summary(plan, results);
        }
        if !self.llm.is_configured() {
            return fallback_summary(results);
        }
        match self.llm_summary(user_message, plan, results, context).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "LLM synthesis failed, concatenating task outputs");
                fallback_summary(results)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LlmError;
    use crate::llm::{MockLlmClient, NullLlmClient};
    use crate::pipeline::ExecutionResult;
    use serde_json::json;

    fn output(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("object expected"),
        }
    }

    fn mixed_results() -> (Vec<Task>, PlanResults) {
        let plan = vec![
            Task::new("task_1", "research_question", "generate_picot"),
            Task::new("task_2", "literature_search", "search_pubmed"),
        ];
        let mut results = PlanResults::new();
        results.insert(
            "task_1",
            ExecutionResult::failed("research_question", "generate_picot", "LLM not configured"),
        );
        results.insert(
            "task_2",
            ExecutionResult::succeeded(
                "literature_search",
                "search_pubmed",
                output(json!({"text": "Found 3 articles", "count": 3})),
            ),
        );
        (plan, results)
    }

    #[tokio::test]
    async fn test_all_failed_lists_errors_without_llm() {
        let llm = Arc::new(MockLlmClient::new());
        let plan = vec![Task::new("task_1", "project_timeline", "get_milestones")];
        let mut results = PlanResults::new();
        results.insert(
            "task_1",
            ExecutionResult::failed("project_timeline", "get_milestones", "database locked"),
        );
        let text = Synthesizer::new(llm.clone())
            .synthesize("deadline?", &plan, &results, &ConversationContext::new("p"))
            .await;
        assert!(text.contains("database locked"));
        assert!(text.contains("task_1"));
        assert!(text.contains("try again"));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fallback_joins_text_fields() {
        let (plan, mut results) = mixed_results();
        results.insert(
            "task_3",
            ExecutionResult::succeeded("x", "y", output(json!({"text": "Second part"}))),
        );
        let text = Synthesizer::new(Arc::new(NullLlmClient))
            .synthesize("q", &plan, &results, &ConversationContext::new("p"))
            .await;
        assert_eq!(text, "Found 3 articles\n\n---\n\nSecond part");
    }

    #[tokio::test]
    async fn test_llm_reply_returned_verbatim() {
        let llm = Arc::new(MockLlmClient::with_responses(["Summary of 3 articles."]));
        let (plan, results) = mixed_results();
        let text = Synthesizer::new(llm.clone())
            .synthesize("q", &plan, &results, &ConversationContext::new("p"))
            .await;
        assert_eq!(text, "Summary of 3 articles.");
        let payload = &llm.received()[0][1].content;
        assert!(payload.contains("Found 3 articles"));
        assert!(payload.contains("failed: LLM not configured"));
    }

    #[tokio::test]
    async fn test_llm_error_and_empty_reply_fall_back() {
        let llm = Arc::new(MockLlmClient::new());
        llm.push_response(Err(LlmError::Timeout(60)));
        llm.push_response(Ok("   ".to_string()));
        let (plan, results) = mixed_results();
        let synth = Synthesizer::new(llm);
        let ctx = ConversationContext::new("p");
        assert_eq!(synth.synthesize("q", &plan, &results, &ctx).await, "Found 3 articles");
        assert_eq!(synth.synthesize("q", &plan, &results, &ctx).await, "Found 3 articles");
    }

    #[test]
    fn test_payload_truncates_large_outputs() {
        let mut results = PlanResults::new();
        results.insert(
            "task_1",
            ExecutionResult::succeeded("a", "b", output(json!({"text": "z".repeat(5000)}))),
        );
        let payload = Synthesizer::new(Arc::new(NullLlmClient)).user_payload("q", &[], &results);
        assert!(payload.contains(TRUNCATION_MARKER));
        assert!(!payload.contains(&"z".repeat(2001)));
    }

    #[test]
    fn test_nothing_succeeded_gives_could_not_complete() {
        assert_eq!(fallback_summary(&PlanResults::new()), COULD_NOT_COMPLETE);
    }
}
