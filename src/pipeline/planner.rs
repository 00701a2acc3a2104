//! Planner：把用户消息变成有序任务列表
//!
//! 主路径请求 LLM 返回 `{"tasks": [...]}`；LLM 未配置、调用失败或回复无法解析时
//! 走确定性的关键词回退。create_plan 永不失败，空计划表示意图不明确。

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;

use crate::agents::{AgentRegistry, SampleSizeRequest};
use crate::core::PipelineError;
use crate::llm::LlmClient;
use crate::memory::{ConversationContext, Message, Role};
use crate::pipeline::extract::first_json_object_where;
use crate::pipeline::{Params, PlanDocument, Task};

pub const DEFAULT_AGENT: &str = "literature_search";
pub const DEFAULT_ACTION: &str = "search_pubmed";

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "about", "this", "that", "these", "those", "please", "more",
    "can", "you", "what", "whats", "what's", "how", "now", "then", "also", "again", "some",
    "any", "yes", "okay", "sure", "thanks", "thank", "continue", "next", "let", "lets", "let's",
    "find", "search", "look", "show", "tell", "give", "get", "other", "another", "same", "its",
    "does", "did", "ahead",
];

/// 有效词数：长度 ≥ 3 且不是停用词
fn meaningful_word_count(text: &str) -> usize {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .count()
}

/// 回退规划使用的主题：消息本身足够具体时用消息，否则用上一条用户消息
pub fn topic_for(message: &str, context: &ConversationContext) -> Option<String> {
    let message = message.trim();
    if meaningful_word_count(message) >= 3 {
        return Some(message.to_string());
    }
    let previous = context
        .prior_history(message)
        .iter()
        .rev()
        .find(|m| m.role == Role::User && !m.content.trim().is_empty())
        .map(|m| m.content.trim().to_string());
    match previous {
        Some(p) => Some(p),
        None if meaningful_word_count(message) > 0 => Some(message.to_string()),
        None => None,
    }
}

struct Families {
    timeline: Regex,
    sample_size: Regex,
    validate: Regex,
}

fn families() -> &'static Families {
    static F: OnceLock<Families> = OnceLock::new();
    F.get_or_init(|| Families {
        timeline: Regex::new(r"(?i)\b(timelines?|milestones?|deadlines?|schedules?)\b")
            .expect("valid regex"),
        sample_size: Regex::new(r"(?i)\b(sample[ -]size|power|statistical(ly)?|statistics)\b")
            .expect("valid regex"),
        validate: Regex::new(
            r"(?i)\b(validat(e|ion|ing)|retract(ed|ion|ions)?|verify\s+(the\s+)?citations?|check\s+(the\s+)?citations?)\b",
        )
        .expect("valid regex"),
    })
}

/// 确定性回退规划
pub fn fallback_plan(message: &str, context: &ConversationContext) -> Vec<Task> {
    let f = families();

    if f.timeline.is_match(message) {
        return vec![Task::new("task_1", "project_timeline", "get_milestones")
            .with_params(Params::new().with("project", context.project_name.clone()))];
    }

    let Some(topic) = topic_for(message, context) else {
        return Vec::new();
    };

    if f.sample_size.is_match(message) {
        let req = SampleSizeRequest::parse(message);
        return vec![Task::new("task_1", "data_analysis", "calculate_sample_size").with_params(
            Params::new()
                .with("design", req.design.as_str())
                .with("effect_size", req.effect_size)
                .with("alpha", req.alpha)
                .with("power", req.power)
                .with("topic", topic),
        )];
    }

    if f.validate.is_match(message) {
        return vec![Task::new("task_1", "citation_validator", "validate").with_params(
            Params::new()
                .with("citations", message.trim())
                .with("topic", topic),
        )];
    }

    vec![
        Task::new("task_1", "research_question", "generate_picot")
            .with_params(Params::new().with("topic", topic.clone())),
        Task::new("task_2", DEFAULT_AGENT, DEFAULT_ACTION)
            .with_params(
                Params::new()
                    .with("query", "<task_1.search_query>")
                    .with("topic", topic),
            )
            .depends_on("task_1"),
    ]
}

/// 解析 LLM 规划回复：取第一个含 `tasks` 数组的 JSON 对象，补齐缺省字段
pub fn parse_plan(reply: &str) -> Result<Vec<Task>, PipelineError> {
    let object = first_json_object_where(reply, |m| matches!(m.get("tasks"), Some(Value::Array(_))))
        .ok_or_else(|| PipelineError::Planning("no JSON object with a tasks array".to_string()))?;
    let document: PlanDocument = serde_json::from_value(Value::Object(object))
        .map_err(|e| PipelineError::Planning(format!("invalid plan: {e}")))?;

    Ok(document
        .tasks
        .into_iter()
        .enumerate()
        .map(|(i, spec)| Task {
            task_id: spec
                .task_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("task_{}", i + 1)),
            agent_name: spec
                .agent_name
                .filter(|a| !a.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_AGENT.to_string()),
            action: spec
                .action
                .filter(|a| !a.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ACTION.to_string()),
            params: Params::from_map(spec.params),
            depends_on: spec.depends_on,
        })
        .collect())
}

/// 引用了未知任务或排在自己之后的任务的占位符（按计划顺序执行时将无法解析）
pub fn unordered_references(plan: &[Task]) -> Vec<(String, String)> {
    let all: HashSet<&str> = plan.iter().map(|t| t.task_id.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut problems = Vec::new();
    for task in plan {
        let deps = task
            .params
            .references()
            .chain(task.depends_on.iter().map(String::as_str));
        for dep in deps {
            if !seen.contains(dep) {
                let kind = if all.contains(dep) { "forward" } else { "unknown" };
                problems.push((task.task_id.clone(), format!("{kind} reference to {dep}")));
            }
        }
        seen.insert(task.task_id.as_str());
    }
    problems
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    agents_description: String,
    history_turns: usize,
    history_chars: usize,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, registry: &AgentRegistry) -> Self {
        Self {
            llm,
            agents_description: registry.describe(),
            history_turns: 5,
            history_chars: 200,
        }
    }

    pub fn with_history(mut self, turns: usize, chars: usize) -> Self {
        self.history_turns = turns;
        self.history_chars = chars;
        self
    }

    pub fn system_prompt(&self) -> String {
        let schema = serde_json::to_string_pretty(&schemars::schema_for!(PlanDocument))
            .unwrap_or_default();
        format!(
            r#"You are the planner of a research assistant. Break the user's request into a short, ordered list of tasks for the agents below.

## Agents
{agents}

## Rules
- Respond with ONLY a JSON object of the form {{"tasks": [...]}} matching the schema below.
- Each task names one agent and one of its actions.
- A parameter may reference an earlier task's output as "<task_id.field>" (e.g. "<task_1.search_query>"). Only reference tasks listed earlier in the array, and add them to depends_on.
- If the request is vague (e.g. "search more", "go on"), infer the topic from the recent conversation.
- If the intent is unclear, return {{"tasks": []}}.

## Schema
{schema}"#,
            agents = self.agents_description,
            schema = schema,
        )
    }

    fn user_payload(&self, message: &str, context: &ConversationContext) -> String {
        let recent = context.recent_history(message, self.history_turns, self.history_chars);
        let mut payload = format!(
            "Project: {}\nCurrent phase: {}\n",
            context.project_name, context.current_phase
        );
        if !context.artifacts.is_empty() {
            let keys: Vec<&str> = context.artifacts.keys().map(String::as_str).collect();
            payload.push_str(&format!("Existing artifacts: {}\n", keys.join(", ")));
        }
        if !recent.is_empty() {
            payload.push_str("\nRecent conversation:\n");
            for m in &recent {
                payload.push_str(&format!("{}: {}\n", m.role.as_str(), m.content));
            }
        }
        payload.push_str(&format!("\nRequest: {message}"));
        payload
    }

    /// LLM 规划；任何错误都交给 create_plan 决定回退
    pub async fn llm_plan(
        &self,
        message: &str,
        context: &ConversationContext,
    ) -> Result<Vec<Task>, PipelineError> {
        let messages = [
            Message::system(self.system_prompt()),
            Message::user(self.user_payload(message, context)),
        ];
        let reply = self.llm.complete(&messages).await?;
        parse_plan(&reply)
    }

    /// 生成计划，永不失败
    pub async fn create_plan(&self, message: &str, context: &ConversationContext) -> Vec<Task> {
        let plan = if self.llm.is_configured() {
            match self.llm_plan(message, context).await {
                Ok(plan) => plan,
                Err(e) => {
                    tracing::warn!(error = %e, "LLM planning failed, using keyword fallback");
                    fallback_plan(message, context)
                }
            }
        } else {
            tracing::debug!("no LLM configured, using keyword fallback");
            fallback_plan(message, context)
        };

        for (task_id, problem) in unordered_references(&plan) {
            tracing::warn!(task_id = %task_id, problem = %problem, "plan reference will not resolve in order");
        }
        tracing::info!(
            tasks = plan.len(),
            plan = %plan.iter().map(|t| t.to_string()).collect::<Vec<_>>().join("; "),
            "plan created"
        );
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, NullLlmClient};
    use crate::pipeline::ParamValue;
    use serde_json::json;

    fn planner(llm: Arc<dyn LlmClient>) -> Planner {
        Planner::new(llm, &AgentRegistry::new())
    }

    #[test]
    fn test_fallback_timeline() {
        let ctx = ConversationContext::new("thesis");
        let plan = fallback_plan("show milestones", &ctx);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].agent_name, "project_timeline");
        assert_eq!(plan[0].action, "get_milestones");
    }

    #[test]
    fn test_fallback_sample_size_params() {
        let ctx = ConversationContext::new("p");
        let plan = fallback_plan("Calculate sample size for detecting a 30% reduction", &ctx);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].agent_name, "data_analysis");
        let params = plan[0].params.to_map();
        assert_eq!(params["design"], json!("two_group"));
        assert_eq!(params["effect_size"], json!(0.3));
        assert_eq!(params["alpha"], json!(0.05));
        assert_eq!(params["power"], json!(0.8));
    }

    #[test]
    fn test_fallback_validate() {
        let ctx = ConversationContext::new("p");
        let plan = fallback_plan("Check whether the Smith 2019 trial was retracted", &ctx);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].agent_name, "citation_validator");
        assert_eq!(plan[0].action, "validate");
    }

    #[test]
    fn test_fallback_default_chain() {
        let ctx = ConversationContext::new("p");
        let plan = fallback_plan("early mobilisation after hip fracture surgery", &ctx);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].action, "generate_picot");
        assert_eq!(plan[1].action, "search_pubmed");
        assert_eq!(plan[1].depends_on, vec!["task_1".to_string()]);
        assert!(matches!(
            plan[1].params.get("query"),
            Some(ParamValue::Reference { task_id, .. }) if task_id == "task_1"
        ));
        assert!(unordered_references(&plan).is_empty());
    }

    #[test]
    fn test_vague_message_uses_previous_topic() {
        let mut ctx = ConversationContext::new("p");
        ctx.add_message(Role::User, "vitamin D supplementation in elderly fall prevention")
            .unwrap();
        ctx.add_message(Role::Assistant, "Here are some results").unwrap();
        ctx.add_message(Role::User, "search more").unwrap();

        let plan = fallback_plan("search more", &ctx);
        assert_eq!(
            plan[0].params.to_map()["topic"],
            json!("vitamin D supplementation in elderly fall prevention")
        );
    }

    #[test]
    fn test_empty_message_without_history_is_unclear() {
        let ctx = ConversationContext::new("p");
        assert!(fallback_plan("  ?? ", &ctx).is_empty());
    }

    #[test]
    fn test_parse_plan_defaults_missing_fields() {
        let reply = r#"Sure! {"tasks": [{"params": {"topic": "sepsis"}}, {"agent_name": "synthesis", "action": "synthesize", "params": {"input": "<task_1>"}}]}"#;
        let plan = parse_plan(reply).unwrap();
        assert_eq!(plan[0].task_id, "task_1");
        assert_eq!(plan[0].agent_name, DEFAULT_AGENT);
        assert_eq!(plan[0].action, DEFAULT_ACTION);
        assert_eq!(plan[1].task_id, "task_2");
        assert!(plan[1].depends_on.is_empty());
    }

    #[test]
    fn test_parse_plan_rejects_garbage() {
        assert!(matches!(parse_plan("I cannot help"), Err(PipelineError::Planning(_))));
        assert!(parse_plan(r#"{"answer": 42}"#).is_err());
    }

    #[test]
    fn test_forward_reference_detected() {
        let plan = vec![
            Task::new("a", "x", "y").with_params(Params::new().with("q", "<b.out>")),
            Task::new("b", "x", "y"),
            Task::new("c", "x", "y").with_params(Params::new().with("q", "<zzz>")),
        ];
        let problems = unordered_references(&plan);
        assert_eq!(problems.len(), 2);
        assert!(problems[0].1.starts_with("forward"));
        assert!(problems[1].1.starts_with("unknown"));
    }

    #[tokio::test]
    async fn test_create_plan_uses_llm_reply() {
        let llm = Arc::new(MockLlmClient::with_responses([
            r#"{"tasks": [{"task_id": "t1", "agent_name": "data_analysis", "action": "calculate_sample_size", "params": {"effect_size": 0.4}}]}"#,
        ]));
        let ctx = ConversationContext::new("p");
        let plan = planner(llm.clone()).create_plan("power for my trial", &ctx).await;
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].task_id, "t1");
        assert!(llm.received()[0][0].content.contains("\"tasks\""));
    }

    #[tokio::test]
    async fn test_create_plan_falls_back_on_bad_reply() {
        let llm = Arc::new(MockLlmClient::with_responses(["no json here"]));
        let ctx = ConversationContext::new("p");
        let plan = planner(llm).create_plan("show milestones", &ctx).await;
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].agent_name, "project_timeline");
    }

    #[tokio::test]
    async fn test_create_plan_without_llm() {
        let ctx = ConversationContext::new("p");
        let plan = planner(Arc::new(NullLlmClient))
            .create_plan("What's my next deadline?", &ctx)
            .await;
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].agent_name, "project_timeline");
    }

    #[tokio::test]
    async fn test_history_is_truncated_in_payload() {
        let llm = Arc::new(MockLlmClient::with_responses([r#"{"tasks": []}"#]));
        let mut ctx = ConversationContext::new("p");
        ctx.add_message(Role::User, "x".repeat(500)).unwrap();
        ctx.add_message(Role::User, "go on").unwrap();
        let plan = planner(llm.clone()).with_history(5, 200).create_plan("go on", &ctx).await;
        assert!(plan.is_empty());
        let user = &llm.received()[0][1].content;
        assert!(user.contains(&format!("{}...", "x".repeat(200))));
        assert!(!user.contains(&"x".repeat(201)));
    }
}
