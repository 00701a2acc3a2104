//! 计划执行器
//!
//! 按计划数组顺序逐个执行任务：解析引用 → 查注册表 → 按 action 模板拼指令 → Agent.run。
//! 单个任务失败只记录在结果中，后续任务照常执行；每个任务输出一条 JSON 审计日志。

use std::sync::OnceLock;
use std::time::Instant;

use regex::Regex;
use serde_json::{Map, Value};

use crate::agents::{AgentRegistry, AgentResponse};
use crate::memory::{ConversationContext, Phase};
use crate::pipeline::extract::first_json_object;
use crate::pipeline::resolver::resolve;
use crate::pipeline::{ExecutionResult, PlanResults, Task};

/// 输出会被保存为产物的 action
pub const ARTIFACT_ACTIONS: &[&str] = &["generate_picot", "search_pubmed", "synthesize", "validate"];

/// action → 指令模板；`{name}` 由解析后的参数填充
pub fn instruction_template(action: &str) -> Option<&'static str> {
    let template = match action {
        "generate_picot" => "Generate a PICOT research question for: {topic}",
        "search_pubmed" => "Search PubMed for: {query}\nTopic: {topic}",
        "calculate_sample_size" => "Calculate the required sample size for a {design} design with effect size {effect_size}, alpha {alpha} and power {power}.",
        "validate" => "Validate these citations and check for retractions: {citations}",
        "synthesize" => "Synthesize the findings on {topic}:\n{input}",
        "get_milestones" => "List the milestones and next deadline for project {project}",
        "read_url" => "Read and summarise this page: {url}",
        _ => return None,
    };
    Some(template)
}

fn slot_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"))
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// 拼装 Agent 指令
///
/// 有模板且参数齐全时按模板填充；否则退化为 "action: k=v, k=v"，无参数时只有 action 名。
pub fn build_instruction(action: &str, params: &Map<String, Value>) -> String {
    if let Some(template) = instruction_template(action) {
        let complete = slot_re()
            .captures_iter(template)
            .all(|c| params.contains_key(&c[1]));
        if complete {
            return slot_re()
                .replace_all(template, |c: &regex::Captures<'_>| {
                    params.get(&c[1]).map(render_value).unwrap_or_default()
                })
                .into_owned();
        }
    }
    if params.is_empty() {
        return action.to_string();
    }
    let pairs: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{k}={}", render_value(v)))
        .collect();
    format!("{action}: {}", pairs.join(", "))
}

/// 把 Agent 回复规整为 JSON 对象
pub fn extract_output(response: AgentResponse) -> Map<String, Value> {
    match response {
        AgentResponse::Structured(Value::Object(map)) => map,
        AgentResponse::Structured(other) => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
        AgentResponse::Text(text) => first_json_object(&text).unwrap_or_else(|| {
            let mut map = Map::new();
            map.insert("text".to_string(), Value::String(text));
            map
        }),
    }
}

async fn run_task(task: &Task, params: &Map<String, Value>, registry: &AgentRegistry) -> ExecutionResult {
    let agent = match registry.get_agent(&task.agent_name) {
        Ok(agent) => agent,
        Err(e) => return ExecutionResult::failed(&task.agent_name, &task.action, e.to_string()),
    };
    let instruction = build_instruction(&task.action, params);
    tracing::debug!(task_id = %task.task_id, instruction = %instruction, "running task");
    match agent.run(&instruction).await {
        Ok(response) => ExecutionResult::succeeded(&task.agent_name, &task.action, extract_output(response)),
        Err(e) => ExecutionResult::failed(&task.agent_name, &task.action, e.to_string()),
    }
}

fn apply_side_effects(task: &Task, result: &ExecutionResult, context: &mut ConversationContext) {
    if !result.success {
        return;
    }
    if ARTIFACT_ACTIONS.contains(&task.action.as_str()) {
        if let Some(output) = &result.output {
            if let Err(e) = context.record_artifact(&task.action, Value::Object(output.clone())) {
                tracing::warn!(task_id = %task.task_id, error = %e, "failed to persist artifact");
            }
        }
    }
    context.mark_completed(&task.agent_name, &task.action);
    if let Some(phase) = Phase::after_action(&task.action) {
        context.set_phase(phase);
    }
}

/// 按顺序执行整个计划
pub async fn execute_plan(
    plan: &[Task],
    context: &mut ConversationContext,
    registry: &AgentRegistry,
) -> PlanResults {
    let mut results = PlanResults::new();
    for task in plan {
        let start = Instant::now();
        let resolution = resolve(&task.params, &results);
        for placeholder in &resolution.unresolved {
            tracing::warn!(task_id = %task.task_id, placeholder = %placeholder, "unresolved reference");
        }

        let result = run_task(task, &resolution.values, registry).await;
        if let Some(error) = &result.error {
            tracing::warn!(task_id = %task.task_id, agent = %task.agent_name, error = %error, "task failed");
        }

        let audit = serde_json::json!({
            "event": "task_audit",
            "task_id": task.task_id,
            "agent": task.agent_name,
            "action": task.action,
            "ok": result.success,
            "unresolved": resolution.unresolved.len(),
            "duration_ms": start.elapsed().as_millis() as u64,
        });
        tracing::info!(audit = %audit.to_string(), "task");

        apply_side_effects(task, &result, context);
        results.insert(task.task_id.clone(), result);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentInfo, Runnable};
    use crate::core::AgentError;
    use crate::pipeline::Params;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// 记录收到的指令并返回固定回复
    struct Recording {
        name: &'static str,
        reply: Result<AgentResponse, AgentError>,
        seen: Mutex<Vec<String>>,
    }

    impl Recording {
        fn new(name: &'static str, reply: Result<AgentResponse, AgentError>) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Runnable for Recording {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, instruction: &str) -> Result<AgentResponse, AgentError> {
            self.seen.lock().unwrap().push(instruction.to_string());
            self.reply.clone()
        }
    }

    #[test]
    fn test_build_instruction_from_template() {
        let params = Params::new()
            .with("design", "two_group")
            .with("effect_size", 0.3)
            .with("alpha", 0.05)
            .with("power", 0.8)
            .to_map();
        assert_eq!(
            build_instruction("calculate_sample_size", &params),
            "Calculate the required sample size for a two_group design with effect size 0.3, alpha 0.05 and power 0.8."
        );
    }

    #[test]
    fn test_build_instruction_missing_key_falls_back() {
        let params = Params::new().with("topic", "sepsis").with("n", 3).to_map();
        assert_eq!(build_instruction("search_pubmed", &params), "search_pubmed: topic=sepsis, n=3");
        assert_eq!(build_instruction("mystery", &Map::new()), "mystery");
    }

    #[test]
    fn test_extract_output_variants() {
        let text = AgentResponse::Text("Result:\n{\"search_query\": \"x\"}\nthanks".into());
        assert_eq!(Value::Object(extract_output(text)), json!({"search_query": "x"}));
        let plain = AgentResponse::Text("no json".into());
        assert_eq!(Value::Object(extract_output(plain)), json!({"text": "no json"}));
        let scalar = AgentResponse::Structured(json!(3));
        assert_eq!(Value::Object(extract_output(scalar)), json!({"value": 3}));
    }

    #[tokio::test]
    async fn test_chain_resolves_reference_and_records_context() {
        let picot = Recording::new(
            "research_question",
            Ok(AgentResponse::Text(r#"{"question": "Q", "search_query": "hip AND fracture"}"#.into())),
        );
        let search = Recording::new(
            "literature_search",
            Ok(AgentResponse::Structured(json!({"count": 2, "text": "two papers"}))),
        );
        let mut registry = AgentRegistry::new();
        registry.register_instance(AgentInfo::new("research_question", "", &[]), picot.clone());
        registry.register_instance(AgentInfo::new("literature_search", "", &[]), search.clone());

        let plan = vec![
            Task::new("task_1", "research_question", "generate_picot")
                .with_params(Params::new().with("topic", "hip fracture")),
            Task::new("task_2", "literature_search", "search_pubmed")
                .with_params(
                    Params::new()
                        .with("query", "<task_1.search_query>")
                        .with("topic", "hip fracture"),
                )
                .depends_on("task_1"),
        ];
        let mut ctx = ConversationContext::new("p");
        let results = execute_plan(&plan, &mut ctx, &registry).await;

        assert_eq!(results.len(), 2);
        assert!(results.get("task_2").unwrap().success);
        assert_eq!(
            search.seen.lock().unwrap()[0],
            "Search PubMed for: hip AND fracture\nTopic: hip fracture"
        );
        assert!(ctx.has_artifact("generate_picot"));
        assert!(ctx.has_artifact("search_pubmed"));
        assert!(ctx.is_completed("literature_search", "search_pubmed"));
        assert_eq!(ctx.current_phase, Phase::LiteratureReview);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_execution_continues() {
        let broken = Recording::new(
            "research_question",
            Err(AgentError::InvalidInstruction("no llm".into())),
        );
        let search = Recording::new("literature_search", Ok(AgentResponse::Text("plain".into())));
        let mut registry = AgentRegistry::new();
        registry.register_instance(AgentInfo::new("research_question", "", &[]), broken);
        registry.register_instance(AgentInfo::new("literature_search", "", &[]), search.clone());

        let plan = vec![
            Task::new("task_1", "research_question", "generate_picot"),
            Task::new("task_2", "literature_search", "search_pubmed").with_params(
                Params::new()
                    .with("query", "<task_1.search_query>")
                    .with("topic", "falls"),
            ),
            Task::new("task_3", "ghost", "haunt"),
        ];
        let mut ctx = ConversationContext::new("p");
        let results = execute_plan(&plan, &mut ctx, &registry).await;

        assert!(!results.get("task_1").unwrap().success);
        assert!(results.get("task_2").unwrap().success);
        assert!(results.get("task_3").unwrap().error.as_deref().unwrap().contains("ghost"));
        assert_eq!(
            search.seen.lock().unwrap()[0],
            "Search PubMed for: <task_1.search_query>\nTopic: falls"
        );
        assert!(!ctx.has_artifact("generate_picot"));
        assert!(!ctx.is_completed("research_question", "generate_picot"));
    }
}
