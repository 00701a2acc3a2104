//! 研究 Agent：统一 Runnable 接口、懒加载注册表、默认 Agent 集合
//!
//! 默认注册表包含 7 个 Agent：
//! - research_question（generate_picot）
//! - literature_search（search_pubmed，PubMed 工具）
//! - citation_validator（validate，PubMed 工具）
//! - synthesis（synthesize）
//! - web_research（read_url，网页读取工具）
//! - data_analysis（calculate_sample_size，确定性计算）
//! - project_timeline（get_milestones，读取 store）

pub mod llm_agent;
pub mod registry;
pub mod runnable;
pub mod sample_size;
pub mod timeline;

use std::sync::Arc;

pub use llm_agent::LlmAgent;
pub use registry::{AgentInfo, AgentRegistry};
pub use runnable::{AgentResponse, Runnable};
pub use sample_size::{SampleSizeAgent, SampleSizeRequest, StudyDesign};
pub use timeline::TimelineAgent;

use crate::config::AppConfig;
use crate::core::CircuitBreaker;
use crate::llm::LlmClient;
use crate::memory::ConversationStore;
use crate::tools::{PubMedTool, Tool, WebReaderTool};

pub const RESEARCH_QUESTION_INSTRUCTIONS: &str = r#"You are a clinical research methodologist.
Turn the user's topic into a focused PICOT research question.
Respond with a single JSON object:
{"population": "...", "intervention": "...", "comparison": "...", "outcome": "...", "time": "...",
 "question": "the full PICOT question", "search_query": "a concise PubMed query (keywords, AND/OR)",
 "text": "a short readable summary"}"#;

pub const LITERATURE_SEARCH_INSTRUCTIONS: &str = "You are a literature search specialist. \
Summarise the PubMed results provided under 'Tool results': list the most relevant articles with \
PMID, title, journal and year, and note gaps. Only cite articles that appear in the tool results.";

pub const CITATION_VALIDATOR_INSTRUCTIONS: &str = "You validate citations. Using the PubMed \
records under 'Tool results', check whether each cited work exists, whether its metadata matches, \
and flag anything that may be retracted or unverifiable. Never invent records.";

pub const SYNTHESIS_INSTRUCTIONS: &str = "You synthesise research evidence. Write a concise, \
structured narrative of the findings you are given, grouped by theme, with limitations. \
Use only the material provided.";

pub const WEB_RESEARCH_INSTRUCTIONS: &str = "You read web pages for a researcher. Summarise the \
page text under 'Tool results' faithfully and point out statements relevant to the user's topic.";

fn llm_agent_factory(
    name: &'static str,
    instructions: &'static str,
    llm: Arc<dyn LlmClient>,
    tool: Option<Arc<dyn Tool>>,
) -> impl Fn() -> Result<Arc<dyn Runnable>, crate::core::AgentError> + Send + Sync + 'static {
    move || {
        let agent = LlmAgent::new(name, instructions, llm.clone());
        let agent = match &tool {
            Some(t) => agent.with_tool(t.clone()),
            None => agent,
        };
        Ok(Arc::new(agent) as Arc<dyn Runnable>)
    }
}

/// 按配置构建默认注册表
///
/// pubmed 熔断器由 literature_search 与 citation_validator 共用（同一外部依赖）；
/// web_reader 单独一个熔断器。
pub fn build_default_registry(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    store: Option<Arc<ConversationStore>>,
    project: &str,
) -> AgentRegistry {
    let pubmed_breaker = Arc::new(CircuitBreaker::new(
        "pubmed",
        cfg.breakers.pubmed.to_breaker_config(),
    ));
    let web_breaker = Arc::new(CircuitBreaker::new(
        "web_reader",
        cfg.breakers.web_reader.to_breaker_config(),
    ));

    let pubmed: Arc<dyn Tool> = Arc::new(PubMedTool::new(
        &cfg.pubmed.base_url,
        cfg.pubmed.api_key.clone(),
        cfg.pubmed.timeout_secs,
        cfg.pubmed.max_results,
        pubmed_breaker,
    ));
    let web: Arc<dyn Tool> = Arc::new(WebReaderTool::new(
        cfg.web.timeout_secs,
        cfg.web.max_result_chars,
        web_breaker,
    ));

    let mut registry = AgentRegistry::new();
    registry.register(
        AgentInfo::new(
            "research_question",
            "Formulates a PICOT research question and a PubMed search query from a topic",
            &["generate_picot"],
        ),
        llm_agent_factory("research_question", RESEARCH_QUESTION_INSTRUCTIONS, llm.clone(), None),
    );
    registry.register(
        AgentInfo::new(
            "literature_search",
            "Searches PubMed and summarises relevant articles",
            &["search_pubmed"],
        ),
        llm_agent_factory(
            "literature_search",
            LITERATURE_SEARCH_INSTRUCTIONS,
            llm.clone(),
            Some(pubmed.clone()),
        ),
    );
    registry.register(
        AgentInfo::new(
            "citation_validator",
            "Checks citations against PubMed records and flags retractions",
            &["validate"],
        ),
        llm_agent_factory(
            "citation_validator",
            CITATION_VALIDATOR_INSTRUCTIONS,
            llm.clone(),
            Some(pubmed),
        ),
    );
    registry.register(
        AgentInfo::new(
            "synthesis",
            "Synthesises findings from earlier steps into a narrative",
            &["synthesize"],
        ),
        llm_agent_factory("synthesis", SYNTHESIS_INSTRUCTIONS, llm.clone(), None),
    );
    registry.register(
        AgentInfo::new(
            "web_research",
            "Reads a web page by URL and summarises it",
            &["read_url"],
        ),
        llm_agent_factory("web_research", WEB_RESEARCH_INSTRUCTIONS, llm, Some(web)),
    );
    registry.register_instance(
        AgentInfo::new(
            "data_analysis",
            "Calculates sample size for two-group, paired or one-sample designs (params: design, effect_size, alpha, power)",
            &["calculate_sample_size"],
        ),
        Arc::new(SampleSizeAgent),
    );
    registry.register_instance(
        AgentInfo::new(
            "project_timeline",
            "Lists project milestones and the next deadline",
            &["get_milestones"],
        ),
        Arc::new(TimelineAgent::new(project, store)),
    );
    registry
}
