//! 下一步建议：按刚执行的 action、当前阶段与已有产物给出最多 4 条提示

use crate::memory::{ConversationContext, Phase};
use crate::pipeline::Task;

pub const MAX_SUGGESTIONS: usize = 4;

/// 出错时使用的固定建议
pub const STATIC_SUGGESTIONS: &[&str] = &[
    "Define a PICOT research question for your topic",
    "Search PubMed for recent studies",
    "Show my project milestones",
];

fn followups(action: &str) -> &'static [&'static str] {
    match action {
        "generate_picot" => &[
            "Search PubMed using this research question",
            "Refine the population or outcome in the PICOT question",
        ],
        "search_pubmed" => &[
            "Synthesize the key findings from these articles",
            "Validate the citations and check for retractions",
        ],
        "calculate_sample_size" => &[
            "Recalculate with a smaller effect size",
            "Recalculate with 90% power",
        ],
        "validate" => &["Synthesize the validated evidence"],
        "synthesize" => &["Draft the background section from this synthesis"],
        "get_milestones" => &["Plan the tasks needed for the next deadline"],
        "read_url" => &["Search PubMed for studies related to this page"],
        _ => &[],
    }
}

fn phase_suggestions(phase: Phase) -> &'static [&'static str] {
    match phase {
        Phase::Planning => &["Estimate the sample size for your study"],
        Phase::LiteratureReview => &["Search for systematic reviews on this topic"],
        Phase::DataCollection => &["Show my project milestones"],
        Phase::Analysis => &["Check the assumptions of your sample size calculation"],
        Phase::Writing => &["Validate the citations in your draft"],
        Phase::Review => &["Show my next deadline"],
    }
}

pub fn suggest(context: &ConversationContext, plan: &[Task]) -> Vec<String> {
    let mut candidates: Vec<&str> = Vec::new();

    for task in plan {
        candidates.extend_from_slice(followups(&task.action));
    }
    if !context.has_artifact("generate_picot") {
        candidates.push("Define a PICOT research question for your topic");
    }
    if context.has_artifact("search_pubmed") && !context.has_artifact("synthesize") {
        candidates.push("Synthesize the key findings from these articles");
    }
    candidates.extend_from_slice(phase_suggestions(context.current_phase));

    let mut out: Vec<String> = Vec::with_capacity(MAX_SUGGESTIONS);
    for c in candidates {
        if out.len() == MAX_SUGGESTIONS {
            break;
        }
        if !out.iter().any(|s| s == c) {
            out.push(c.to_string());
        }
    }
    out
}

pub fn static_suggestions() -> Vec<String> {
    STATIC_SUGGESTIONS.iter().map(|s| s.to_string()).collect()
}
