//! 查询意图路由
//!
//! 按顺序匹配正则规则，第一条命中的规则决定意图；命中的模式越多置信度越高。
//! 独立工具，不在编排主路径上。

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// 查询意图
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    /// 消息里带 URL
    WebRead,
    Timeline,
    SampleSize,
    Validation,
    /// PICOT / 研究问题
    ResearchQuestion,
    Synthesis,
    LiteratureSearch,
    General,
}

impl QueryIntent {
    /// 该意图对应的 (agent, action)；General 没有固定目标
    pub fn target(&self) -> Option<(&'static str, &'static str)> {
        match self {
            QueryIntent::WebRead => Some(("web_research", "read_url")),
            QueryIntent::Timeline => Some(("project_timeline", "get_milestones")),
            QueryIntent::SampleSize => Some(("data_analysis", "calculate_sample_size")),
            QueryIntent::Validation => Some(("citation_validator", "validate")),
            QueryIntent::ResearchQuestion => Some(("research_question", "generate_picot")),
            QueryIntent::Synthesis => Some(("synthesis", "synthesize")),
            QueryIntent::LiteratureSearch => Some(("literature_search", "search_pubmed")),
            QueryIntent::General => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutedQuery {
    pub intent: QueryIntent,
    pub confidence: f32,
    /// 命中的文本片段
    pub matched: Vec<String>,
}

struct Rule {
    intent: QueryIntent,
    patterns: Vec<Regex>,
}

fn rule(intent: QueryIntent, patterns: &[&str]) -> Rule {
    Rule {
        intent,
        patterns: patterns
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).expect("valid router regex"))
            .collect(),
    }
}

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            rule(QueryIntent::WebRead, &[r"https?://\S+", r"\bwww\.\S+"]),
            rule(
                QueryIntent::Timeline,
                &[r"\btimelines?\b", r"\bmilestones?\b", r"\bdeadlines?\b", r"\bschedule\b", r"\bdue\b"],
            ),
            rule(
                QueryIntent::SampleSize,
                &[
                    r"\bsample[ -]size\b",
                    r"\bpower\b",
                    r"\beffect size\b",
                    r"\bstatistic(al|s)\b",
                    r"\bhow many (participants|patients|subjects)\b",
                ],
            ),
            rule(
                QueryIntent::Validation,
                &[r"\bvalidat\w*", r"\bretract\w*", r"\bverify\b", r"\bcitations?\b"],
            ),
            rule(
                QueryIntent::ResearchQuestion,
                &[r"\bpicot?\b", r"\bresearch question\b", r"\bhypothes[ie]s\b"],
            ),
            rule(
                QueryIntent::Synthesis,
                &[r"\bsynthes\w*", r"\bsummari[sz]e\b", r"\bsummary\b", r"\boverview\b"],
            ),
            rule(
                QueryIntent::LiteratureSearch,
                &[
                    r"\bpubmed\b",
                    r"\bliterature\b",
                    r"\barticles?\b",
                    r"\bstud(y|ies)\b",
                    r"\bpapers?\b",
                    r"\bsearch\b",
                    r"\btrials?\b",
                ],
            ),
        ]
    })
}

pub struct QueryRouter;

impl QueryRouter {
    pub fn classify(query: &str) -> RoutedQuery {
        for rule in rules() {
            let matched: Vec<String> = rule
                .patterns
                .iter()
                .filter_map(|p| p.find(query).map(|m| m.as_str().to_string()))
                .collect();
            if !matched.is_empty() {
                let confidence = (0.6 + 0.1 * (matched.len() - 1) as f32).min(0.95);
                return RoutedQuery {
                    intent: rule.intent,
                    confidence,
                    matched,
                };
            }
        }
        RoutedQuery {
            intent: QueryIntent::General,
            confidence: 0.3,
            matched: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_wins_over_keywords() {
        let r = QueryRouter::classify("summarize https://example.org/trial-results please");
        assert_eq!(r.intent, QueryIntent::WebRead);
        assert_eq!(r.intent.target(), Some(("web_research", "read_url")));
    }

    #[test]
    fn test_timeline_and_sample_size() {
        assert_eq!(QueryRouter::classify("What's my next deadline?").intent, QueryIntent::Timeline);
        let r = QueryRouter::classify("sample size with 80% power and effect size 0.4");
        assert_eq!(r.intent, QueryIntent::SampleSize);
        assert_eq!(r.matched.len(), 3);
        assert!(r.confidence > 0.75);
    }

    #[test]
    fn test_literature_search_and_general() {
        assert_eq!(
            QueryRouter::classify("find studies on exercise and depression").intent,
            QueryIntent::LiteratureSearch
        );
        let g = QueryRouter::classify("hello there");
        assert_eq!(g.intent, QueryIntent::General);
        assert!(g.matched.is_empty());
        assert_eq!(g.intent.target(), None);
    }

    #[test]
    fn test_picot() {
        assert_eq!(
            QueryRouter::classify("Help me write a PICOT question").intent,
            QueryIntent::ResearchQuestion
        );
    }
}
