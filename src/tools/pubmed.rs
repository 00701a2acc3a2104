//! PubMed 文献检索工具（NCBI E-utilities）
//!
//! esearch 取 PMID 列表，esummary 取题名 / 期刊 / 日期 / 作者；整个检索在 pubmed 熔断器内执行。
//! 输出为 JSON 字符串：{"query", "count", "articles": [...], "text"}。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::{CircuitBreaker, SERVICE_UNAVAILABLE};
use crate::tools::Tool;

pub const PUBMED_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// 检索到的单篇文献
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub pmid: String,
    pub title: String,
    pub journal: String,
    pub pubdate: String,
    pub authors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ESearchResponse {
    esearchresult: ESearchResult,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    #[serde(default)]
    count: String,
    #[serde(default)]
    idlist: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryAuthor {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SummaryDoc {
    #[serde(default)]
    title: String,
    #[serde(default)]
    fulljournalname: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    pubdate: String,
    #[serde(default)]
    authors: Vec<SummaryAuthor>,
}

pub struct PubMedTool {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    max_results: usize,
    breaker: Arc<CircuitBreaker>,
}

/// 从检索指令中取出检索词
///
/// 指令形如 "Search PubMed for: <terms>\nTopic: <topic>"；检索词为空或仍是未解析的
/// `<...>` 占位符时退回 Topic 行。其他形式的指令取第一个冒号之后的内容。
pub fn query_from_instruction(instruction: &str) -> String {
    let mut query = None;
    let mut topic = None;
    for line in instruction.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match label.trim().to_lowercase().as_str() {
            "topic" => topic = Some(value),
            _ if query.is_none() => query = Some(value),
            _ => {}
        }
    }
    let unusable = |q: &str| q.is_empty() || (q.starts_with('<') && q.ends_with('>'));
    match (query, topic) {
        (Some(q), _) if !unusable(q) => q.to_string(),
        (_, Some(t)) if !t.is_empty() => t.to_string(),
        _ => instruction.trim().to_string(),
    }
}

impl PubMedTool {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout_secs: u64,
        max_results: usize,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent(concat!("rescope/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            max_results: max_results.max(1),
            breaker,
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T, String> {
        let mut query: Vec<(&str, String)> = params.to_vec();
        query.push(("retmode", "json".to_string()));
        if let Some(key) = &self.api_key {
            query.push(("api_key", key.clone()));
        }
        let resp = self
            .client
            .get(format!("{}/{}", self.base_url, endpoint))
            .query(&query)
            .send()
            .await
            .map_err(|e| format!("PubMed request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("PubMed HTTP {}", resp.status()));
        }
        resp.json::<T>()
            .await
            .map_err(|e| format!("PubMed response parse error: {e}"))
    }

    async fn search(&self, query: &str) -> Result<(usize, Vec<Article>), String> {
        let search: ESearchResponse = self
            .get_json(
                "esearch.fcgi",
                &[
                    ("db", "pubmed".to_string()),
                    ("term", query.to_string()),
                    ("retmax", self.max_results.to_string()),
                ],
            )
            .await?;
        let count = search.esearchresult.count.parse().unwrap_or(0);
        let ids = search.esearchresult.idlist;
        if ids.is_empty() {
            return Ok((count, Vec::new()));
        }

        let summary: Value = self
            .get_json(
                "esummary.fcgi",
                &[("db", "pubmed".to_string()), ("id", ids.join(","))],
            )
            .await?;
        let docs: HashMap<String, SummaryDoc> = ids
            .iter()
            .filter_map(|id| {
                let doc = summary.get("result")?.get(id)?.clone();
                serde_json::from_value(doc).ok().map(|d| (id.clone(), d))
            })
            .collect();

        let articles = ids
            .into_iter()
            .filter_map(|pmid| {
                let doc = docs.get(&pmid)?;
                let journal = if doc.fulljournalname.is_empty() {
                    doc.source.clone()
                } else {
                    doc.fulljournalname.clone()
                };
                Some(Article {
                    title: doc.title.clone(),
                    journal,
                    pubdate: doc.pubdate.clone(),
                    authors: doc.authors.iter().map(|a| a.name.clone()).collect(),
                    pmid,
                })
            })
            .collect();
        Ok((count, articles))
    }
}

/// 人类可读的检索摘要（作为输出中的 text 字段）
pub fn render_articles(query: &str, count: usize, articles: &[Article]) -> String {
    if articles.is_empty() {
        return format!("No PubMed articles found for \"{query}\".");
    }
    let mut out = format!(
        "Found {count} PubMed articles for \"{query}\" (showing {}):\n",
        articles.len()
    );
    for (i, a) in articles.iter().enumerate() {
        out.push_str(&format!(
            "{}. {} ({}, {}) PMID:{}\n",
            i + 1,
            a.title,
            a.journal,
            a.pubdate,
            a.pmid
        ));
    }
    out
}

#[async_trait]
impl Tool for PubMedTool {
    fn name(&self) -> &str {
        "pubmed"
    }

    fn description(&self) -> &str {
        "Search PubMed biomedical literature. Args: {\"query\": \"search terms\"}."
    }

    fn args_from_instruction(&self, instruction: &str) -> Value {
        json!({ "query": query_from_instruction(instruction) })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if query.is_empty() {
            return Err("Missing query".to_string());
        }
        tracing::info!(query = %query, "pubmed search");

        let fallback = json!({
            "query": query,
            "count": 0,
            "articles": [],
            "unavailable": true,
            "text": format!("PubMed {SERVICE_UNAVAILABLE}"),
        })
        .to_string();

        let outcome = self
            .breaker
            .call(None, || async { self.search(&query).await.map(Some) })
            .await?;
        match outcome {
            Some((count, articles)) => Ok(json!({
                "query": query,
                "count": count,
                "text": render_articles(&query, count, &articles),
                "articles": articles,
            })
            .to_string()),
            None => Ok(fallback),
        }
    }
}
