//! 网页读取工具：超时、结果大小限制、熔断保护
//!
//! GET 请求带超时与 User-Agent；HTML 响应用 html2text 提取可读文本，
//! 超过 max_result_chars 时截断并追加 ...[truncated]。熔断打开时返回固定的不可用文本。

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use html2text::from_read;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};

use crate::core::{CircuitBreaker, SERVICE_UNAVAILABLE};
use crate::tools::Tool;

pub struct WebReaderTool {
    client: Client,
    breaker: Arc<CircuitBreaker>,
    max_result_chars: usize,
}

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 判断内容是否像 HTML
fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("<!")
        || s.starts_with("<html")
        || s.starts_with("<HTML")
        || (s.len() > 20 && s.contains('<') && (s.contains("</") || s.contains("<head")))
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"')\]]+"#).expect("valid url regex"))
}

/// 指令中的第一个 http(s) URL
pub fn extract_url(text: &str) -> Option<String> {
    url_re()
        .find(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';']).to_string())
}

fn truncate_chars(body: String, max_chars: usize) -> String {
    if body.chars().count() > max_chars {
        body.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        body
    }
}

impl WebReaderTool {
    pub fn new(timeout_secs: u64, max_result_chars: usize, breaker: Arc<CircuitBreaker>) -> Self {
        const USER_AGENT: &str = concat!("rescope/", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            breaker,
            max_result_chars,
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| format!("Read body: {e}"))?;
        let body = body.trim_start_matches('\u{FEFF}');

        let text = if looks_like_html(body) {
            match from_read(body.as_bytes(), 120) {
                Ok(text) if !text.trim().is_empty() => text,
                _ => strip_html_tags(body),
            }
        } else {
            body.to_string()
        };
        Ok(truncate_chars(text, self.max_result_chars))
    }
}

#[async_trait]
impl Tool for WebReaderTool {
    fn name(&self) -> &str {
        "web_reader"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its readable text. Args: {\"url\": \"https://...\"}."
    }

    fn args_from_instruction(&self, instruction: &str) -> Value {
        json!({ "url": extract_url(instruction).unwrap_or_default() })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if url.is_empty() {
            return Err("Missing url".to_string());
        }
        tracing::info!(url = %url, "web reader fetch");

        let fetched = self
            .breaker
            .call(None, || async { self.fetch(&url).await.map(Some) })
            .await?;
        Ok(match fetched {
            Some(text) => json!({ "url": url, "text": text }),
            None => json!({
                "url": url,
                "unavailable": true,
                "text": format!("Web reader {SERVICE_UNAVAILABLE}"),
            }),
        }
        .to_string())
    }
}
