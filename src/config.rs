//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `RESCOPE__*` 覆盖（双下划线表示嵌套，如 `RESCOPE__LLM__PROVIDER=none`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::CircuitBreakerConfig;
use crate::tools::PUBMED_BASE_URL;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub planner: PlannerSection,
    pub synthesis: SynthesisSection,
    pub pubmed: PubMedSection,
    pub web: WebSection,
    pub breakers: BreakersSection,
}

/// [app] 段：项目名、数据库路径
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_project_name")]
    pub project_name: String,
    /// SQLite 文件路径；未设置时不做持久化
    pub db_path: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            db_path: None,
        }
    }
}

fn default_project_name() -> String {
    "default".to_string()
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai / none
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [planner] 段：规划时带入的历史条数与每条截断长度
#[derive(Debug, Clone, Deserialize)]
pub struct PlannerSection {
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_history_chars")]
    pub history_chars: usize,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            history_turns: default_history_turns(),
            history_chars: default_history_chars(),
        }
    }
}

fn default_history_turns() -> usize {
    5
}

fn default_history_chars() -> usize {
    200
}

/// [synthesis] 段
#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisSection {
    /// 每个任务输出写入综合 prompt 的最大字符数
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
}

impl Default for SynthesisSection {
    fn default() -> Self {
        Self {
            max_output_chars: default_max_output_chars(),
        }
    }
}

fn default_max_output_chars() -> usize {
    2000
}

/// [pubmed] 段：E-utilities 地址、超时、返回条数、可选 API Key
#[derive(Debug, Clone, Deserialize)]
pub struct PubMedSection {
    #[serde(default = "default_pubmed_base_url")]
    pub base_url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    pub api_key: Option<String>,
}

impl Default for PubMedSection {
    fn default() -> Self {
        Self {
            base_url: default_pubmed_base_url(),
            timeout_secs: default_http_timeout_secs(),
            max_results: default_max_results(),
            api_key: None,
        }
    }
}

fn default_pubmed_base_url() -> String {
    PUBMED_BASE_URL.to_string()
}

fn default_http_timeout_secs() -> u64 {
    15
}

fn default_max_results() -> usize {
    10
}

/// [web] 段：网页读取超时与最大字符数
#[derive(Debug, Clone, Deserialize)]
pub struct WebSection {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            max_result_chars: default_max_result_chars(),
        }
    }
}

fn default_max_result_chars() -> usize {
    8000
}

/// [breakers.*] 段：每个外部依赖一个熔断器
#[derive(Debug, Clone, Deserialize)]
pub struct BreakersSection {
    #[serde(default = "BreakerSection::sensitive")]
    pub pubmed: BreakerSection,
    #[serde(default = "BreakerSection::standard")]
    pub web_reader: BreakerSection,
    #[serde(default = "BreakerSection::standard")]
    pub llm: BreakerSection,
}

impl Default for BreakersSection {
    fn default() -> Self {
        Self {
            pubmed: BreakerSection::sensitive(),
            web_reader: BreakerSection::standard(),
            llm: BreakerSection::standard(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BreakerSection {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl BreakerSection {
    fn standard() -> Self {
        Self::from(CircuitBreakerConfig::default())
    }

    fn sensitive() -> Self {
        Self::from(CircuitBreakerConfig::sensitive())
    }

    pub fn to_breaker_config(self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::default()
            .with_failure_threshold(self.failure_threshold)
            .with_cooldown(Duration::from_secs(self.cooldown_secs))
    }
}

impl From<CircuitBreakerConfig> for BreakerSection {
    fn from(c: CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: c.failure_threshold,
            cooldown_secs: c.cooldown.as_secs(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 RESCOPE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 RESCOPE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("RESCOPE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 加载失败时记录警告并使用默认配置
pub fn load_config_or_default(config_path: Option<PathBuf>) -> AppConfig {
    load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        AppConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.project_name, "default");
        assert!(cfg.app.db_path.is_none());
        assert_eq!(cfg.planner.history_turns, 5);
        assert_eq!(cfg.planner.history_chars, 200);
        assert_eq!(cfg.synthesis.max_output_chars, 2000);
        assert_eq!(cfg.pubmed.max_results, 10);
        assert_eq!(cfg.breakers.pubmed.failure_threshold, 3);
        assert_eq!(cfg.breakers.llm.failure_threshold, 5);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let c = config::Config::builder()
            .add_source(config::File::from_str(
                "[llm]\nprovider = \"none\"\n\n[breakers.web_reader]\nfailure_threshold = 2\ncooldown_secs = 5\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let cfg: AppConfig = c.try_deserialize().unwrap();
        assert_eq!(cfg.llm.provider, "none");
        assert_eq!(cfg.llm.timeouts.request, 60);
        assert_eq!(cfg.breakers.web_reader.failure_threshold, 2);
        assert_eq!(
            cfg.breakers.web_reader.to_breaker_config().cooldown,
            Duration::from_secs(5)
        );
        assert_eq!(cfg.breakers.pubmed.cooldown_secs, 15);
        assert_eq!(cfg.app.project_name, "default");
    }
}
