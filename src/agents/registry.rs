//! Agent 注册表
//!
//! 按名称登记 Agent 的元信息与构造函数，首次 get_agent 时才构造（每个名称一个单例）。
//! 某个 Agent 构造失败只影响它自己：错误被保留，仅在再次请求该 Agent 时返回。

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use crate::agents::Runnable;
use crate::core::AgentError;

/// 供 Planner 生成 prompt 的 Agent 描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInfo {
    pub name: String,
    pub description: String,
    pub actions: Vec<String>,
}

impl AgentInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>, actions: &[&str]) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
        }
    }
}

type AgentFactory = Box<dyn Fn() -> Result<Arc<dyn Runnable>, AgentError> + Send + Sync>;

struct Entry {
    info: AgentInfo,
    factory: AgentFactory,
    instance: OnceLock<Result<Arc<dyn Runnable>, AgentError>>,
}

#[derive(Default)]
pub struct AgentRegistry {
    entries: BTreeMap<String, Entry>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个懒加载 Agent；同名覆盖
    pub fn register<F>(&mut self, info: AgentInfo, factory: F)
    where
        F: Fn() -> Result<Arc<dyn Runnable>, AgentError> + Send + Sync + 'static,
    {
        let name = info.name.clone();
        self.entries.insert(
            name,
            Entry {
                info,
                factory: Box::new(factory),
                instance: OnceLock::new(),
            },
        );
    }

    /// 登记已构造好的 Agent
    pub fn register_instance(&mut self, info: AgentInfo, agent: Arc<dyn Runnable>) {
        self.register(info, move || Ok(agent.clone()));
    }

    /// 获取 Agent（首次调用时构造）
    pub fn get_agent(&self, name: &str) -> Result<Arc<dyn Runnable>, AgentError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| AgentError::UnknownAgent(name.to_string()))?;
        entry
            .instance
            .get_or_init(|| {
                tracing::debug!(agent = %name, "constructing agent");
                (entry.factory)().map_err(|e| {
                    tracing::warn!(agent = %name, error = %e, "agent construction failed");
                    match e {
                        AgentError::InitFailed { .. } => e,
                        other => AgentError::InitFailed {
                            name: name.to_string(),
                            reason: other.to_string(),
                        },
                    }
                })
            })
            .clone()
    }

    /// 已登记且能成功构造
    pub fn is_available(&self, name: &str) -> bool {
        self.get_agent(name).is_ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn infos(&self) -> impl Iterator<Item = &AgentInfo> {
        self.entries.values().map(|e| &e.info)
    }

    /// "- name: description (actions: a, b)" 列表，拼入规划 prompt
    pub fn describe(&self) -> String {
        self.infos()
            .map(|i| {
                format!(
                    "- {}: {} (actions: {})",
                    i.name,
                    i.description,
                    i.actions.join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Named(&'static str);

    #[async_trait]
    impl Runnable for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self, _instruction: &str) -> Result<AgentResponse, AgentError> {
            Ok(AgentResponse::Text(self.0.to_string()))
        }
    }

    #[test]
    fn test_lazy_singleton() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let mut registry = AgentRegistry::new();
        registry.register(AgentInfo::new("a", "agent a", &["x"]), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Named("a")) as Arc<dyn Runnable>)
        });

        assert_eq!(built.load(Ordering::SeqCst), 0);
        let first = registry.get_agent("a").unwrap();
        let second = registry.get_agent("a").unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_failed_init_is_isolated() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let mut registry = AgentRegistry::new();
        registry.register(AgentInfo::new("broken", "", &[]), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(AgentError::InvalidInstruction("missing credentials".into()))
        });
        registry.register_instance(AgentInfo::new("ok", "", &[]), Arc::new(Named("ok")));

        let err = registry.get_agent("broken").err().unwrap();
        assert!(matches!(&err, AgentError::InitFailed { name, reason }
            if name == "broken" && reason.contains("missing credentials")));
        assert!(registry.is_available("ok"));
        assert!(!registry.is_available("broken"));
        assert!(registry.get_agent("broken").is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1, "failure is retained, not retried");
    }

    #[test]
    fn test_unknown_agent() {
        let registry = AgentRegistry::new();
        assert!(matches!(registry.get_agent("ghost"), Err(AgentError::UnknownAgent(n)) if n == "ghost"));
        assert!(!registry.is_available("ghost"));
    }

    #[test]
    fn test_describe_lists_actions() {
        let mut registry = AgentRegistry::new();
        registry.register_instance(
            AgentInfo::new("data_analysis", "Statistics", &["calculate_sample_size"]),
            Arc::new(Named("data_analysis")),
        );
        assert_eq!(
            registry.describe(),
            "- data_analysis: Statistics (actions: calculate_sample_size)"
        );
    }
}
