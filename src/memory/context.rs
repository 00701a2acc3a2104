//! 会话上下文：一次研究会话的可变状态
//!
//! 包含对话历史、按 action 命名的产物、已完成的 "agent:action" 集合、当前研究阶段与项目名。
//! 挂载 ConversationStore 后：创建时加载历史与产物，每次追加消息 / 记录产物时立即写库。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::PipelineError;
use crate::memory::{ConversationStore, Message, Role};

/// 研究阶段
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Planning,
    LiteratureReview,
    DataCollection,
    Analysis,
    Writing,
    Review,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::LiteratureReview => "literature_review",
            Phase::DataCollection => "data_collection",
            Phase::Analysis => "analysis",
            Phase::Writing => "writing",
            Phase::Review => "review",
        }
    }

    /// 完成某个 action 后进入的阶段；与阶段无关的 action 返回 None
    pub fn after_action(action: &str) -> Option<Phase> {
        match action {
            "generate_picot" => Some(Phase::Planning),
            "search_pubmed" | "read_url" => Some(Phase::LiteratureReview),
            "calculate_sample_size" => Some(Phase::Analysis),
            "synthesize" => Some(Phase::Writing),
            "validate" => Some(Phase::Review),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 命名产物：某个 action 的输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub value: Value,
    pub created_at: DateTime<Utc>,
}

/// 会话上下文
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub session_id: Uuid,
    pub project_name: String,
    #[serde(default)]
    pub current_phase: Phase,
    #[serde(default)]
    pub completed_tasks: BTreeSet<String>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, Artifact>,
    #[serde(default)]
    pub conversation_history: Vec<Message>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    #[serde(skip)]
    store: Option<Arc<ConversationStore>>,
}

impl ConversationContext {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            project_name: project_name.into(),
            current_phase: Phase::default(),
            completed_tasks: BTreeSet::new(),
            artifacts: BTreeMap::new(),
            conversation_history: Vec::new(),
            metadata: serde_json::Map::new(),
            store: None,
        }
    }

    /// 挂载存储并加载该项目已有的历史与产物
    pub fn with_store(mut self, store: Arc<ConversationStore>) -> Result<Self, PipelineError> {
        let history = store.load_messages(&self.project_name)?;
        let artifacts = store.load_artifacts(&self.project_name)?;
        tracing::info!(
            project = %self.project_name,
            messages = history.len(),
            artifacts = artifacts.len(),
            "conversation loaded from store"
        );
        self.conversation_history = history;
        self.artifacts = artifacts;
        self.store = Some(store);
        Ok(self)
    }

    pub fn store(&self) -> Option<&Arc<ConversationStore>> {
        self.store.as_ref()
    }

    /// 追加一条消息；有 store 时同步写库
    pub fn add_message(&mut self, role: Role, content: impl Into<String>) -> Result<(), PipelineError> {
        let message = Message::new(role, content);
        if let Some(store) = &self.store {
            store.append_message(&self.project_name, &message)?;
        }
        self.conversation_history.push(message);
        Ok(())
    }

    pub fn record_artifact(&mut self, action: &str, value: Value) -> Result<(), PipelineError> {
        let artifact = Artifact {
            value,
            created_at: Utc::now(),
        };
        if let Some(store) = &self.store {
            store.save_artifact(&self.project_name, action, &artifact)?;
        }
        self.artifacts.insert(action.to_string(), artifact);
        Ok(())
    }

    pub fn artifact(&self, action: &str) -> Option<&Artifact> {
        self.artifacts.get(action)
    }

    pub fn has_artifact(&self, action: &str) -> bool {
        self.artifacts.contains_key(action)
    }

    pub fn mark_completed(&mut self, agent_name: &str, action: &str) {
        self.completed_tasks.insert(format!("{agent_name}:{action}"));
    }

    pub fn is_completed(&self, agent_name: &str, action: &str) -> bool {
        self.completed_tasks.contains(&format!("{agent_name}:{action}"))
    }

    pub fn set_phase(&mut self, phase: Phase) {
        if self.current_phase != phase {
            tracing::info!(from = %self.current_phase, to = %phase, "phase changed");
            self.current_phase = phase;
        }
    }

    /// 当前输入之前的最近 max_entries 条历史，每条截断到 max_chars 个字符
    pub fn recent_history(
        &self,
        current_message: &str,
        max_entries: usize,
        max_chars: usize,
    ) -> Vec<Message> {
        let prior = self.prior_history(current_message);
        let start = prior.len().saturating_sub(max_entries);
        prior[start..].iter().map(|m| m.truncated(max_chars)).collect()
    }

    /// 除去当前输入（若已追加到末尾）之外的历史
    pub fn prior_history(&self, current_message: &str) -> &[Message] {
        match self.conversation_history.last() {
            Some(last) if last.role == Role::User && last.content.trim() == current_message.trim() => {
                &self.conversation_history[..self.conversation_history.len() - 1]
            }
            _ => &self.conversation_history,
        }
    }

    /// 清空本项目的会话状态（含已持久化的消息与产物）
    pub fn clear(&mut self) -> Result<(), PipelineError> {
        if let Some(store) = &self.store {
            store.clear_messages(&self.project_name)?;
            store.clear_artifacts(&self.project_name)?;
        }
        self.conversation_history.clear();
        self.artifacts.clear();
        self.completed_tasks.clear();
        self.current_phase = Phase::default();
        Ok(())
    }

    pub fn to_dict(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_dict(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}
