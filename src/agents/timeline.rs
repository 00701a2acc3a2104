//! 项目时间线 Agent（project_timeline）：读取 store 中的里程碑，给出下一个截止日期

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::json;

use crate::agents::{AgentResponse, Runnable};
use crate::core::AgentError;
use crate::memory::{ConversationStore, Milestone};

pub struct TimelineAgent {
    project: String,
    store: Option<Arc<ConversationStore>>,
}

impl TimelineAgent {
    pub fn new(project: impl Into<String>, store: Option<Arc<ConversationStore>>) -> Self {
        Self {
            project: project.into(),
            store,
        }
    }

    fn milestones(&self) -> Result<Vec<Milestone>, AgentError> {
        match &self.store {
            Some(store) => store
                .list_milestones(&self.project)
                .map_err(|e| AgentError::Tool {
                    tool: "milestones".to_string(),
                    message: e.to_string(),
                }),
            None => Ok(Vec::new()),
        }
    }
}

/// 第一个未完成且不早于 today 的里程碑；都已过期时取最早未完成的
pub fn next_deadline(milestones: &[Milestone], today: NaiveDate) -> Option<&Milestone> {
    let open = || milestones.iter().filter(|m| !m.done);
    open()
        .filter(|m| m.due_date >= today)
        .min_by_key(|m| m.due_date)
        .or_else(|| open().min_by_key(|m| m.due_date))
}

fn render(project: &str, milestones: &[Milestone], next: Option<&Milestone>, today: NaiveDate) -> String {
    if milestones.is_empty() {
        return format!(
            "No milestones are recorded for project '{project}' yet. Add milestones with target dates to track your next deadline."
        );
    }

    let mut lines = Vec::with_capacity(milestones.len() + 2);
    match next {
        Some(m) => {
            let days = (m.due_date - today).num_days();
            let when = match days {
                d if d < 0 => format!("overdue by {} day(s)", -d),
                0 => "due today".to_string(),
                d => format!("in {d} day(s)"),
            };
            lines.push(format!(
                "Next deadline for '{project}': {} on {} ({when}).",
                m.title, m.due_date
            ));
        }
        None => lines.push(format!("All milestones for '{project}' are complete.")),
    }
    lines.push("Milestones:".to_string());
    for m in milestones {
        let mark = if m.done { "x" } else { " " };
        lines.push(format!("- [{mark}] {} ({})", m.title, m.due_date));
    }
    lines.join("\n")
}

#[async_trait]
impl Runnable for TimelineAgent {
    fn name(&self) -> &str {
        "project_timeline"
    }

    async fn run(&self, _instruction: &str) -> Result<AgentResponse, AgentError> {
        let milestones = self.milestones()?;
        let today = Utc::now().date_naive();
        let next = next_deadline(&milestones, today);
        let text = render(&self.project, &milestones, next, today);
        Ok(AgentResponse::Structured(json!({
            "project": self.project,
            "milestones": milestones,
            "next_deadline": next,
            "text": text,
        })))
    }
}
