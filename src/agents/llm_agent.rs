//! 通用 LLM 角色 Agent
//!
//! 角色指令 + LLM + 可选工具。有工具时先执行工具，再把结果交给 LLM 整理；
//! LLM 未配置或调用失败时直接返回工具原始输出；既无 LLM 又无工具则报错。

use std::sync::Arc;

use async_trait::async_trait;

use crate::agents::{AgentResponse, Runnable};
use crate::core::{AgentError, LlmError};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::tools::Tool;

pub struct LlmAgent {
    name: String,
    instructions: String,
    llm: Arc<dyn LlmClient>,
    tool: Option<Arc<dyn Tool>>,
}

impl LlmAgent {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            llm,
            tool: None,
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tool = Some(tool);
        self
    }

    async fn run_tool(&self, instruction: &str) -> Result<Option<String>, AgentError> {
        let Some(tool) = &self.tool else {
            return Ok(None);
        };
        let args = tool.args_from_instruction(instruction);
        tool.execute(args)
            .await
            .map(Some)
            .map_err(|message| AgentError::Tool {
                tool: tool.name().to_string(),
                message,
            })
    }
}

#[async_trait]
impl Runnable for LlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, instruction: &str) -> Result<AgentResponse, AgentError> {
        let tool_output = self.run_tool(instruction).await?;

        if !self.llm.is_configured() {
            return tool_output
                .map(AgentResponse::Text)
                .ok_or(AgentError::Llm(LlmError::NotConfigured));
        }

        let mut user = instruction.to_string();
        if let Some(output) = &tool_output {
            user.push_str("\n\n## Tool results\n");
            user.push_str(output);
        }
        let messages = [Message::system(self.instructions.clone()), Message::user(user)];

        match self.llm.complete(&messages).await {
            Ok(text) => Ok(AgentResponse::Text(text)),
            Err(e) => match tool_output {
                Some(output) => {
                    tracing::warn!(agent = %self.name, error = %e, "LLM failed, returning raw tool output");
                    Ok(AgentResponse::Text(output))
                }
                None => Err(e.into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, NullLlmClient};
    use serde_json::Value;

    struct FixedTool(&'static str);

    #[async_trait]
    impl Tool for FixedTool {
        fn name(&self) -> &str {
            "fixed"
        }

        fn description(&self) -> &str {
            "returns a fixed string"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_without_llm_returns_tool_output() {
        let agent = LlmAgent::new("lit", "You search.", Arc::new(NullLlmClient))
            .with_tool(Arc::new(FixedTool(r#"{"count": 2}"#)));
        let out = agent.run("Search PubMed for: x").await.unwrap();
        assert_eq!(out, AgentResponse::Text(r#"{"count": 2}"#.to_string()));
    }

    #[tokio::test]
    async fn test_without_llm_or_tool_fails() {
        let agent = LlmAgent::new("picot", "You write PICOT.", Arc::new(NullLlmClient));
        let err = agent.run("Generate").await.unwrap_err();
        assert!(matches!(err, AgentError::Llm(LlmError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_tool_output_passed_to_llm() {
        let llm = Arc::new(MockLlmClient::with_responses(["summary"]));
        let agent = LlmAgent::new("lit", "You search.", llm.clone())
            .with_tool(Arc::new(FixedTool("RAW RESULTS")));
        let out = agent.run("Search PubMed for: x").await.unwrap();
        assert_eq!(out, AgentResponse::Text("summary".to_string()));

        let received = llm.received();
        assert_eq!(received[0][0].content, "You search.");
        assert!(received[0][1].content.contains("RAW RESULTS"));
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back_to_tool_output() {
        let llm = Arc::new(MockLlmClient::new());
        llm.push_response(Err(LlmError::Timeout(30)));
        let agent = LlmAgent::new("lit", "You search.", llm)
            .with_tool(Arc::new(FixedTool("RAW")));
        assert_eq!(
            agent.run("q").await.unwrap(),
            AgentResponse::Text("RAW".to_string())
        );
    }
}
