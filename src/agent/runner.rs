//! Agent runner with tool calling loop.

use super::normalize::{normalize_text, ToolDefaults, ToolRequest};
use super::sanitize::{parse_trace, TraceStep};
use super::tools::{ToolKind, Toolkit};
use crate::error::{ParleyError, Result};
use crate::llm::{ChatMessage, ChatRequest};
use std::time::Duration;
use tracing::{debug, info};

/// Content reported when the loop runs out of iterations.
pub const STOPPED_MESSAGE: &str = "Agent stopped due to iteration limit or time limit.";

/// Agent that lets the model pick among a fixed set of tools.
pub struct Agent {
    toolkit: Toolkit,
    tools: Vec<ToolKind>,
    max_iterations: usize,
    max_execution_time: Duration,
    system_prompt: String,
}

impl Agent {
    /// Create a new agent over the given tools.
    pub fn new(toolkit: Toolkit, tools: &[ToolKind]) -> Self {
        Self {
            toolkit,
            tools: tools.to_vec(),
            max_iterations: 3,
            max_execution_time: Duration::from_secs(120),
            system_prompt: String::new(),
        }
    }

    /// Set the system prompt.
    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    /// Set maximum model calls per run.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    /// Set the wall-clock budget for one run.
    pub fn with_max_execution_time(mut self, limit: Duration) -> Self {
        self.max_execution_time = limit;
        self
    }

    pub fn toolkit(&self) -> &Toolkit {
        &self.toolkit
    }

    /// Run the agent on one input. `defaults` fills fields missing from tool calls.
    pub async fn run(&self, input: &str, defaults: &ToolDefaults) -> Result<AgentResponse> {
        let limit = self.max_execution_time;
        tokio::time::timeout(limit, self.run_loop(input, defaults))
            .await
            .map_err(|_| ParleyError::Timeout(limit.as_secs()))?
    }

    async fn run_loop(&self, input: &str, defaults: &ToolDefaults) -> Result<AgentResponse> {
        let mut messages = Vec::with_capacity(4);
        if !self.system_prompt.is_empty() {
            messages.push(ChatMessage::system(self.system_prompt.clone()));
        }
        messages.push(ChatMessage::user(input));

        let specs: Vec<_> = self.tools.iter().map(ToolKind::spec).collect();
        let mut tool_calls_made = Vec::new();

        for iteration in 1..=self.max_iterations {
            debug!("Agent iteration {}", iteration);

            let request = ChatRequest {
                messages: messages.clone(),
                tools: specs.clone(),
            };
            let key = self.toolkit.keys().rotate(false);
            let reply = self.toolkit.model().chat(&key, &request).await?;

            // Native tool calls
            if !reply.tool_calls.is_empty() {
                messages.push(ChatMessage::Assistant {
                    content: reply.content.clone(),
                    tool_calls: reply.tool_calls.clone(),
                });

                for call in &reply.tool_calls {
                    let record = self.execute_tool_call(&call.name, &call.arguments, defaults).await;
                    messages.push(ChatMessage::Tool {
                        call_id: call.id.clone(),
                        content: record.result.clone(),
                    });
                    tool_calls_made.push(record);
                }
                continue;
            }

            let content = reply.content.unwrap_or_default();
            match parse_trace(&content) {
                TraceStep::Action { tool, input } => {
                    let record = self.execute_tool_call(&tool, &input, defaults).await;
                    messages.push(ChatMessage::Assistant {
                        content: Some(content),
                        tool_calls: Vec::new(),
                    });
                    messages.push(ChatMessage::user(format!("Observation: {}", record.result)));
                    tool_calls_made.push(record);
                }
                TraceStep::Malformed(observation) => {
                    debug!("Malformed reasoning trace: {}", observation);
                    messages.push(ChatMessage::Assistant {
                        content: Some(content),
                        tool_calls: Vec::new(),
                    });
                    messages.push(ChatMessage::user(format!("Observation: {}", observation)));
                }
                TraceStep::Final(_) | TraceStep::Plain(_) => {
                    return Ok(AgentResponse {
                        content,
                        tool_calls: tool_calls_made,
                        iterations: iteration,
                        stopped: false,
                    });
                }
            }
        }

        Ok(AgentResponse {
            content: STOPPED_MESSAGE.to_string(),
            tool_calls: tool_calls_made,
            iterations: self.max_iterations,
            stopped: true,
        })
    }

    /// Execute a single tool call and return a record of it.
    async fn execute_tool_call(
        &self,
        name: &str,
        arguments: &str,
        defaults: &ToolDefaults,
    ) -> ToolCallRecord {
        info!("Agent calling tool: {}", name);

        let kind = ToolKind::from_name(name).filter(|kind| self.tools.contains(kind));
        let (request, result) = match kind {
            Some(kind) => {
                let request = normalize_text(kind, arguments, defaults);
                let result = self.toolkit.invoke(&request).await;
                (Some(request), result)
            }
            None => {
                let names = self
                    .tools
                    .iter()
                    .map(|kind| kind.name())
                    .collect::<Vec<_>>()
                    .join(", ");
                (
                    None,
                    format!("{} is not a valid tool, try one of [{}].", name, names),
                )
            }
        };

        ToolCallRecord {
            name: name.to_string(),
            arguments: arguments.to_string(),
            request,
            result,
        }
    }
}

/// Response from an agent run.
#[derive(Debug)]
pub struct AgentResponse {
    /// The final response content from the agent.
    pub content: String,
    /// Record of all tool calls made during execution.
    pub tool_calls: Vec<ToolCallRecord>,
    /// Number of iterations (model calls) used.
    pub iterations: usize,
    /// True when the iteration cap ended the run.
    pub stopped: bool,
}

impl AgentResponse {
    /// First successfully routed tool call.
    pub fn first_tool_call(&self) -> Option<&ToolCallRecord> {
        self.tool_calls.iter().find(|record| record.request.is_some())
    }
}

/// Record of a tool call made by the agent.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    /// Name of the tool called.
    pub name: String,
    /// Raw arguments as produced by the model.
    pub arguments: String,
    /// The repaired request, if the tool was known.
    pub request: Option<ToolRequest>,
    /// Result returned by the tool.
    pub result: String,
}

impl ToolCallRecord {
    pub fn kind(&self) -> Option<ToolKind> {
        self.request.as_ref().map(ToolRequest::kind)
    }
}

impl std::fmt::Display for ToolCallRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.arguments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Prompts;
    use crate::credentials::{KeyRotator, SharedRotator};
    use crate::llm::mock::ScriptedModel;
    use std::sync::Arc;

    fn agent(model: ScriptedModel, tools: &[ToolKind]) -> (Agent, Arc<ScriptedModel>) {
        let model = Arc::new(model);
        let keys = SharedRotator::new(KeyRotator::new(vec!["key".to_string()]).unwrap());
        let toolkit = Toolkit::new(model.clone(), keys, Arc::new(Prompts::default()));
        (Agent::new(toolkit, tools), model)
    }

    fn defaults() -> ToolDefaults {
        ToolDefaults::from([("subject".to_string(), "Databases".to_string())])
    }

    #[test]
    fn test_tool_call_record_display() {
        let record = ToolCallRecord {
            name: "end_interview".to_string(),
            arguments: r#"{"subject": "test"}"#.to_string(),
            request: None,
            result: "Done".to_string(),
        };
        assert_eq!(format!("{}", record), r#"end_interview({"subject": "test"})"#);
    }

    #[tokio::test]
    async fn test_single_iteration_stops_after_tool() {
        let model = ScriptedModel::new()
            .tool_call("viva_question_generator", "{}")
            .text("What is a foreign key?");
        let (agent, model) = agent(model, &ToolKind::EXAMINATION);
        let agent = agent.with_max_iterations(1);

        let response = agent.run("Student: hi", &defaults()).await.unwrap();
        assert!(response.stopped);
        assert_eq!(response.content, STOPPED_MESSAGE);
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].result, "What is a foreign key?");
        assert_eq!(response.tool_calls[0].kind(), Some(ToolKind::VivaQuestion));

        // One agent call plus one tool call.
        assert_eq!(model.call_count(), 2);
        assert!(model.prompt(1).contains("Databases"));
    }

    #[tokio::test]
    async fn test_text_action_is_routed() {
        let model = ScriptedModel::new()
            .text("Thought: ask\nAction: patient_analysis\nAction Input: {\"user_input\": \"fever\"}")
            .text("Drink fluids and rest.")
            .text("Final Answer: Drink fluids and rest.");
        let (agent, _) = agent(model, &ToolKind::CONSULTATION);

        let response = agent.run("Patient: fever", &ToolDefaults::new()).await.unwrap();
        assert!(!response.stopped);
        assert_eq!(response.iterations, 2);
        assert_eq!(response.content, "Final Answer: Drink fluids and rest.");
        assert_eq!(response.tool_calls[0].result, "Drink fluids and rest.");
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_observation() {
        let model = ScriptedModel::new()
            .tool_call("search", "{}")
            .text("Plain answer");
        let (agent, model) = agent(model, &ToolKind::CONSULTATION);

        let response = agent.run("hello", &ToolDefaults::new()).await.unwrap();
        assert_eq!(response.content, "Plain answer");
        assert!(response.tool_calls[0]
            .result
            .contains("is not a valid tool, try one of [patient_analysis]"));
        assert!(response.first_tool_call().is_none());

        let second = &model.calls()[1].1;
        assert!(matches!(second.messages.last(), Some(ChatMessage::Tool { .. })));
    }

    #[tokio::test]
    async fn test_model_error_propagates() {
        let (agent, _) = agent(ScriptedModel::new().fail("down"), &ToolKind::EXAMINATION);
        assert!(agent.run("hi", &ToolDefaults::new()).await.is_err());
    }
}
