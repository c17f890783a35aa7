//! Chat model abstraction.
//!
//! Agents and tools talk to the provider through [`ChatModel`], passing the
//! credential to use on every call so each session can rotate its own keys.

use crate::config::LlmSettings;
use crate::error::{ParleyError, Result};
use crate::openai::{create_client, http_client};
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContentPart, ChatCompletionTool, ChatCompletionToolType,
    CreateChatCompletionRequestArgs, FunctionCall, FunctionObject, ImageDetail, ImageUrlArgs,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// A message in a chat request.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    System(String),
    User {
        text: String,
        /// Optional image as a URL or `data:` URL.
        image: Option<String>,
    },
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool {
        call_id: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        ChatMessage::System(text.into())
    }

    pub fn user(text: impl Into<String>) -> Self {
        ChatMessage::User {
            text: text.into(),
            image: None,
        }
    }

    pub fn user_with_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        ChatMessage::User {
            text: text.into(),
            image: Some(image_url.into()),
        }
    }
}

/// A tool the model may call, described by a JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A tool call emitted by the model. `arguments` is whatever text the model
/// produced; it is not guaranteed to be valid JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// A single chat completion request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
}

impl ChatRequest {
    /// A single-prompt request with no tools.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(text)],
            tools: Vec::new(),
        }
    }
}

/// The model's reply to a chat request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ChatReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(name: &str, arguments: &str) -> Self {
        Self {
            content: None,
            tool_calls: vec![ToolCallRequest {
                id: format!("call_{}", name),
                name: name.to_string(),
                arguments: arguments.to_string(),
            }],
        }
    }
}

/// Trait for chat completion backends.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one chat completion using the given credential.
    async fn chat(&self, api_key: &str, request: &ChatRequest) -> Result<ChatReply>;
}

/// Chat model backed by any OpenAI-compatible endpoint (Gemini by default).
pub struct OpenAiChatModel {
    model: String,
    api_base: String,
    temperature: f32,
    http: reqwest::Client,
}

impl OpenAiChatModel {
    /// Create a model client from settings.
    pub fn from_settings(settings: &LlmSettings) -> Result<Self> {
        Ok(Self {
            model: settings.model.clone(),
            api_base: settings.api_base.clone(),
            temperature: settings.temperature,
            http: http_client(Duration::from_secs(settings.timeout_seconds))?,
        })
    }

    fn build_messages(&self, messages: &[ChatMessage]) -> Result<Vec<ChatCompletionRequestMessage>> {
        messages.iter().map(convert_message).collect()
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn chat(&self, api_key: &str, request: &ChatRequest) -> Result<ChatReply> {
        let client = create_client(api_key, &self.api_base, self.http.clone());

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model)
            .messages(self.build_messages(&request.messages)?)
            .temperature(self.temperature);

        if !request.tools.is_empty() {
            builder.tools(request.tools.iter().map(convert_tool).collect::<Vec<_>>());
        }

        let request = builder.build().map_err(provider_error)?;

        debug!("Sending chat request to {}", self.model);

        let response = client
            .chat()
            .create(request)
            .await
            .map_err(|e| ParleyError::Provider(format!("Chat API error: {}", e)))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ParleyError::Provider("No response from model".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCallRequest {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();

        Ok(ChatReply {
            content: choice.message.content,
            tool_calls,
        })
    }
}

fn provider_error(e: async_openai::error::OpenAIError) -> ParleyError {
    ParleyError::Provider(e.to_string())
}

fn convert_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage> {
    let converted: ChatCompletionRequestMessage = match message {
        ChatMessage::System(text) => ChatCompletionRequestSystemMessageArgs::default()
            .content(text.clone())
            .build()
            .map_err(provider_error)?
            .into(),

        ChatMessage::User { text, image: None } => ChatCompletionRequestUserMessageArgs::default()
            .content(text.clone())
            .build()
            .map_err(provider_error)?
            .into(),

        ChatMessage::User {
            text,
            image: Some(url),
        } => {
            let parts: Vec<ChatCompletionRequestUserMessageContentPart> = vec![
                ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(text.clone())
                    .build()
                    .map_err(provider_error)?
                    .into(),
                ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(
                        ImageUrlArgs::default()
                            .url(url.clone())
                            .detail(ImageDetail::Auto)
                            .build()
                            .map_err(provider_error)?,
                    )
                    .build()
                    .map_err(provider_error)?
                    .into(),
            ];

            ChatCompletionRequestUserMessageArgs::default()
                .content(parts)
                .build()
                .map_err(provider_error)?
                .into()
        }

        ChatMessage::Assistant {
            content,
            tool_calls,
        } => {
            let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
            if let Some(content) = content {
                builder.content(content.clone());
            }
            if !tool_calls.is_empty() {
                builder.tool_calls(
                    tool_calls
                        .iter()
                        .map(|call| ChatCompletionMessageToolCall {
                            id: call.id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: FunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            },
                        })
                        .collect::<Vec<_>>(),
                );
            }
            builder.build().map_err(provider_error)?.into()
        }

        ChatMessage::Tool { call_id, content } => ChatCompletionRequestToolMessageArgs::default()
            .tool_call_id(call_id.clone())
            .content(content.clone())
            .build()
            .map_err(provider_error)?
            .into(),
    };

    Ok(converted)
}

fn convert_tool(spec: &ToolSpec) -> ChatCompletionTool {
    ChatCompletionTool {
        r#type: ChatCompletionToolType::Function,
        function: FunctionObject {
            name: spec.name.clone(),
            description: Some(spec.description.clone()),
            parameters: Some(spec.parameters.clone()),
            strict: None,
        },
    }
}

/// Scripted chat model for tests.
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays queued replies in order and records every call.
    #[derive(Default)]
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<Result<ChatReply>>>,
        calls: Mutex<Vec<(String, ChatRequest)>>,
    }

    impl ScriptedModel {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(self, reply: ChatReply) -> Self {
            self.replies.lock().unwrap().push_back(Ok(reply));
            self
        }

        pub fn text(self, content: &str) -> Self {
            self.reply(ChatReply::text(content))
        }

        pub fn tool_call(self, name: &str, arguments: &str) -> Self {
            self.reply(ChatReply::tool_call(name, arguments))
        }

        pub fn fail(self, message: &str) -> Self {
            self.replies
                .lock()
                .unwrap()
                .push_back(Err(ParleyError::Provider(message.to_string())));
            self
        }

        /// Keys and requests seen so far.
        pub fn calls(&self) -> Vec<(String, ChatRequest)> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        /// Prompt text of the last user message of call `index`.
        pub fn prompt(&self, index: usize) -> String {
            let calls = self.calls.lock().unwrap();
            calls[index]
                .1
                .messages
                .iter()
                .rev()
                .find_map(|m| match m {
                    ChatMessage::User { text, .. } => Some(text.clone()),
                    _ => None,
                })
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn chat(&self, api_key: &str, request: &ChatRequest) -> Result<ChatReply> {
            self.calls
                .lock()
                .unwrap()
                .push((api_key.to_string(), request.clone()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ParleyError::Provider("script exhausted".to_string())))
        }
    }
}
