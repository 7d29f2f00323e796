use std::time::Duration;

use async_trait::async_trait;
use gilfoyle_core::{Collaborator, GilfoyleError, LlmConfig, ReviewVerdict};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ports::{Reasoner, ReviewContext};
use crate::prompt::{build_review_prompt, build_system_prompt, parse_verdict};
use crate::tools::{definitions, dispatch, ReviewTools, ToolCall};

/// A message in a chat conversation with the model.
///
/// # Examples
///
/// ```
/// use gilfoyle_review::llm::{ChatMessage, Role};
///
/// let msg = ChatMessage::user("Review this code");
/// assert!(matches!(msg.role, Role::User));
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    /// Absent on assistant turns that only request tools.
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// Result of a tool call, answering the request with `id`.
    pub fn tool(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(id.into()),
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// Role in the chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the model, in wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string.
    pub arguments: String,
}

impl Serialize for ToolCallRequest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serde_json::json!({
            "id": self.id,
            "type": "function",
            "function": { "name": self.name, "arguments": self.arguments },
        })
        .serialize(serializer)
    }
}

/// The assistant turn of a chat completion.
#[derive(Debug, Clone, Default)]
pub struct AssistantMessage {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl AssistantMessage {
    fn into_message(self) -> ChatMessage {
        ChatMessage {
            role: Role::Assistant,
            content: self.content,
            tool_calls: self.tool_calls,
            tool_call_id: None,
        }
    }
}

/// OpenAI-compatible chat completions client.
///
/// Works with any provider exposing `/v1/chat/completions`, including
/// Anthropic's compatibility endpoint.
///
/// # Examples
///
/// ```
/// use gilfoyle_core::LlmConfig;
/// use gilfoyle_review::llm::LlmClient;
///
/// let config = LlmConfig {
///     api_key: Some("test-key".into()),
///     ..LlmConfig::default()
/// };
/// let client = LlmClient::new(&config).unwrap();
/// assert_eq!(client.model(), config.model);
/// ```
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    /// # Errors
    ///
    /// Returns [`GilfoyleError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, GilfoyleError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| GilfoyleError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send one chat completion request.
    ///
    /// # Errors
    ///
    /// Transport failures, 429 and 5xx are transient; other statuses and
    /// responses without a message are permanent.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&Value>,
    ) -> Result<AssistantMessage, GilfoyleError> {
        let url = format!("{}/v1/chat/completions", self.config.effective_base_url());

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });
        if let Some(tools) = tools {
            body["tools"] = tools.clone();
            body["tool_choice"] = Value::from("auto");
        }

        let mut request = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GilfoyleError::transport(Collaborator::Reasoner, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(GilfoyleError::from_status(
                Collaborator::Reasoner,
                status.as_u16(),
                &body_text,
            ));
        }

        let response_body: Value = response
            .json()
            .await
            .map_err(|e| GilfoyleError::transport(Collaborator::Reasoner, e))?;
        parse_completion(&response_body)
    }
}

/// Extract the assistant message from a chat completion response body.
///
/// # Errors
///
/// Returns [`GilfoyleError::PermanentCollaborator`] when `choices[0].message`
/// is missing.
pub fn parse_completion(body: &Value) -> Result<AssistantMessage, GilfoyleError> {
    let message = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| GilfoyleError::PermanentCollaborator {
            collaborator: Collaborator::Reasoner,
            message: format!("unexpected response structure: {body}"),
        })?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string);

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let function = call.get("function")?;
                    Some(ToolCallRequest {
                        id: call.get("id")?.as_str()?.to_string(),
                        name: function.get("name")?.as_str()?.to_string(),
                        arguments: function
                            .get("arguments")
                            .and_then(Value::as_str)
                            .unwrap_or("{}")
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(AssistantMessage {
        content,
        tool_calls,
    })
}

const FINAL_ROUND_NUDGE: &str =
    "Tool budget exhausted. Reply now with the final JSON verdict and nothing else.";

/// [`Reasoner`] driving a chat model through a bounded tool-use loop.
pub struct LlmReasoner {
    client: LlmClient,
    max_tool_rounds: usize,
}

impl LlmReasoner {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, GilfoyleError> {
        Ok(Self {
            client: LlmClient::new(config)?,
            max_tool_rounds: config.max_tool_rounds.max(1),
        })
    }
}

#[async_trait]
impl Reasoner for LlmReasoner {
    async fn review(
        &self,
        context: &ReviewContext,
        tools: &dyn ReviewTools,
    ) -> Result<ReviewVerdict, GilfoyleError> {
        let tool_defs = definitions();
        let mut messages = vec![
            ChatMessage::system(build_system_prompt()),
            ChatMessage::user(build_review_prompt(context)),
        ];

        for round in 1..=self.max_tool_rounds {
            let last_round = round == self.max_tool_rounds;
            if last_round && round > 1 {
                messages.push(ChatMessage::user(FINAL_ROUND_NUDGE));
            }
            let offered = if last_round { None } else { Some(&tool_defs) };
            let reply = self.client.chat(&messages, offered).await?;

            if reply.tool_calls.is_empty() {
                let text = reply.content.unwrap_or_default();
                return parse_verdict(&text);
            }

            tracing::debug!(round, calls = reply.tool_calls.len(), "model requested tools");
            let calls = reply.tool_calls.clone();
            messages.push(reply.into_message());
            for call in calls {
                let output = match ToolCall::parse(&call.name, &call.arguments) {
                    Ok(parsed) => dispatch(tools, &parsed).await,
                    Err(message) => {
                        tracing::warn!(tool = %call.name, %message, "rejected tool call");
                        format!("Error: {message}")
                    }
                };
                messages.push(ChatMessage::tool(call.id, output));
            }
        }

        Err(GilfoyleError::PermanentCollaborator {
            collaborator: Collaborator::Reasoner,
            message: format!(
                "no verdict after {} rounds of tool use",
                self.max_tool_rounds
            ),
        })
    }
}
