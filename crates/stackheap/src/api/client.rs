//! OpenRouter client and the [`ModelBackend`] seam.

use super::{
    ApiError, CallType, ChatRequest, FunctionCallData, Message, OPENROUTER_URL, RawChatResponse,
    RetryConfig, ToolCall, ToolDef, UsageInfo,
};
use crate::turn::{Role, Turn};
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Boxed future returned by [`ModelBackend::complete`].
pub type CompletionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<Turn>, ApiError>> + Send + 'a>>;

/// Everything the model needs for one cycle.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub system: String,
    pub turns: Vec<Turn>,
    pub tools: Vec<ToolDef>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Produces the next batch of turns for a conversation.
///
/// The returned turns are in model order: reasoning, assistant text, then
/// tool calls. Implementations must not execute tools.
pub trait ModelBackend: Send + Sync {
    fn complete<'a>(&'a self, request: &'a ModelRequest) -> CompletionFuture<'a>;
}

// ── Response ───────────────────────────────────────────────────────

/// Parsed chat completion response.
#[derive(Debug, Clone, Default)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<UsageInfo>,
    pub reasoning: Option<String>,
}

impl ChatCompletion {
    /// Convert into turns, skipping empty text and reasoning.
    pub fn into_turns(self) -> Vec<Turn> {
        let mut turns = Vec::with_capacity(self.tool_calls.len() + 2);
        if let Some(reasoning) = self.reasoning.filter(|r| !r.trim().is_empty()) {
            turns.push(Turn::reasoning(reasoning));
        }
        if let Some(content) = self.content.filter(|c| !c.trim().is_empty()) {
            turns.push(Turn::assistant(content));
        }
        turns.extend(
            self.tool_calls
                .into_iter()
                .map(|tc| Turn::tool_call(tc.id, tc.function.name, tc.function.arguments)),
        );
        turns
    }
}

// ── Conversion ─────────────────────────────────────────────────────

/// Convert a system prompt plus turns into chat-completions messages.
///
/// Reasoning is never sent back. Consecutive tool calls are grouped into a
/// single assistant message, attached to the assistant text right before
/// them when there is one.
pub fn to_messages(system: &str, turns: &[Turn]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    if !system.is_empty() {
        messages.push(Message::system(system));
    }
    for turn in turns {
        match turn {
            Turn::Reasoning { .. } => {}
            Turn::Message { role, content } => messages.push(match role {
                Role::System => Message::system(content.as_str()),
                Role::User => Message::user(content.as_str()),
                Role::Assistant => Message::assistant_text(content.as_str()),
            }),
            Turn::ToolCall {
                call_id,
                name,
                arguments,
            } => {
                let call = ToolCall {
                    id: call_id.clone(),
                    call_type: CallType::Function,
                    function: FunctionCallData {
                        name: name.clone(),
                        arguments: arguments.clone(),
                    },
                };
                match messages.last_mut() {
                    Some(last) if last.role == super::MessageRole::Assistant => {
                        last.tool_calls.get_or_insert_with(Vec::new).push(call);
                    }
                    _ => messages.push(Message::assistant_tool_calls(vec![call])),
                }
            }
            Turn::ToolResult { call_id, output } => {
                messages.push(Message::tool_result(call_id.as_str(), output.as_str()));
            }
        }
    }
    messages
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    referer: String,
    title: String,
    retry: RetryConfig,
}

impl OpenRouterClient {
    /// Create a new client with the given API key and default headers.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_headers(api_key, "https://github.com/tacryt-socryp/stackheap", "stackheap")
    }

    /// Create a new client with custom Referer and X-Title headers.
    pub fn with_headers(
        api_key: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .user_agent("stackheap/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ApiError::Client(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            referer: referer.into(),
            title: title.into(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Send a chat completion request once, without retrying.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, ApiError> {
        debug!(
            "LLM request: model={}, messages={}, tools={}, max_tokens={}, temp={}",
            body.model,
            body.messages.len(),
            body.tools.as_ref().map_or(0, |t| t.len()),
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let resp = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Request(format!("failed to read response: {e}")))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_response(&text)
    }

    async fn complete_with_retry(&self, request: &ModelRequest) -> Result<Vec<Turn>, ApiError> {
        let body = ChatRequest {
            model: request.model.clone(),
            messages: to_messages(&request.system, &request.turns),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: (!request.tools.is_empty()).then(|| request.tools.clone()),
        };
        let completion = self.retry.run(|| self.chat(&body)).await?;
        Ok(completion.into_turns())
    }
}

impl ModelBackend for OpenRouterClient {
    fn complete<'a>(&'a self, request: &'a ModelRequest) -> CompletionFuture<'a> {
        Box::pin(self.complete_with_retry(request))
    }
}

fn parse_response(text: &str) -> Result<ChatCompletion, ApiError> {
    let parsed: RawChatResponse =
        serde_json::from_str(text).map_err(|e| ApiError::Parse(e.to_string()))?;

    if let Some(err) = parsed.error {
        return Err(ApiError::Api(err.message));
    }

    if let Some(ref usage) = parsed.usage {
        debug!(
            "Token usage: prompt={}, completion={}, total={}",
            usage.prompt_tokens.unwrap_or(0),
            usage.completion_tokens.unwrap_or(0),
            usage.total_tokens.unwrap_or(0),
        );
    }

    match parsed.choices.and_then(|c| c.into_iter().next()) {
        Some(c) => {
            let tool_calls = c.message.tool_calls.unwrap_or_default();
            debug!(
                "LLM output: {} chars text, {} tool call(s)",
                c.message.content.as_ref().map_or(0, |s| s.len()),
                tool_calls.len()
            );
            Ok(ChatCompletion {
                content: c.message.content,
                tool_calls,
                usage: parsed.usage,
                reasoning: c.message.reasoning,
            })
        }
        None => {
            debug!("LLM output: empty (no choices)");
            Ok(ChatCompletion {
                usage: parsed.usage,
                ..Default::default()
            })
        }
    }
}
