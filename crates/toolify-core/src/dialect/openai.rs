//! OpenAI Chat Completions wire types, and their conversion to/from the canonical shape.
//!
//! These mirror the request/response bodies described in OpenAI's Chat Completions API.
//! Every upstream configured in this proxy also speaks this exact wire format, so these
//! types double as the upstream request/response shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::{
    CanonicalArguments, CanonicalBlock, CanonicalChoice, CanonicalChoiceDelta, CanonicalChunk, CanonicalContent,
    CanonicalFinishReason, CanonicalFunction, CanonicalFunctionCall, CanonicalFunctionChoice, CanonicalFunctionDelta,
    CanonicalFunctionStart, CanonicalMessage, CanonicalMessageDelta, CanonicalModel, CanonicalRequest,
    CanonicalResponse, CanonicalRole, CanonicalStreamingToolCall, CanonicalTool, CanonicalToolCall,
    CanonicalToolChoice, CanonicalToolChoiceMode, CanonicalToolResultContent, CanonicalUsage,
};

/// `POST /chat/completions` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// Target model.
    pub model: String,
    /// Conversation so far.
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Sampling temperature.
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Response token cap.
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Nucleus sampling cutoff.
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Repetition penalty.
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Topic-diversity penalty.
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Stop sequences.
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Whether to stream the response as SSE.
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Tools the model may call.
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Tool-use policy.
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Whether multiple tool calls may be returned at once.
    pub parallel_tool_calls: Option<bool>,
}

/// A single message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender role.
    pub role: ChatRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Message text. Absent on assistant messages that consist solely of tool calls.
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Tool calls requested by the assistant.
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// For a `tool` role message, the call this is a result for.
    pub tool_call_id: Option<String>,
}

/// Message sender role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    /// System instructions.
    System,
    /// Renamed from `System` when `convert_developer_to_system` normalizes a
    /// `developer`-role message.
    Developer,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// A tool execution result.
    Tool,
}

/// A tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    /// Always `function`.
    pub tool_type: ToolCallType,
    /// The function itself.
    pub function: FunctionDefinition,
}

/// Discriminator for tool/tool-call kinds. OpenAI only defines `function` today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallType {
    /// A callable function.
    Function,
}

/// A function's name, description, and parameter schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Function name.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON Schema for the accepted arguments.
    pub parameters: Value,
}

/// Tool-use policy, either a named mode or a forced specific tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// A general policy.
    Mode(ToolChoiceMode),
    /// Forces a specific tool.
    Specific {
        #[serde(rename = "type")]
        /// Always `function`.
        tool_type: ToolCallType,
        /// The tool to force.
        function: ToolChoiceFunction,
    },
}

/// General tool-use policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoiceMode {
    /// Tools must not be used.
    None,
    /// The model decides.
    Auto,
    /// At least one tool call is required.
    Required,
}

/// Names the tool forced by [`ToolChoice::Specific`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolChoiceFunction {
    /// Tool name.
    pub name: String,
}

/// A completed tool call in an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call id, e.g. `call_xxxx`.
    pub id: String,
    #[serde(rename = "type")]
    /// Always `function`.
    pub tool_type: ToolCallType,
    /// The call itself.
    pub function: FunctionCall,
}

/// Name and JSON-encoded arguments of a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name.
    pub name: String,
    /// Arguments as a JSON-encoded string.
    pub arguments: String,
}

/// `POST /chat/completions` non-streaming response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// Response id, e.g. `chatcmpl-xxxx`.
    pub id: String,
    /// Always `chat.completion`.
    pub object: ObjectType,
    /// Unix timestamp.
    pub created: u64,
    /// Model that produced the response.
    pub model: String,
    /// Response candidates.
    pub choices: Vec<ChatChoice>,
    /// Token accounting.
    pub usage: Usage,
}

/// Discriminator for the `object` field carried by most OpenAI response bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectType {
    /// A single model entry.
    #[serde(rename = "model")]
    Model,
    /// A list container.
    #[serde(rename = "list")]
    List,
    /// A non-streaming chat completion.
    #[serde(rename = "chat.completion")]
    ChatCompletion,
    /// A streaming chat completion chunk.
    #[serde(rename = "chat.completion.chunk")]
    ChatCompletionChunk,
}

/// A single response candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    /// Index among choices.
    pub index: u32,
    /// The generated message.
    pub message: ChatMessage,
    /// Why generation stopped.
    pub finish_reason: FinishReason,
}

/// Token usage for a request/response pair.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    pub prompt_tokens: u32,
    /// Completion tokens.
    pub completion_tokens: u32,
    /// Sum of the two.
    pub total_tokens: u32,
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural completion.
    Stop,
    /// Hit `max_tokens`.
    Length,
    /// Blocked by content policy.
    ContentFilter,
    /// Carries one or more tool calls.
    ToolCalls,
}

/// A single SSE chunk of a streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    /// Id shared across every chunk of one response.
    pub id: String,
    /// Always `chat.completion.chunk`.
    pub object: ObjectType,
    /// Unix timestamp.
    pub created: u64,
    /// Model generating the response.
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Backend fingerprint, passed through verbatim when present upstream.
    pub system_fingerprint: Option<String>,
    /// Incremental choice updates.
    pub choices: Vec<ChatChoiceDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Cumulative usage, present only on the final chunk in most deployments.
    pub usage: Option<Usage>,
}

/// Incremental update to one choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoiceDelta {
    /// Index among choices.
    pub index: u32,
    /// Incremental content.
    pub delta: ChatMessageDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Token log-probabilities, never populated by this proxy.
    pub logprobs: Option<Value>,
    /// Present only on the final chunk for this choice.
    pub finish_reason: Option<FinishReason>,
}

/// Incremental message content in a streaming chunk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatMessageDelta {
    /// Present only on the first chunk.
    pub role: Option<ChatRole>,
    /// Text fragment to append.
    pub content: Option<String>,
    /// Legacy single-function-call delta, never emitted by this proxy.
    pub function_call: Option<Value>,
    /// Tool call fragments to append.
    pub tool_calls: Option<Vec<StreamingToolCall>>,
}

impl Serialize for ChatMessageDelta {
    /// `role`/`function_call`/`tool_calls` are omitted entirely when absent, matching
    /// upstream's own streaming shape. `content` is the one exception: once a chunk carries
    /// `tool_calls`, `content` always serializes too (as `null` when absent), matching the
    /// documented tool-call SSE synthesis shape rather than dropping the key.
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(None)?;
        if let Some(role) = &self.role {
            map.serialize_entry("role", role)?;
        }
        if self.content.is_some() || self.tool_calls.is_some() {
            map.serialize_entry("content", &self.content)?;
        }
        if let Some(function_call) = &self.function_call {
            map.serialize_entry("function_call", function_call)?;
        }
        if let Some(tool_calls) = &self.tool_calls {
            map.serialize_entry("tool_calls", tool_calls)?;
        }
        map.end()
    }
}

/// One fragment of a tool call being assembled across chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamingToolCall {
    /// Establishes a new tool call.
    Start {
        /// Index in the `tool_calls` array.
        index: usize,
        /// Call id.
        id: String,
        #[serde(rename = "type")]
        /// Always `function`.
        r#type: ToolCallType,
        /// Initial function name and (usually empty) arguments.
        function: FunctionStart,
    },
    /// Appends to a previously started call's arguments.
    Delta {
        /// Index of the call being appended to.
        index: usize,
        /// Argument fragment.
        function: FunctionDelta,
    },
}

/// Initial fields of a streaming tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionStart {
    /// Function name.
    pub name: String,
    /// Initial arguments fragment, usually empty.
    pub arguments: String,
}

/// An arguments fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDelta {
    /// Fragment to append.
    pub arguments: String,
}

/// A single entry in `GET /models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Model id, as used in request bodies.
    pub id: String,
    /// Always `model`.
    pub object: ObjectType,
    /// Unix timestamp, 0 when unknown.
    pub created: u64,
    /// Name of the upstream service exposing this model.
    pub owned_by: String,
}

/// `GET /models` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    /// Always `list`.
    pub object: ObjectType,
    /// The models.
    pub data: Vec<Model>,
}

impl From<ChatCompletionRequest> for CanonicalRequest {
    fn from(req: ChatCompletionRequest) -> Self {
        let mut system_parts = Vec::new();
        let mut messages = Vec::with_capacity(req.messages.len());

        for msg in req.messages {
            if matches!(msg.role, ChatRole::System) {
                if let Some(content) = msg.content {
                    system_parts.push(content);
                }
            } else {
                messages.push(CanonicalMessage::from(msg));
            }
        }

        let system = match system_parts.len() {
            0 => None,
            1 => system_parts.into_iter().next(),
            _ => Some(system_parts.join("\n")),
        };

        Self {
            model: req.model,
            messages,
            system,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: None,
            frequency_penalty: req.frequency_penalty,
            presence_penalty: req.presence_penalty,
            stop_sequences: req.stop,
            stream: req.stream,
            tools: req.tools.map(|t| t.into_iter().map(CanonicalTool::from).collect()),
            tool_choice: req.tool_choice.map(CanonicalToolChoice::from),
            parallel_tool_calls: req.parallel_tool_calls,
        }
    }
}

impl From<ChatRole> for CanonicalRole {
    fn from(role: ChatRole) -> Self {
        match role {
            ChatRole::System => CanonicalRole::System,
            ChatRole::Developer => CanonicalRole::Developer,
            ChatRole::User => CanonicalRole::User,
            ChatRole::Assistant => CanonicalRole::Assistant,
            ChatRole::Tool => CanonicalRole::Tool,
        }
    }
}

impl From<ChatMessage> for CanonicalMessage {
    fn from(msg: ChatMessage) -> Self {
        let role = CanonicalRole::from(msg.role);
        let content = CanonicalContent::Text(msg.content.unwrap_or_default());

        let tool_calls = msg.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|call| CanonicalToolCall {
                    id: call.id,
                    function: CanonicalFunctionCall {
                        name: call.function.name,
                        arguments: CanonicalArguments::String(call.function.arguments),
                    },
                })
                .collect()
        });

        Self { role, content, tool_calls, tool_call_id: msg.tool_call_id }
    }
}

impl From<Tool> for CanonicalTool {
    fn from(tool: Tool) -> Self {
        Self {
            function: CanonicalFunction {
                name: tool.function.name,
                description: tool.function.description,
                parameters: tool.function.parameters,
            },
        }
    }
}

impl From<ToolChoiceMode> for CanonicalToolChoiceMode {
    fn from(mode: ToolChoiceMode) -> Self {
        match mode {
            ToolChoiceMode::None => CanonicalToolChoiceMode::None,
            ToolChoiceMode::Auto => CanonicalToolChoiceMode::Auto,
            ToolChoiceMode::Required => CanonicalToolChoiceMode::Required,
        }
    }
}

impl From<ToolChoice> for CanonicalToolChoice {
    fn from(choice: ToolChoice) -> Self {
        match choice {
            ToolChoice::Mode(mode) => CanonicalToolChoice::Mode(CanonicalToolChoiceMode::from(mode)),
            ToolChoice::Specific { function, .. } => {
                CanonicalToolChoice::Specific { function: CanonicalFunctionChoice { name: function.name } }
            }
        }
    }
}

impl From<CanonicalRequest> for ChatCompletionRequest {
    fn from(req: CanonicalRequest) -> Self {
        let mut messages = Vec::with_capacity(req.messages.len() + req.system.is_some() as usize);

        if let Some(system) = req.system {
            messages.push(ChatMessage { role: ChatRole::System, content: Some(system), tool_calls: None, tool_call_id: None });
        }

        messages.extend(req.messages.into_iter().map(ChatMessage::from));

        Self {
            model: req.model,
            messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            top_p: req.top_p,
            frequency_penalty: req.frequency_penalty,
            presence_penalty: req.presence_penalty,
            stop: req.stop_sequences,
            stream: req.stream,
            tools: req.tools.map(|t| t.into_iter().map(Tool::from).collect()),
            tool_choice: req.tool_choice.map(ToolChoice::from),
            parallel_tool_calls: req.parallel_tool_calls,
        }
    }
}

impl From<CanonicalRole> for ChatRole {
    fn from(role: CanonicalRole) -> Self {
        match role {
            CanonicalRole::System => ChatRole::System,
            CanonicalRole::Developer => ChatRole::Developer,
            CanonicalRole::User => ChatRole::User,
            CanonicalRole::Assistant => ChatRole::Assistant,
            CanonicalRole::Tool => ChatRole::Tool,
        }
    }
}

impl From<CanonicalMessage> for ChatMessage {
    fn from(msg: CanonicalMessage) -> Self {
        let role = ChatRole::from(msg.role);

        let content = match msg.content {
            CanonicalContent::Text(text) => Some(text),
            CanonicalContent::Blocks(blocks) => {
                let parts: Vec<String> = blocks
                    .into_iter()
                    .filter_map(|block| match block {
                        CanonicalBlock::Text { text } => Some(text),
                        CanonicalBlock::ToolResult { content, .. } => match content {
                            CanonicalToolResultContent::Text(text) => Some(text),
                            CanonicalToolResultContent::Multiple(texts) => Some(texts.join("\n")),
                        },
                        _ => None,
                    })
                    .collect();

                if parts.is_empty() { None } else { Some(parts.join("\n")) }
            }
        };

        Self {
            role,
            content,
            tool_calls: msg.tool_calls.map(|calls| {
                calls
                    .into_iter()
                    .map(|call| ToolCall {
                        id: call.id,
                        tool_type: ToolCallType::Function,
                        function: FunctionCall { name: call.function.name, arguments: call.function.arguments.as_json_string() },
                    })
                    .collect()
            }),
            tool_call_id: msg.tool_call_id,
        }
    }
}

impl From<CanonicalTool> for Tool {
    fn from(tool: CanonicalTool) -> Self {
        Self {
            tool_type: ToolCallType::Function,
            function: FunctionDefinition {
                name: tool.function.name,
                description: tool.function.description,
                parameters: tool.function.parameters,
            },
        }
    }
}

impl From<CanonicalToolChoiceMode> for ToolChoiceMode {
    fn from(mode: CanonicalToolChoiceMode) -> Self {
        match mode {
            CanonicalToolChoiceMode::None => ToolChoiceMode::None,
            CanonicalToolChoiceMode::Auto => ToolChoiceMode::Auto,
            CanonicalToolChoiceMode::Required => ToolChoiceMode::Required,
        }
    }
}

impl From<CanonicalToolChoice> for ToolChoice {
    fn from(choice: CanonicalToolChoice) -> Self {
        match choice {
            CanonicalToolChoice::Mode(mode) => ToolChoice::Mode(ToolChoiceMode::from(mode)),
            CanonicalToolChoice::Specific { function } => {
                ToolChoice::Specific { tool_type: ToolCallType::Function, function: ToolChoiceFunction { name: function.name } }
            }
        }
    }
}

impl From<ChatCompletionResponse> for CanonicalResponse {
    fn from(resp: ChatCompletionResponse) -> Self {
        Self {
            id: resp.id,
            model: resp.model,
            choices: resp
                .choices
                .into_iter()
                .map(|choice| CanonicalChoice {
                    index: choice.index,
                    message: CanonicalMessage::from(choice.message),
                    finish_reason: CanonicalFinishReason::from(choice.finish_reason),
                })
                .collect(),
            usage: CanonicalUsage::from(resp.usage),
            created: resp.created,
        }
    }
}

impl From<CanonicalResponse> for ChatCompletionResponse {
    fn from(resp: CanonicalResponse) -> Self {
        Self {
            id: resp.id,
            object: ObjectType::ChatCompletion,
            created: resp.created,
            model: resp.model,
            choices: resp
                .choices
                .into_iter()
                .map(|choice| ChatChoice {
                    index: choice.index,
                    message: ChatMessage::from(choice.message),
                    finish_reason: FinishReason::from(choice.finish_reason),
                })
                .collect(),
            usage: Usage::from(resp.usage),
        }
    }
}

impl From<Usage> for CanonicalUsage {
    fn from(u: Usage) -> Self {
        Self { prompt_tokens: u.prompt_tokens, completion_tokens: u.completion_tokens, total_tokens: u.total_tokens }
    }
}

impl From<CanonicalUsage> for Usage {
    fn from(u: CanonicalUsage) -> Self {
        Self { prompt_tokens: u.prompt_tokens, completion_tokens: u.completion_tokens, total_tokens: u.total_tokens }
    }
}

impl From<FinishReason> for CanonicalFinishReason {
    fn from(reason: FinishReason) -> Self {
        match reason {
            FinishReason::Stop => CanonicalFinishReason::Stop,
            FinishReason::Length => CanonicalFinishReason::Length,
            FinishReason::ContentFilter => CanonicalFinishReason::ContentFilter,
            FinishReason::ToolCalls => CanonicalFinishReason::ToolCalls,
        }
    }
}

impl From<CanonicalFinishReason> for FinishReason {
    fn from(reason: CanonicalFinishReason) -> Self {
        match reason {
            CanonicalFinishReason::Stop => FinishReason::Stop,
            CanonicalFinishReason::Length => FinishReason::Length,
            CanonicalFinishReason::ContentFilter => FinishReason::ContentFilter,
            CanonicalFinishReason::ToolCalls => FinishReason::ToolCalls,
        }
    }
}

impl From<StreamingToolCall> for CanonicalStreamingToolCall {
    fn from(call: StreamingToolCall) -> Self {
        match call {
            StreamingToolCall::Start { index, id, r#type: _, function } => {
                CanonicalStreamingToolCall::Start { index, id, function: CanonicalFunctionStart { name: function.name, arguments: function.arguments } }
            }
            StreamingToolCall::Delta { index, function } => {
                CanonicalStreamingToolCall::Delta { index, function: CanonicalFunctionDelta { arguments: function.arguments } }
            }
        }
    }
}

impl From<CanonicalStreamingToolCall> for StreamingToolCall {
    fn from(call: CanonicalStreamingToolCall) -> Self {
        match call {
            CanonicalStreamingToolCall::Start { index, id, function } => StreamingToolCall::Start {
                index,
                id,
                r#type: ToolCallType::Function,
                function: FunctionStart { name: function.name, arguments: function.arguments },
            },
            CanonicalStreamingToolCall::Delta { index, function } => {
                StreamingToolCall::Delta { index, function: FunctionDelta { arguments: function.arguments } }
            }
        }
    }
}

impl From<ChatCompletionChunk> for CanonicalChunk {
    fn from(chunk: ChatCompletionChunk) -> Self {
        Self {
            id: chunk.id.into(),
            model: chunk.model.into(),
            choices: chunk
                .choices
                .into_iter()
                .map(|choice| CanonicalChoiceDelta {
                    index: choice.index,
                    delta: CanonicalMessageDelta {
                        role: choice.delta.role.map(CanonicalRole::from),
                        content: choice.delta.content,
                        tool_calls: choice.delta.tool_calls.map(|calls| calls.into_iter().map(CanonicalStreamingToolCall::from).collect()),
                    },
                    finish_reason: choice.finish_reason.map(CanonicalFinishReason::from),
                })
                .collect(),
            usage: chunk.usage.map(CanonicalUsage::from),
            created: chunk.created,
        }
    }
}

impl From<CanonicalChunk> for ChatCompletionChunk {
    fn from(chunk: CanonicalChunk) -> Self {
        Self {
            id: chunk.id.into_owned(),
            object: ObjectType::ChatCompletionChunk,
            created: chunk.created,
            model: chunk.model.into_owned(),
            system_fingerprint: None,
            choices: chunk
                .choices
                .into_iter()
                .map(|choice| ChatChoiceDelta {
                    index: choice.index,
                    logprobs: None,
                    delta: ChatMessageDelta {
                        role: choice.delta.role.map(ChatRole::from),
                        content: choice.delta.content,
                        function_call: None,
                        tool_calls: choice.delta.tool_calls.map(|calls| calls.into_iter().map(StreamingToolCall::from).collect()),
                    },
                    finish_reason: choice.finish_reason.map(FinishReason::from),
                })
                .collect(),
            usage: chunk.usage.map(Usage::from),
        }
    }
}

impl From<CanonicalModel> for Model {
    fn from(model: CanonicalModel) -> Self {
        Self { id: model.id, object: ObjectType::Model, created: model.created, owned_by: model.owned_by }
    }
}

impl From<Vec<CanonicalModel>> for ModelsResponse {
    fn from(models: Vec<CanonicalModel>) -> Self {
        Self { object: ObjectType::List, data: models.into_iter().map(Model::from).collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_system_message_through_canonical() {
        let req = ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![
                ChatMessage { role: ChatRole::System, content: Some("be terse".to_string()), tool_calls: None, tool_call_id: None },
                ChatMessage { role: ChatRole::User, content: Some("hi".to_string()), tool_calls: None, tool_call_id: None },
            ],
            temperature: None,
            max_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop: None,
            stream: None,
            tools: None,
            tool_choice: None,
            parallel_tool_calls: None,
        };

        let canonical = CanonicalRequest::from(req);
        assert_eq!(canonical.system.as_deref(), Some("be terse"));
        assert_eq!(canonical.messages.len(), 1);

        let back = ChatCompletionRequest::from(canonical);
        assert_eq!(back.messages.len(), 2);
        assert_eq!(back.messages[0].role, ChatRole::System);
    }

    #[test]
    fn tool_call_arguments_stay_a_json_string() {
        let call = ToolCall { id: "call_1".to_string(), tool_type: ToolCallType::Function, function: FunctionCall { name: "get_weather".to_string(), arguments: "{\"city\":\"Paris\"}".to_string() } };

        let msg = ChatMessage { role: ChatRole::Assistant, content: None, tool_calls: Some(vec![call]), tool_call_id: None };
        let canonical = CanonicalMessage::from(msg);
        let back = ChatMessage::from(canonical);

        assert_eq!(back.tool_calls.unwrap()[0].function.arguments, "{\"city\":\"Paris\"}");
    }

    #[test]
    fn tool_calls_delta_serializes_content_as_explicit_null() {
        let delta = ChatMessageDelta {
            role: Some(ChatRole::Assistant),
            content: None,
            function_call: None,
            tool_calls: Some(vec![StreamingToolCall::Start {
                index: 0,
                id: "call_1".to_string(),
                r#type: ToolCallType::Function,
                function: FunctionStart { name: "get_weather".to_string(), arguments: String::new() },
            }]),
        };

        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json.get("content"), Some(&serde_json::Value::Null));
        assert!(json.get("tool_calls").is_some());
    }

    #[test]
    fn content_only_delta_serializes_content_as_a_string() {
        let delta = ChatMessageDelta { role: None, content: Some("hi".to_string()), function_call: None, tool_calls: None };

        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json.get("content"), Some(&serde_json::Value::String("hi".to_string())));
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn empty_delta_omits_content_entirely() {
        let delta = ChatMessageDelta::default();

        let json = serde_json::to_value(&delta).unwrap();
        assert!(json.as_object().unwrap().is_empty());
    }
}
