//! Anthropic Messages API wire types, and their conversion to/from the canonical shape.
//!
//! Unlike the OpenAI dialect, nothing here doubles as an upstream wire format: every
//! upstream this proxy dispatches to speaks the OpenAI shape, so these types only ever
//! appear at the client-facing edge of a request that arrived as `POST /v1/messages`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::{
    CanonicalArguments, CanonicalBlock, CanonicalChunk, CanonicalContent, CanonicalFinishReason, CanonicalFunction,
    CanonicalImageSource, CanonicalMessage, CanonicalModel, CanonicalRequest, CanonicalResponse, CanonicalRole,
    CanonicalStreamingToolCall, CanonicalTool, CanonicalToolCall, CanonicalToolChoice, CanonicalToolChoiceMode,
    CanonicalToolResultContent, CanonicalUsage,
};

/// `POST /v1/messages` request body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessagesRequest {
    /// Target model.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Response token cap. Required by Anthropic, unlike OpenAI.
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// System prompt, carried out-of-band from `messages`.
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Sampling temperature.
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Nucleus sampling cutoff.
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Top-k sampling cutoff.
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Stop sequences.
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Whether to stream the response as SSE.
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Tools the model may call.
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Tool-use policy.
    pub tool_choice: Option<ToolChoice>,
}

/// A message, always carrying a content-block array regardless of how simple its body is.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    /// Sender role.
    pub role: Role,
    /// Content blocks.
    pub content: Vec<Content>,
}

/// Message sender role. Anthropic has no separate `system` or `tool` role: the former
/// lives in [`MessagesRequest::system`], the latter is a `ToolResult` block inside a
/// `user` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End-user input, and tool results.
    User,
    /// Model output.
    Assistant,
}

/// A content block.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum Content {
    /// Plain text.
    #[serde(rename = "text")]
    Text {
        /// The text.
        text: String,
    },
    /// An image.
    #[serde(rename = "image")]
    Image {
        /// Where the image comes from.
        source: ImageSource,
    },
    /// A tool invocation requested by the assistant.
    #[serde(rename = "tool_use")]
    ToolUse {
        /// Correlates with a later `ToolResult`.
        id: String,
        /// Tool name.
        name: String,
        /// Parsed arguments.
        input: Value,
    },
    /// A tool execution result, fed back as part of a `user` message.
    #[serde(rename = "tool_result")]
    ToolResult {
        /// The `id` of the `ToolUse` this responds to.
        tool_use_id: String,
        /// Output of the tool.
        content: Vec<ToolResultContent>,
    },
}

/// One fragment of a tool result.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ToolResultContent {
    /// Successful output.
    #[serde(rename = "text")]
    Text {
        /// The text.
        text: String,
    },
    /// An error message.
    #[serde(rename = "error")]
    Error {
        /// The error.
        error: String,
    },
}

/// Source of an image content block.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    /// Either `base64` or `url`.
    pub source_type: String,
    /// MIME type, e.g. `image/png`.
    pub media_type: String,
    /// Base64-encoded data, or the URL itself when `source_type` is `url`.
    pub data: String,
}

/// A tool definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tool {
    /// Tool name.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON Schema for the accepted arguments.
    pub input_schema: Value,
}

/// Tool-use policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    /// The model decides.
    Auto,
    /// At least one tool call is required.
    Any,
    /// Forces a specific tool.
    Tool {
        /// Tool to force.
        name: String,
    },
}

/// `POST /v1/messages` non-streaming response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Response id, e.g. `msg_xxxx`.
    pub id: String,
    /// Always `message`.
    pub r#type: String,
    /// Always `assistant`.
    pub role: Role,
    /// Response content blocks.
    pub content: Vec<Content>,
    /// Model that produced the response.
    pub model: String,
    /// Why generation stopped.
    pub stop_reason: Option<StopReason>,
    /// Stop sequence matched, if any.
    pub stop_sequence: Option<String>,
    /// Token accounting.
    pub usage: Usage,
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural completion.
    EndTurn,
    /// Hit `max_tokens`.
    MaxTokens,
    /// Matched a stop sequence.
    StopSequence,
    /// Carries one or more tool calls.
    ToolUse,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::EndTurn => "end_turn",
            StopReason::MaxTokens => "max_tokens",
            StopReason::StopSequence => "stop_sequence",
            StopReason::ToolUse => "tool_use",
        };
        write!(f, "{s}")
    }
}

/// Token usage for a request/response pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    pub input_tokens: u32,
    /// Tokens in the completion.
    pub output_tokens: u32,
}

/// `GET /v1/models` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model id.
    pub id: String,
    #[serde(rename = "type")]
    /// Always `model`.
    pub model_type: String,
    /// Display name, same as `id` here since upstreams don't surface one.
    pub display_name: String,
    /// Unix timestamp of creation, 0 when unknown.
    pub created_at: u64,
}

/// `GET /v1/models` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    /// The models.
    pub data: Vec<ModelInfo>,
    /// Always `false`: every model is returned in one response.
    pub has_more: bool,
}

/// A single SSE event in an Anthropic streaming response.
///
/// Unlike OpenAI's flat sequence of `chat.completion.chunk` objects, Anthropic frames a
/// streamed message as a small state machine: one `message_start`, a `content_block_start`
/// / `content_block_delta`* / `content_block_stop` triple per block, then one
/// `message_delta` and a closing `message_stop`. [`StreamEncoder`] drives this machine
/// from a sequence of [`CanonicalChunk`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// Opens the message, with the role and model fixed for every later event.
    #[serde(rename = "message_start")]
    MessageStart {
        /// The still-empty message being started.
        message: StreamMessageStart,
    },
    /// Opens a content block at the given index.
    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        /// Index of the block.
        index: u32,
        /// The (still-empty, for `tool_use`) block being started.
        content_block: Content,
    },
    /// Appends to the block at the given index.
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta {
        /// Index of the block.
        index: u32,
        /// The fragment to append.
        delta: ContentDelta,
    },
    /// Closes the block at the given index; no further deltas will target it.
    #[serde(rename = "content_block_stop")]
    ContentBlockStop {
        /// Index of the block.
        index: u32,
    },
    /// Carries the final stop reason and cumulative usage.
    #[serde(rename = "message_delta")]
    MessageDelta {
        /// The stop reason.
        delta: MessageDelta,
        /// Cumulative usage as of this point.
        usage: Usage,
    },
    /// Terminates the stream. Unlike OpenAI's `[DONE]` sentinel, this is a typed event.
    #[serde(rename = "message_stop")]
    MessageStop,
    /// Keeps the connection alive when no content has changed. This proxy does not
    /// generate these on its own; they only appear if forwarded from upstream.
    #[serde(rename = "ping")]
    Ping,
}

/// The message skeleton carried by `message_start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessageStart {
    /// Message id.
    pub id: String,
    #[serde(rename = "type")]
    /// Always `message`.
    pub message_type: String,
    /// Always `assistant`.
    pub role: Role,
    /// Always empty; content arrives via later `content_block_*` events.
    pub content: Vec<Content>,
    /// Model producing the response.
    pub model: String,
    /// Usage as known at message start (prompt tokens only).
    pub usage: Usage,
}

/// An incremental update to one content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentDelta {
    /// Appends to a `text` block.
    #[serde(rename = "text_delta")]
    TextDelta {
        /// Text fragment.
        text: String,
    },
    /// Appends to a `tool_use` block's `input`, as a fragment of its JSON encoding.
    #[serde(rename = "input_json_delta")]
    InputJsonDelta {
        /// JSON fragment.
        partial_json: String,
    },
}

/// Final stop reason carried by `message_delta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Why generation stopped.
    pub stop_reason: Option<StopReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Stop sequence matched, if any.
    pub stop_sequence: Option<String>,
}

impl From<MessagesRequest> for CanonicalRequest {
    fn from(req: MessagesRequest) -> Self {
        Self {
            model: req.model,
            messages: req.messages.into_iter().flat_map(expand_request_message).collect(),
            system: req.system,
            max_tokens: Some(req.max_tokens),
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req.top_k,
            frequency_penalty: None,
            presence_penalty: None,
            stop_sequences: req.stop_sequences,
            stream: req.stream,
            tools: req.tools.map(|t| t.into_iter().map(CanonicalTool::from).collect()),
            tool_choice: req.tool_choice.map(CanonicalToolChoice::from),
            parallel_tool_calls: None,
        }
    }
}

impl From<Role> for CanonicalRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => CanonicalRole::User,
            Role::Assistant => CanonicalRole::Assistant,
        }
    }
}

/// Splits a request-side `user` message carrying `tool_result` blocks into one canonical
/// `tool` message per result (keyed by `tool_use_id`) plus, if any non-result content
/// remains, a single `user` message for the concatenated text. Anthropic has no message-level
/// `tool` role — results travel inside an ordinary `user` message — so this expansion is
/// what lets the message rewriter treat a tool result uniformly across both dialects.
fn expand_request_message(msg: Message) -> Vec<CanonicalMessage> {
    let has_tool_result = matches!(msg.role, Role::User) && msg.content.iter().any(|c| matches!(c, Content::ToolResult { .. }));

    if !has_tool_result {
        return vec![CanonicalMessage::from(msg)];
    }

    let mut out = Vec::new();
    let mut remaining_text = Vec::new();

    for block in msg.content {
        match block {
            Content::ToolResult { tool_use_id, content } => {
                let text = if content.len() == 1 {
                    tool_result_fragment_text(content.into_iter().next().unwrap())
                } else {
                    content.into_iter().map(tool_result_fragment_text).collect::<Vec<_>>().join("\n")
                };

                out.push(CanonicalMessage {
                    role: CanonicalRole::Tool,
                    content: CanonicalContent::Text(text),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id),
                });
            }
            Content::Text { text } => remaining_text.push(text),
            Content::Image { .. } | Content::ToolUse { .. } => {}
        }
    }

    if !remaining_text.is_empty() {
        out.push(CanonicalMessage {
            role: CanonicalRole::User,
            content: CanonicalContent::Text(remaining_text.join("\n")),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    out
}

impl From<Content> for CanonicalBlock {
    fn from(content: Content) -> Self {
        match content {
            Content::Text { text } => CanonicalBlock::Text { text },
            Content::Image { source } => CanonicalBlock::Image {
                source: CanonicalImageSource::Base64 { media_type: source.media_type, data: source.data },
            },
            Content::ToolUse { id, name, input } => CanonicalBlock::ToolUse { id, name, input },
            Content::ToolResult { tool_use_id, content } => {
                let content = if content.len() == 1 {
                    CanonicalToolResultContent::Text(tool_result_fragment_text(content.into_iter().next().unwrap()))
                } else {
                    CanonicalToolResultContent::Multiple(content.into_iter().map(tool_result_fragment_text).collect())
                };

                CanonicalBlock::ToolResult { tool_use_id, content, is_error: None }
            }
        }
    }
}

fn tool_result_fragment_text(fragment: ToolResultContent) -> String {
    match fragment {
        ToolResultContent::Text { text } => text,
        ToolResultContent::Error { error } => error,
    }
}

/// Converts a single request-side message with no `tool_result` blocks (plain `user`
/// turns, and `assistant` turns that may carry `tool_use` blocks from a prior turn).
/// Content is reduced to concatenated text; any `tool_use` blocks are lifted into
/// `tool_calls` instead of staying inline, matching the canonical request-message shape
/// the OpenAI dialect and the message rewriter both expect.
impl From<Message> for CanonicalMessage {
    fn from(msg: Message) -> Self {
        let role = CanonicalRole::from(msg.role);
        let mut tool_calls = Vec::new();
        let mut text_parts = Vec::new();

        for block in msg.content {
            match block {
                Content::Text { text } => text_parts.push(text),
                Content::ToolUse { id, name, input } => tool_calls.push(CanonicalToolCall {
                    id,
                    function: crate::canonical::CanonicalFunctionCall { name, arguments: CanonicalArguments::Value(input) },
                }),
                Content::Image { .. } | Content::ToolResult { .. } => {}
            }
        }

        Self {
            role,
            content: CanonicalContent::Text(text_parts.join("\n")),
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            tool_call_id: None,
        }
    }
}

impl From<Tool> for CanonicalTool {
    fn from(tool: Tool) -> Self {
        Self { function: CanonicalFunction { name: tool.name, description: tool.description, parameters: tool.input_schema } }
    }
}

impl From<ToolChoice> for CanonicalToolChoice {
    fn from(choice: ToolChoice) -> Self {
        match choice {
            ToolChoice::Auto => CanonicalToolChoice::Mode(CanonicalToolChoiceMode::Auto),
            ToolChoice::Any => CanonicalToolChoice::Mode(CanonicalToolChoiceMode::Required),
            ToolChoice::Tool { name } => CanonicalToolChoice::Specific { function: crate::canonical::CanonicalFunctionChoice { name } },
        }
    }
}

impl From<CanonicalRequest> for MessagesRequest {
    fn from(req: CanonicalRequest) -> Self {
        Self {
            model: req.model,
            messages: req.messages.into_iter().map(Message::from).collect(),
            max_tokens: req.max_tokens.unwrap_or(4096),
            system: req.system,
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req.top_k,
            stop_sequences: req.stop_sequences,
            stream: req.stream,
            tools: req.tools.map(|t| t.into_iter().map(Tool::from).collect()),
            tool_choice: req.tool_choice.map(ToolChoice::from),
        }
    }
}

impl From<CanonicalRole> for Role {
    fn from(role: CanonicalRole) -> Self {
        match role {
            CanonicalRole::User | CanonicalRole::System | CanonicalRole::Developer | CanonicalRole::Tool => Role::User,
            CanonicalRole::Assistant => Role::Assistant,
        }
    }
}

impl From<CanonicalBlock> for Content {
    fn from(block: CanonicalBlock) -> Self {
        match block {
            CanonicalBlock::Text { text } => Content::Text { text },
            CanonicalBlock::Image { source } => Content::Image { source: ImageSource::from(source) },
            CanonicalBlock::ToolUse { id, name, input } => Content::ToolUse { id, name, input },
            CanonicalBlock::ToolResult { tool_use_id, content, .. } => {
                Content::ToolResult { tool_use_id, content: Vec::<ToolResultContent>::from(content) }
            }
        }
    }
}

impl From<CanonicalImageSource> for ImageSource {
    fn from(source: CanonicalImageSource) -> Self {
        match source {
            CanonicalImageSource::Base64 { media_type, data } => Self { source_type: "base64".to_string(), media_type, data },
            CanonicalImageSource::Url { url } => Self { source_type: "url".to_string(), media_type: "image/jpeg".to_string(), data: url },
        }
    }
}

impl From<CanonicalToolResultContent> for Vec<ToolResultContent> {
    fn from(content: CanonicalToolResultContent) -> Self {
        match content {
            CanonicalToolResultContent::Text(text) => vec![ToolResultContent::Text { text }],
            CanonicalToolResultContent::Multiple(texts) => texts.into_iter().map(|text| ToolResultContent::Text { text }).collect(),
        }
    }
}

impl From<CanonicalMessage> for Message {
    fn from(msg: CanonicalMessage) -> Self {
        let role = Role::from(msg.role);

        let content = match msg.content {
            CanonicalContent::Text(text) => vec![Content::Text { text }],
            CanonicalContent::Blocks(blocks) => blocks.into_iter().map(Content::from).collect(),
        };

        Self { role, content }
    }
}

impl From<CanonicalTool> for Tool {
    fn from(tool: CanonicalTool) -> Self {
        Self { name: tool.function.name, description: tool.function.description, input_schema: tool.function.parameters }
    }
}

impl From<CanonicalToolChoiceMode> for ToolChoice {
    fn from(mode: CanonicalToolChoiceMode) -> Self {
        match mode {
            CanonicalToolChoiceMode::None | CanonicalToolChoiceMode::Auto => ToolChoice::Auto,
            CanonicalToolChoiceMode::Required => ToolChoice::Any,
        }
    }
}

impl From<CanonicalToolChoice> for ToolChoice {
    fn from(choice: CanonicalToolChoice) -> Self {
        match choice {
            CanonicalToolChoice::Mode(mode) => ToolChoice::from(mode),
            CanonicalToolChoice::Specific { function } => ToolChoice::Tool { name: function.name },
        }
    }
}

impl From<CanonicalResponse> for MessagesResponse {
    fn from(resp: CanonicalResponse) -> Self {
        let choice = resp.choices.into_iter().next();
        let (content, finish_reason) = match choice {
            Some(choice) => (response_content_blocks(choice.message), Some(choice.finish_reason)),
            None => (Vec::new(), None),
        };

        Self {
            id: resp.id,
            r#type: "message".to_string(),
            role: Role::Assistant,
            content,
            model: resp.model,
            stop_reason: finish_reason.map(StopReason::from),
            stop_sequence: None,
            usage: Usage::from(resp.usage),
        }
    }
}

fn response_content_blocks(message: CanonicalMessage) -> Vec<Content> {
    let mut blocks = Vec::new();

    match message.content {
        CanonicalContent::Text(text) if !text.is_empty() => blocks.push(Content::Text { text }),
        CanonicalContent::Blocks(inner) => {
            blocks.extend(inner.into_iter().filter_map(|block| match block {
                CanonicalBlock::ToolResult { .. } => None,
                other => Some(Content::from(other)),
            }));
        }
        _ => {}
    }

    if let Some(tool_calls) = message.tool_calls {
        for call in tool_calls {
            blocks.push(Content::ToolUse { id: call.id, name: call.function.name, input: call.function.arguments.as_value() });
        }
    }

    blocks
}

impl From<CanonicalFinishReason> for StopReason {
    fn from(reason: CanonicalFinishReason) -> Self {
        match reason {
            CanonicalFinishReason::Stop => StopReason::EndTurn,
            CanonicalFinishReason::Length => StopReason::MaxTokens,
            CanonicalFinishReason::ContentFilter => StopReason::EndTurn,
            CanonicalFinishReason::ToolCalls => StopReason::ToolUse,
        }
    }
}

impl From<CanonicalUsage> for Usage {
    fn from(usage: CanonicalUsage) -> Self {
        Self { input_tokens: usage.prompt_tokens, output_tokens: usage.completion_tokens }
    }
}

impl From<CanonicalModel> for ModelInfo {
    fn from(model: CanonicalModel) -> Self {
        Self { id: model.id.clone(), model_type: "model".to_string(), display_name: model.id, created_at: model.created }
    }
}

impl From<Vec<CanonicalModel>> for ModelsResponse {
    fn from(models: Vec<CanonicalModel>) -> Self {
        Self { data: models.into_iter().map(ModelInfo::from).collect(), has_more: false }
    }
}

/// Drives the `message_start` / `content_block_*` / `message_delta` / `message_stop`
/// state machine from a sequence of canonical streaming chunks.
///
/// One [`CanonicalChunk`] may need zero, one, or several [`StreamEvent`]s: a chunk that
/// both closes a text block and opens a tool-call block, for instance, yields a
/// `content_block_stop` followed by a `content_block_start`.
#[derive(Debug, Default)]
pub struct StreamEncoder {
    started: bool,
    open_block: Option<OpenBlock>,
    cumulative_usage: Usage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text(u32),
    ToolUse(u32),
}

impl StreamEncoder {
    /// Creates a fresh encoder for a new streaming response.
    pub fn new() -> Self {
        Self { started: false, open_block: None, cumulative_usage: Usage { input_tokens: 0, output_tokens: 0 } }
    }

    /// Feeds the next canonical chunk, returning every Anthropic event it produces, in order.
    pub fn encode(&mut self, chunk: CanonicalChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if let Some(usage) = chunk.usage {
            self.cumulative_usage = Usage::from(usage);
        }

        if !self.started {
            self.started = true;
            events.push(StreamEvent::MessageStart {
                message: StreamMessageStart {
                    id: chunk.id.into_owned(),
                    message_type: "message".to_string(),
                    role: Role::Assistant,
                    content: Vec::new(),
                    model: chunk.model.into_owned(),
                    usage: self.cumulative_usage,
                },
            });
        }

        for choice in chunk.choices {
            if let Some(text) = choice.delta.content {
                self.ensure_open(OpenBlock::Text(choice.index), &mut events);
                events.push(StreamEvent::ContentBlockDelta { index: choice.index, delta: ContentDelta::TextDelta { text } });
            }

            if let Some(tool_calls) = choice.delta.tool_calls {
                for call in tool_calls {
                    events.extend(self.encode_tool_call(call));
                }
            }

            if let Some(finish_reason) = choice.finish_reason {
                self.close_open(&mut events);
                events.push(StreamEvent::MessageDelta {
                    delta: MessageDelta { stop_reason: Some(StopReason::from(finish_reason)), stop_sequence: None },
                    usage: self.cumulative_usage,
                });
                events.push(StreamEvent::MessageStop);
            }
        }

        events
    }

    fn encode_tool_call(&mut self, call: CanonicalStreamingToolCall) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        match call {
            CanonicalStreamingToolCall::Start { index, id, function } => {
                self.close_open(&mut events);
                self.open_block = Some(OpenBlock::ToolUse(index as u32));
                events.push(StreamEvent::ContentBlockStart {
                    index: index as u32,
                    content_block: Content::ToolUse { id, name: function.name, input: Value::Object(Default::default()) },
                });
                if !function.arguments.is_empty() {
                    events.push(StreamEvent::ContentBlockDelta {
                        index: index as u32,
                        delta: ContentDelta::InputJsonDelta { partial_json: function.arguments },
                    });
                }
            }
            CanonicalStreamingToolCall::Delta { index, function } => {
                events.push(StreamEvent::ContentBlockDelta {
                    index: index as u32,
                    delta: ContentDelta::InputJsonDelta { partial_json: function.arguments },
                });
            }
        }

        events
    }

    fn ensure_open(&mut self, wanted: OpenBlock, events: &mut Vec<StreamEvent>) {
        if self.open_block == Some(wanted) {
            return;
        }

        self.close_open(events);
        self.open_block = Some(wanted);

        if let OpenBlock::Text(index) = wanted {
            events.push(StreamEvent::ContentBlockStart { index, content_block: Content::Text { text: String::new() } });
        }
    }

    fn close_open(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(block) = self.open_block.take() {
            let index = match block {
                OpenBlock::Text(i) | OpenBlock::ToolUse(i) => i,
            };
            events.push(StreamEvent::ContentBlockStop { index });
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::borrow::Cow;

    use super::*;
    use crate::canonical::{CanonicalChoiceDelta, CanonicalFunctionStart, CanonicalMessageDelta};

    fn chunk(choices: Vec<CanonicalChoiceDelta>) -> CanonicalChunk {
        CanonicalChunk { id: Cow::Borrowed("msg_1"), model: Cow::Borrowed("gpt-4o"), choices, usage: None, created: 0 }
    }

    #[test]
    fn text_only_stream_opens_and_closes_one_block() {
        let mut encoder = StreamEncoder::new();

        let events = encoder.encode(chunk(vec![CanonicalChoiceDelta {
            index: 0,
            delta: CanonicalMessageDelta { role: None, content: Some("hi".to_string()), tool_calls: None },
            finish_reason: None,
        }]));

        assert!(matches!(events[0], StreamEvent::MessageStart { .. }));
        assert!(matches!(events[1], StreamEvent::ContentBlockStart { index: 0, .. }));
        assert!(matches!(events[2], StreamEvent::ContentBlockDelta { index: 0, .. }));

        let events = encoder.encode(chunk(vec![CanonicalChoiceDelta {
            index: 0,
            delta: CanonicalMessageDelta::default(),
            finish_reason: Some(CanonicalFinishReason::Stop),
        }]));

        assert!(matches!(events[0], StreamEvent::ContentBlockStop { index: 0 }));
        assert!(matches!(events[1], StreamEvent::MessageDelta { .. }));
        assert!(matches!(events[2], StreamEvent::MessageStop));
    }

    #[test]
    fn tool_call_closes_preceding_text_block() {
        let mut encoder = StreamEncoder::new();
        encoder.encode(chunk(vec![CanonicalChoiceDelta {
            index: 0,
            delta: CanonicalMessageDelta { role: None, content: Some("checking...".to_string()), tool_calls: None },
            finish_reason: None,
        }]));

        let events = encoder.encode(chunk(vec![CanonicalChoiceDelta {
            index: 0,
            delta: CanonicalMessageDelta {
                role: None,
                content: None,
                tool_calls: Some(vec![CanonicalStreamingToolCall::Start {
                    index: 0,
                    id: "call_1".to_string(),
                    function: CanonicalFunctionStart { name: "get_weather".to_string(), arguments: String::new() },
                }]),
            },
            finish_reason: None,
        }]));

        assert!(matches!(events[0], StreamEvent::ContentBlockStop { index: 0 }));
        assert!(matches!(events[1], StreamEvent::ContentBlockStart { index: 0, content_block: Content::ToolUse { .. } }));
    }

    #[test]
    fn unary_response_with_a_tool_call_maps_to_a_tool_use_block_and_stop_reason() {
        use crate::canonical::{CanonicalChoice, CanonicalContent, CanonicalFunctionCall, CanonicalRole, CanonicalToolCall, CanonicalUsage};

        let response = CanonicalResponse {
            id: "chatcmpl-1".to_string(),
            model: "gpt-4o".to_string(),
            choices: vec![CanonicalChoice {
                index: 0,
                message: CanonicalMessage {
                    role: CanonicalRole::Assistant,
                    content: CanonicalContent::Text(String::new()),
                    tool_calls: Some(vec![CanonicalToolCall {
                        id: "call_abc".to_string(),
                        function: CanonicalFunctionCall {
                            name: "t".to_string(),
                            arguments: CanonicalArguments::Value(serde_json::json!({"x": 1})),
                        },
                    }]),
                    tool_call_id: None,
                },
                finish_reason: CanonicalFinishReason::ToolCalls,
            }],
            usage: CanonicalUsage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 },
            created: 0,
        };

        let message = MessagesResponse::from(response);

        assert_eq!(message.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(message.content.len(), 1);
        match &message.content[0] {
            Content::ToolUse { id, name, input } => {
                assert_eq!(id, "call_abc");
                assert_eq!(name, "t");
                assert_eq!(input, &serde_json::json!({"x": 1}));
            }
            other => panic!("expected a tool_use block, got {other:?}"),
        }
    }
}
