//! Canonical, protocol-agnostic message types.
//!
//! Every request entering the proxy, whether submitted in the OpenAI Chat Completions
//! or the Anthropic Messages dialect, is first converted into these types. The rest of
//! the pipeline (message rewriting, prompt injection, upstream dispatch, response
//! parsing) operates exclusively on the canonical shape, then the outcome is converted
//! back into whichever dialect the client used.
//!
//! The canonical shape is OpenAI-flavored: every upstream speaks the OpenAI Chat
//! Completions wire format, so keeping the canonical types close to it means the
//! upstream-facing conversion is close to a no-op.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A chat completion request, independent of which dialect it arrived in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRequest {
    /// Requested model identifier, prior to alias resolution.
    pub model: String,
    /// Conversation messages, in order.
    pub messages: Vec<CanonicalMessage>,
    /// System instruction, when the client dialect carries it out-of-band (Anthropic)
    /// rather than as a leading message (OpenAI).
    pub system: Option<String>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Nucleus sampling cutoff.
    pub top_p: Option<f32>,
    /// Top-k sampling cutoff (Anthropic only; dropped on OpenAI-bound requests).
    pub top_k: Option<u32>,
    /// OpenAI frequency penalty.
    pub frequency_penalty: Option<f32>,
    /// OpenAI presence penalty.
    pub presence_penalty: Option<f32>,
    /// Sequences that halt generation.
    pub stop_sequences: Option<Vec<String>>,
    /// Whether the client asked for a streamed response.
    pub stream: Option<bool>,
    /// Tools the model may call.
    pub tools: Option<Vec<CanonicalTool>>,
    /// How the model should use `tools`.
    pub tool_choice: Option<CanonicalToolChoice>,
    /// Whether multiple tool calls may appear in a single response.
    pub parallel_tool_calls: Option<bool>,
}

/// A single message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalMessage {
    /// Who sent the message.
    pub role: CanonicalRole,
    /// The message body.
    pub content: CanonicalContent,
    /// Tool calls the assistant made in this message, if any.
    pub tool_calls: Option<Vec<CanonicalToolCall>>,
    /// For a `Tool` role message, the id of the call this is a result for.
    pub tool_call_id: Option<String>,
}

/// Message content, either a plain string or a sequence of typed blocks.
///
/// `#[serde(untagged)]` lets a plain JSON string deserialize straight into the
/// [`CanonicalContent::Text`] variant, matching the common case without forcing every
/// caller through an array of blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CanonicalContent {
    /// Plain text, the overwhelmingly common case.
    Text(String),
    /// Structured content: text interleaved with images and tool use/results.
    Blocks(Vec<CanonicalBlock>),
}

/// Sender role of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalRole {
    /// System instructions.
    System,
    /// OpenAI's `developer` role, distinct from `system` until the message rewriter
    /// folds it in (or not) per `convert_developer_to_system`.
    Developer,
    /// End-user input.
    User,
    /// Model-generated output.
    Assistant,
    /// A tool execution result fed back to the model.
    Tool,
}

/// A single block of structured message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CanonicalBlock {
    /// Plain text.
    #[serde(rename = "text")]
    Text {
        /// The text.
        text: String,
    },
    /// An image, referenced by URL or inlined as base64.
    #[serde(rename = "image")]
    Image {
        /// Where the image data comes from.
        source: CanonicalImageSource,
    },
    /// A request by the assistant to invoke a tool.
    #[serde(rename = "tool_use")]
    ToolUse {
        /// Correlates with a later `ToolResult`.
        id: String,
        /// Name of the tool.
        name: String,
        /// Arguments, already parsed.
        input: Value,
    },
    /// The result of executing a tool.
    #[serde(rename = "tool_result")]
    ToolResult {
        /// The `id` of the `ToolUse` this responds to.
        tool_use_id: String,
        /// Output of the tool.
        content: CanonicalToolResultContent,
        /// Whether the tool execution failed.
        is_error: Option<bool>,
    },
}

/// Output of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CanonicalToolResultContent {
    /// A single string result.
    Text(String),
    /// Several result fragments, joined when rendered into a single-string dialect.
    Multiple(Vec<String>),
}

/// Source of image content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CanonicalImageSource {
    /// Inlined, base64-encoded image bytes.
    #[serde(rename = "base64")]
    Base64 {
        /// MIME type, e.g. `image/png`.
        media_type: String,
        /// Base64-encoded bytes.
        data: String,
    },
    /// A URL the upstream is expected to fetch.
    #[serde(rename = "url")]
    Url {
        /// The image URL.
        url: String,
    },
}

/// A tool the model may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalTool {
    /// The function this tool exposes.
    pub function: CanonicalFunction,
}

/// A callable function's definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalFunction {
    /// Function name, must be unique among the request's tools.
    pub name: String,
    /// Description shown to the model, used to decide when to call the function.
    pub description: String,
    /// JSON Schema describing the accepted arguments.
    pub parameters: Value,
}

/// How the model should use the available tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CanonicalToolChoice {
    /// A general policy, not naming a specific tool.
    Mode(CanonicalToolChoiceMode),
    /// The model must call the named tool.
    Specific {
        /// The tool to force.
        function: CanonicalFunctionChoice,
    },
}

/// General tool-use policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalToolChoiceMode {
    /// Tools must not be used even if present.
    None,
    /// The model decides.
    Auto,
    /// At least one tool call is required.
    #[serde(alias = "required", alias = "any")]
    Required,
}

/// Names a function to force via [`CanonicalToolChoice::Specific`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalFunctionChoice {
    /// Name of the tool to force.
    pub name: String,
}

/// A completed tool call in an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalToolCall {
    /// Correlates with the `tool_call_id` of the eventual result message.
    pub id: String,
    /// The call itself.
    pub function: CanonicalFunctionCall,
}

/// Name and arguments of a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalFunctionCall {
    /// Name of the function invoked.
    pub name: String,
    /// Arguments passed to it.
    pub arguments: CanonicalArguments,
}

/// Function call arguments, kept in whichever shape they arrived in.
///
/// OpenAI carries these as a JSON-encoded string; Anthropic as an already-parsed
/// value. Keeping both representations avoids a parse/serialize round trip for the
/// dialect that already has the shape we need.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CanonicalArguments {
    /// A JSON-encoded string.
    String(String),
    /// An already-parsed value.
    Value(Value),
}

impl CanonicalArguments {
    /// Returns the arguments as a parsed JSON value, parsing the string form if needed.
    pub fn as_value(&self) -> Value {
        match self {
            CanonicalArguments::String(s) => serde_json::from_str(s).unwrap_or(Value::Null),
            CanonicalArguments::Value(v) => v.clone(),
        }
    }

    /// Returns the arguments as a JSON-encoded string, serializing the value form if needed.
    pub fn as_json_string(&self) -> String {
        match self {
            CanonicalArguments::String(s) => s.clone(),
            CanonicalArguments::Value(v) => serde_json::to_string(v).unwrap_or_else(|_| "{}".to_string()),
        }
    }
}

/// A completed, non-streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalResponse {
    /// Response identifier.
    pub id: String,
    /// Model that produced the response. May differ from the requested model when an
    /// alias was resolved.
    pub model: String,
    /// Response candidates. Exactly one, in practice.
    pub choices: Vec<CanonicalChoice>,
    /// Token accounting.
    pub usage: CanonicalUsage,
    /// Unix timestamp of creation.
    pub created: u64,
}

/// A single response candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalChoice {
    /// Index among `choices`.
    pub index: u32,
    /// The generated message.
    pub message: CanonicalMessage,
    /// Why generation stopped.
    pub finish_reason: CanonicalFinishReason,
}

/// Token usage for a request/response pair.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CanonicalUsage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    pub completion_tokens: u32,
    /// `prompt_tokens + completion_tokens`.
    pub total_tokens: u32,
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalFinishReason {
    /// Natural completion.
    Stop,
    /// Hit `max_tokens`.
    #[serde(alias = "max_tokens")]
    Length,
    /// Blocked by content policy.
    ContentFilter,
    /// The response carries one or more tool calls.
    ToolCalls,
}

/// A single Server-Sent Events chunk of a streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalChunk {
    /// Identifier shared by every chunk of one response.
    pub id: Cow<'static, str>,
    /// Model generating the response.
    pub model: Cow<'static, str>,
    /// Incremental choice updates.
    pub choices: Vec<CanonicalChoiceDelta>,
    /// Cumulative usage, present only on the final chunk of some dialects.
    pub usage: Option<CanonicalUsage>,
    /// Unix timestamp.
    pub created: u64,
}

/// Incremental update to one choice in a streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalChoiceDelta {
    /// Index among choices.
    pub index: u32,
    /// The incremental content.
    pub delta: CanonicalMessageDelta,
    /// Present on the final chunk for this choice.
    pub finish_reason: Option<CanonicalFinishReason>,
}

/// Incremental message content in a streaming chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonicalMessageDelta {
    /// Present only on the first chunk.
    pub role: Option<CanonicalRole>,
    /// Text fragment to append.
    pub content: Option<String>,
    /// Tool call fragments to append.
    pub tool_calls: Option<Vec<CanonicalStreamingToolCall>>,
}

/// One fragment of a tool call being built up across chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CanonicalStreamingToolCall {
    /// Establishes a new tool call; arguments start empty.
    Start {
        /// Index in the `tool_calls` array.
        index: usize,
        /// Id for later correlation.
        id: String,
        /// Initial function name and (usually empty) arguments.
        function: CanonicalFunctionStart,
    },
    /// Appends to the arguments of a previously started call.
    Delta {
        /// Index of the call being appended to.
        index: usize,
        /// Argument fragment.
        function: CanonicalFunctionDelta,
    },
}

/// Initial fields of a streaming tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalFunctionStart {
    /// Function name.
    pub name: String,
    /// Initial arguments fragment, usually empty.
    pub arguments: String,
}

/// An arguments fragment appended to a streaming tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalFunctionDelta {
    /// Fragment to append.
    pub arguments: String,
}

/// A single model entry in a model-listing response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalModel {
    /// Model identifier, as used in the `model` field of a request.
    pub id: String,
    /// Unix timestamp of creation, 0 when unknown.
    pub created: u64,
    /// Name of the upstream service that exposes this model.
    pub owned_by: String,
}

impl CanonicalMessage {
    /// Extracts [`CanonicalToolCall`]s from a `Blocks` content container.
    ///
    /// Tool calls are not stored redundantly on the message; they are computed
    /// on demand from `ToolUse` blocks so the two representations cannot drift apart.
    pub fn compute_tool_calls(&self) -> Option<Vec<CanonicalToolCall>> {
        let CanonicalContent::Blocks(blocks) = &self.content else {
            return None;
        };

        let calls: Vec<CanonicalToolCall> = blocks
            .iter()
            .filter_map(|block| match block {
                CanonicalBlock::ToolUse { id, name, input } => Some(CanonicalToolCall {
                    id: id.clone(),
                    function: CanonicalFunctionCall {
                        name: name.clone(),
                        arguments: CanonicalArguments::Value(input.clone()),
                    },
                }),
                _ => None,
            })
            .collect();

        if calls.is_empty() { None } else { Some(calls) }
    }
}
