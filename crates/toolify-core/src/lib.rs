//! Orchestrates the whole proxy pipeline: builds the axum router, adapts each dialect's
//! wire types to and from the canonical representation, runs the function-calling
//! transformation on the way out, dispatches to upstreams with unary failover, and recovers
//! tool calls from the response on the way back.
//!
//! Bearer-auth is applied by the caller (`server::serve`), not here — this crate only ever
//! sees requests already past the allow-list check.

use std::collections::{HashMap, HashSet, VecDeque};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use config::UpstreamServiceConfig;
use eventsource_stream::{Event as SseEvent, Eventsource};
use futures::{Stream, StreamExt, stream};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use uuid::Uuid;

use crate::canonical::{
    CanonicalArguments, CanonicalBlock, CanonicalChoiceDelta, CanonicalChunk, CanonicalContent, CanonicalFinishReason,
    CanonicalFunctionCall, CanonicalFunctionStart, CanonicalMessageDelta, CanonicalModel, CanonicalRequest,
    CanonicalResponse, CanonicalRole, CanonicalStreamingToolCall, CanonicalToolCall,
};
use crate::dialect::{anthropic, openai};
use crate::error::{AnthropicError, ProxyError, ProxyResult};
use crate::id_map::{DEFAULT_CLEANUP_INTERVAL, IdMap};
use crate::parser::ParsedCall;
use crate::upstream_router::{FailoverAction, UpstreamRouter, classify_status};

pub mod canonical;
pub mod dialect;
mod error;
mod http_client;
pub mod id_map;
mod message_rewriter;
mod parser;
mod prompt_injector;
mod request;
mod streaming_detector;
pub mod upstream_router;

use streaming_detector::StreamingDetector;

const STREAM_PARSE_FAILURE_MESSAGE: &str = "Error: Detected tool use signal but failed to parse function call format";

struct AppState {
    config: config::Config,
    router: UpstreamRouter,
    id_map: Arc<IdMap>,
    sentinel: String,
    http: reqwest::Client,
}

/// Builds the router serving every proxy endpoint: both dialects' completion routes and
/// the shared model listing. Generates this process's trigger sentinel and starts the
/// tool-call id map's background sweeper.
pub async fn router(config: &config::Config) -> anyhow::Result<Router> {
    config.validate()?;

    let sentinel = prompt_injector::generate_sentinel();
    log::info!("generated trigger sentinel {sentinel} for this process");

    let id_map = Arc::new(IdMap::default());
    id_map.spawn_sweeper(DEFAULT_CLEANUP_INTERVAL);

    let state = Arc::new(AppState {
        router: UpstreamRouter::new(config),
        config: config.clone(),
        id_map,
        sentinel,
        http: http_client::http_client(),
    });

    Ok(Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/messages", post(anthropic_messages))
        .route("/v1/models", get(list_models))
        .with_state(state))
}

async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<openai::ChatCompletionRequest>,
) -> ProxyResult<Response> {
    log::debug!("chat completions request for model '{}', stream={}", request.model, request.stream.unwrap_or(false));

    let client_key = request::client_api_key(&headers);
    let canonical = CanonicalRequest::from(request);

    if canonical.stream.unwrap_or(false) {
        let stream = dispatch_streaming(&state, canonical, client_key).await?;

        let event_stream = stream.map(|chunk| {
            let wire_chunk = openai::ChatCompletionChunk::from(chunk);
            let json = serde_json::to_string(&wire_chunk).unwrap_or_else(|e| {
                log::error!("failed to serialize streaming chunk: {e}");
                r#"{"error":"serialization failed"}"#.to_string()
            });
            Ok::<_, Infallible>(Event::default().data(json))
        });

        let with_done = event_stream.chain(stream::once(async { Ok::<_, Infallible>(Event::default().data("[DONE]")) }));

        Ok(Sse::new(with_done).into_response())
    } else {
        let response = dispatch_unary(&state, canonical, client_key).await?;
        Ok(Json(openai::ChatCompletionResponse::from(response)).into_response())
    }
}

async fn anthropic_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<anthropic::MessagesRequest>,
) -> Result<Response, AnthropicError> {
    log::debug!("anthropic messages request for model '{}', stream={}", request.model, request.stream.unwrap_or(false));

    let client_key = request::client_api_key(&headers);
    let canonical = CanonicalRequest::from(request);

    if canonical.stream.unwrap_or(false) {
        let stream = dispatch_streaming(&state, canonical, client_key).await?;

        let mut encoder = anthropic::StreamEncoder::new();
        let event_stream = stream.flat_map(move |chunk| stream::iter(encoder.encode(chunk))).map(|event| {
            let json = serde_json::to_string(&event).unwrap_or_else(|e| {
                log::error!("failed to serialize Anthropic stream event: {e}");
                r#"{"type":"error","error":{"type":"api_error","message":"serialization failed"}}"#.to_string()
            });
            Ok::<_, Infallible>(Event::default().data(json))
        });

        // Anthropic's protocol has no [DONE] sentinel; message_stop already marks the end.
        Ok(Sse::new(event_stream).into_response())
    } else {
        let response = dispatch_unary(&state, canonical, client_key).await?;
        Ok(Json(anthropic::MessagesResponse::from(response)).into_response())
    }
}

async fn list_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut seen = HashSet::new();
    let mut models = Vec::new();

    for service in &state.config.upstream_services {
        for entry in &service.models {
            let (alias, real) = UpstreamServiceConfig::split_alias(entry);
            let id = alias.unwrap_or(real).to_string();

            if seen.insert(id.clone()) {
                models.push(CanonicalModel { id, created: 0, owned_by: service.name.clone() });
            }
        }
    }

    log::debug!("returning {} models across {} upstream services", models.len(), state.config.upstream_services.len());
    Json(openai::ModelsResponse::from(models))
}

fn function_calling_enabled(state: &AppState, upstream: &UpstreamServiceConfig) -> bool {
    upstream.inject_function_calling.unwrap_or(state.config.features.enable_function_calling)
}

/// Picks the API key for an outbound call to `upstream`: the client's own forwarded bearer
/// token when `key_passthrough` is on and one was presented, otherwise the upstream's
/// configured key. Reconstructs a fresh [`SecretString`] rather than relying on `Clone`, so
/// this holds regardless of whether the underlying secret type derives it.
fn resolve_api_key(state: &AppState, upstream: &UpstreamServiceConfig, client_key: Option<&SecretString>) -> ProxyResult<SecretString> {
    if state.config.features.key_passthrough {
        if let Some(key) = client_key {
            return Ok(SecretString::from(key.expose_secret().to_string()));
        }
    }

    upstream
        .api_key
        .as_ref()
        .map(|key| SecretString::from(key.expose_secret().to_string()))
        .ok_or_else(|| ProxyError::UpstreamClientError {
            status: 401,
            message: format!("no API key configured for upstream '{}'", upstream.name),
        })
}

fn content_text(content: &CanonicalContent) -> String {
    match content {
        CanonicalContent::Text(text) => text.clone(),
        CanonicalContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                CanonicalBlock::Text { text } => Some(text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn generate_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

fn generate_response_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

fn tools_by_name(request: &CanonicalRequest) -> HashMap<String, String> {
    request
        .tools
        .as_ref()
        .map(|tools| tools.iter().map(|t| (t.function.name.clone(), t.function.description.clone())).collect())
        .unwrap_or_default()
}

/// Runs the non-streaming request through the function-calling pipeline and upstream
/// failover loop: `400`/`401`/`403` responses are forwarded immediately, anything else
/// transient advances to the next candidate upstream.
async fn dispatch_unary(state: &AppState, mut canonical: CanonicalRequest, client_key: Option<SecretString>) -> ProxyResult<CanonicalResponse> {
    let decision = state.router.find_upstream(&canonical.model)?;
    let primary = decision.upstreams.first().ok_or(ProxyError::NoUpstreamsConfigured)?;
    let enabled = function_calling_enabled(state, primary);
    let descriptions = tools_by_name(&canonical);

    if enabled {
        canonical.messages = message_rewriter::rewrite_messages(
            canonical.messages,
            &state.sentinel,
            &state.id_map,
            state.config.features.convert_developer_to_system,
        );
        prompt_injector::inject(&mut canonical, &state.sentinel, primary.optimize_prompt, state.config.features.prompt_template.as_deref());
    }

    canonical.model = decision.effective_model.clone();
    canonical.stream = Some(false);

    let mut last_err = None;

    for upstream in &decision.upstreams {
        let mut outgoing = canonical.clone();
        outgoing.model = upstream.model_mapping.get(&decision.effective_model).cloned().unwrap_or_else(|| decision.effective_model.clone());

        match send_unary(state, upstream, client_key.as_ref(), outgoing).await {
            Ok(mut response) => {
                if enabled {
                    apply_tool_call_detection(&mut response, &state.sentinel, &descriptions, &state.id_map);
                }
                return Ok(response);
            }
            Err(err @ ProxyError::UpstreamClientError { .. }) => return Err(err),
            Err(err) => {
                log::warn!("upstream '{}' failed, trying next candidate: {err}", upstream.name);
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or(ProxyError::NoUpstreamsConfigured))
}

async fn send_unary(
    state: &AppState,
    upstream: &UpstreamServiceConfig,
    client_key: Option<&SecretString>,
    request: CanonicalRequest,
) -> ProxyResult<CanonicalResponse> {
    let key = resolve_api_key(state, upstream, client_key)?;
    let body = openai::ChatCompletionRequest::from(request);
    let url = format!("{}/chat/completions", upstream.base_url.trim_end_matches('/'));

    let response = state
        .http
        .post(&url)
        .bearer_auth(key.expose_secret())
        .json(&body)
        .send()
        .await
        .map_err(|e| ProxyError::UpstreamTransient(format!("{}: {e}", upstream.name)))?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(match classify_status(status.as_u16()) {
            FailoverAction::Fail => ProxyError::UpstreamClientError { status: status.as_u16(), message },
            FailoverAction::Retry => ProxyError::UpstreamTransient(format!("{} ({}): {}", upstream.name, status.as_u16(), message)),
        });
    }

    let text = response.text().await.map_err(|e| ProxyError::UpstreamTransient(format!("{}: {e}", upstream.name)))?;
    let parsed: openai::ChatCompletionResponse =
        serde_json::from_str(&text).map_err(|e| ProxyError::UpstreamTransient(format!("{}: invalid response body ({e})", upstream.name)))?;

    Ok(CanonicalResponse::from(parsed))
}

/// Recovers a tool call from a completed assistant message, if the sentinel and a
/// well-formed `function_calls` block are present. Leaves the response untouched otherwise,
/// whether the sentinel never appeared or the model botched the XML after emitting it.
fn apply_tool_call_detection(response: &mut CanonicalResponse, sentinel: &str, descriptions: &HashMap<String, String>, id_map: &IdMap) {
    let Some(choice) = response.choices.first_mut() else { return };
    let text = content_text(&choice.message.content);

    let Some(calls) = parser::parse_function_calls(&text, sentinel) else { return };

    let visible = parser::visible_prefix(&text, sentinel);
    let tool_calls = calls.into_iter().map(|call| parsed_call_to_canonical(call, descriptions, id_map)).collect();

    choice.message.content = CanonicalContent::Text(visible);
    choice.message.tool_calls = Some(tool_calls);
    choice.finish_reason = CanonicalFinishReason::ToolCalls;
}

fn parsed_call_to_canonical(call: ParsedCall, descriptions: &HashMap<String, String>, id_map: &IdMap) -> CanonicalToolCall {
    let id = generate_call_id();
    let args_value = Value::Object(call.args.into_iter().collect());
    let description = descriptions.get(&call.name).cloned().unwrap_or_default();
    id_map.store(&id, &call.name, args_value.clone(), &description);

    CanonicalToolCall { id, function: CanonicalFunctionCall { name: call.name, arguments: CanonicalArguments::Value(args_value) } }
}

/// Dispatches the streaming request to the highest-priority candidate upstream only — a
/// stream already in flight to the client can't be silently restarted against a different
/// backend, so there is no failover path here.
async fn dispatch_streaming(
    state: &AppState,
    mut canonical: CanonicalRequest,
    client_key: Option<SecretString>,
) -> ProxyResult<impl Stream<Item = CanonicalChunk> + Send + use<>> {
    let decision = state.router.find_upstream(&canonical.model)?;
    let upstream = decision.upstreams.into_iter().next().ok_or(ProxyError::NoUpstreamsConfigured)?;
    let enabled = function_calling_enabled(state, &upstream);
    let descriptions = tools_by_name(&canonical);

    if enabled {
        canonical.messages = message_rewriter::rewrite_messages(
            canonical.messages,
            &state.sentinel,
            &state.id_map,
            state.config.features.convert_developer_to_system,
        );
        prompt_injector::inject(&mut canonical, &state.sentinel, upstream.optimize_prompt, state.config.features.prompt_template.as_deref());
    }

    canonical.model = upstream.model_mapping.get(&decision.effective_model).cloned().unwrap_or_else(|| decision.effective_model.clone());
    canonical.stream = Some(true);

    let key = resolve_api_key(state, &upstream, client_key.as_ref())?;
    let body = openai::ChatCompletionRequest::from(canonical);
    let url = format!("{}/chat/completions", upstream.base_url.trim_end_matches('/'));

    let response = state
        .http
        .post(&url)
        .bearer_auth(key.expose_secret())
        .json(&body)
        .send()
        .await
        .map_err(|e| ProxyError::UpstreamTransient(format!("{}: {e}", upstream.name)))?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(match classify_status(status.as_u16()) {
            FailoverAction::Fail => ProxyError::UpstreamClientError { status: status.as_u16(), message },
            FailoverAction::Retry => ProxyError::UpstreamTransient(format!("{} ({}): {}", upstream.name, status.as_u16(), message)),
        });
    }

    let events: Pin<Box<dyn Stream<Item = Result<SseEvent, eventsource_stream::EventStreamError<reqwest::Error>>> + Send>> =
        Box::pin(response.bytes_stream().eventsource());

    let ctx = StreamCtx { id: generate_response_id(), model: decision.effective_model, created: unix_now() };

    let cursor = StreamCursor {
        events,
        detector: if enabled { Some(StreamingDetector::new(state.sentinel.clone())) } else { None },
        pending: VecDeque::new(),
        ctx,
        role_sent: false,
        done: false,
        descriptions,
        id_map: Arc::clone(&state.id_map),
    };

    Ok(stream::unfold(cursor, step_stream))
}

struct StreamCtx {
    id: String,
    model: String,
    created: u64,
}

impl StreamCtx {
    fn chunk(&self, choices: Vec<CanonicalChoiceDelta>) -> CanonicalChunk {
        CanonicalChunk { id: self.id.clone().into(), model: self.model.clone().into(), choices, usage: None, created: self.created }
    }
}

/// Per-request state threaded through the `futures::stream::unfold` pump that turns
/// upstream SSE events into canonical chunks. `detector` is `None` when function calling
/// is disabled for this upstream, in which case every delta passes straight through.
struct StreamCursor {
    events: Pin<Box<dyn Stream<Item = Result<SseEvent, eventsource_stream::EventStreamError<reqwest::Error>>> + Send>>,
    detector: Option<StreamingDetector>,
    pending: VecDeque<CanonicalChunk>,
    ctx: StreamCtx,
    role_sent: bool,
    done: bool,
    descriptions: HashMap<String, String>,
    id_map: Arc<IdMap>,
}

async fn step_stream(mut cursor: StreamCursor) -> Option<(CanonicalChunk, StreamCursor)> {
    loop {
        if let Some(chunk) = cursor.pending.pop_front() {
            return Some((chunk, cursor));
        }

        if cursor.done {
            return None;
        }

        let Some(event) = cursor.events.next().await else {
            finish_stream(&mut cursor);
            continue;
        };

        let event = match event {
            Ok(event) => event,
            Err(err) => {
                log::warn!("error reading upstream event stream: {err}");
                continue;
            }
        };

        if event.data == "[DONE]" {
            continue;
        }

        let upstream_chunk: openai::ChatCompletionChunk = match serde_json::from_str(&event.data) {
            Ok(chunk) => chunk,
            Err(err) => {
                log::warn!("failed to parse upstream streaming chunk: {err}");
                continue;
            }
        };

        handle_upstream_chunk(&mut cursor, upstream_chunk);
    }
}

fn handle_upstream_chunk(cursor: &mut StreamCursor, upstream_chunk: openai::ChatCompletionChunk) {
    for choice in upstream_chunk.choices {
        if let Some(text) = choice.delta.content {
            match cursor.detector.as_mut() {
                Some(detector) => {
                    let passthrough = detector.process_chunk(&text);
                    if !passthrough.is_empty() {
                        push_content(cursor, passthrough);
                    }
                }
                None => push_content(cursor, text),
            }
        }

        if cursor.detector.as_ref().is_some_and(StreamingDetector::ready_to_finalize) {
            finalize_tool_call(cursor);
            continue;
        }

        if let Some(finish_reason) = choice.finish_reason {
            if !cursor.done {
                if cursor.detector.as_ref().is_some_and(StreamingDetector::is_tool_parsing) {
                    // The sentinel arrived but the upstream ended the turn before
                    // `</function_calls>` closed out: finalize on whatever XML was
                    // buffered rather than silently dropping it with a plain stop.
                    finalize_tool_call(cursor);
                    continue;
                }

                flush_passthrough_tail(cursor);
                cursor.pending.push_back(cursor.ctx.chunk(vec![CanonicalChoiceDelta {
                    index: 0,
                    delta: CanonicalMessageDelta::default(),
                    finish_reason: Some(CanonicalFinishReason::from(finish_reason)),
                }]));
                cursor.done = true;
            }
        }
    }
}

fn finish_stream(cursor: &mut StreamCursor) {
    if cursor.done {
        return;
    }

    if cursor.detector.as_ref().is_some_and(StreamingDetector::is_tool_parsing) {
        finalize_tool_call(cursor);
        return;
    }

    flush_passthrough_tail(cursor);
    cursor.pending.push_back(cursor.ctx.chunk(vec![CanonicalChoiceDelta {
        index: 0,
        delta: CanonicalMessageDelta::default(),
        finish_reason: Some(CanonicalFinishReason::Stop),
    }]));
    cursor.done = true;
}

fn flush_passthrough_tail(cursor: &mut StreamCursor) {
    let Some(detector) = cursor.detector.as_mut() else { return };
    let tail = detector.finish();
    if !tail.is_empty() {
        push_content(cursor, tail);
    }
}

fn finalize_tool_call(cursor: &mut StreamCursor) {
    let calls = cursor.detector.as_mut().map(StreamingDetector::finalize).unwrap_or_default();

    if calls.is_empty() {
        push_parse_failure(cursor);
    } else {
        push_tool_calls(cursor, calls);
    }

    cursor.done = true;
}

fn push_content(cursor: &mut StreamCursor, text: String) {
    let role = if cursor.role_sent { None } else { Some(CanonicalRole::Assistant) };
    cursor.role_sent = true;

    cursor.pending.push_back(cursor.ctx.chunk(vec![CanonicalChoiceDelta {
        index: 0,
        delta: CanonicalMessageDelta { role, content: Some(text), tool_calls: None },
        finish_reason: None,
    }]));
}

fn push_tool_calls(cursor: &mut StreamCursor, calls: Vec<ParsedCall>) {
    let tool_calls: Vec<CanonicalStreamingToolCall> = calls
        .into_iter()
        .enumerate()
        .map(|(index, call)| {
            let id = generate_call_id();
            let args_value = Value::Object(call.args.into_iter().collect());
            let description = cursor.descriptions.get(&call.name).cloned().unwrap_or_default();
            cursor.id_map.store(&id, &call.name, args_value.clone(), &description);

            CanonicalStreamingToolCall::Start {
                index,
                id,
                function: CanonicalFunctionStart { name: call.name, arguments: serde_json::to_string(&args_value).unwrap_or_default() },
            }
        })
        .collect();

    cursor.pending.push_back(cursor.ctx.chunk(vec![CanonicalChoiceDelta {
        index: 0,
        delta: CanonicalMessageDelta { role: Some(CanonicalRole::Assistant), content: None, tool_calls: Some(tool_calls) },
        finish_reason: None,
    }]));
    cursor.pending.push_back(cursor.ctx.chunk(vec![CanonicalChoiceDelta {
        index: 0,
        delta: CanonicalMessageDelta::default(),
        finish_reason: Some(CanonicalFinishReason::ToolCalls),
    }]));
}

fn push_parse_failure(cursor: &mut StreamCursor) {
    log::warn!("detected trigger sentinel but failed to parse a function_calls block from the stream");

    push_content(cursor, STREAM_PARSE_FAILURE_MESSAGE.to_string());
    cursor.pending.push_back(cursor.ctx.chunk(vec![CanonicalChoiceDelta {
        index: 0,
        delta: CanonicalMessageDelta::default(),
        finish_reason: Some(CanonicalFinishReason::Stop),
    }]));
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use config::{ClientAuthConfig, Config};
    use secrecy::SecretString;
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;
    use crate::canonical::{CanonicalChoice, CanonicalFunction, CanonicalImageSource, CanonicalMessage, CanonicalTool, CanonicalUsage};

    fn upstream(name: &str, base_url: String, api_key: Option<&str>, priority: i32) -> UpstreamServiceConfig {
        UpstreamServiceConfig {
            name: name.to_string(),
            base_url,
            api_key: api_key.map(|k| SecretString::from(k.to_string())),
            models: vec!["gpt-4o".to_string()],
            model_mapping: Default::default(),
            description: String::new(),
            is_default: false,
            priority,
            inject_function_calling: None,
            optimize_prompt: false,
        }
    }

    fn minimal_request(model: &str) -> CanonicalRequest {
        CanonicalRequest {
            model: model.to_string(),
            messages: vec![CanonicalMessage {
                role: CanonicalRole::User,
                content: CanonicalContent::Text("hi".to_string()),
                tool_calls: None,
                tool_call_id: None,
            }],
            system: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop_sequences: None,
            stream: Some(false),
            tools: None,
            tool_choice: None,
            parallel_tool_calls: None,
        }
    }

    fn state_with(services: Vec<UpstreamServiceConfig>) -> AppState {
        let config = Config { upstream_services: services, client_authentication: ClientAuthConfig::default(), ..Default::default() };

        AppState {
            router: UpstreamRouter::new(&config),
            config,
            id_map: Arc::new(IdMap::default()),
            sentinel: "<Function_Test_Start/>".to_string(),
            http: http_client::http_client(),
        }
    }

    #[test]
    fn resolve_api_key_prefers_client_key_under_passthrough() {
        let mut state = state_with(vec![upstream("svc", "http://example.invalid".to_string(), Some("configured-key"), 1)]);
        state.config.features.key_passthrough = true;

        let upstream = state.config.upstream_services[0].clone();
        let client_key = SecretString::from("client-key".to_string());

        let resolved = resolve_api_key(&state, &upstream, Some(&client_key)).unwrap();
        assert_eq!(resolved.expose_secret(), "client-key");
    }

    #[test]
    fn resolve_api_key_falls_back_to_upstream_key_without_passthrough() {
        let state = state_with(vec![upstream("svc", "http://example.invalid".to_string(), Some("configured-key"), 1)]);
        let upstream = state.config.upstream_services[0].clone();
        let client_key = SecretString::from("client-key".to_string());

        let resolved = resolve_api_key(&state, &upstream, Some(&client_key)).unwrap();
        assert_eq!(resolved.expose_secret(), "configured-key");
    }

    #[test]
    fn resolve_api_key_errors_without_any_key() {
        let state = state_with(vec![upstream("svc", "http://example.invalid".to_string(), None, 1)]);
        let upstream = state.config.upstream_services[0].clone();

        let err = resolve_api_key(&state, &upstream, None).unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamClientError { status: 401, .. }));
    }

    #[test]
    fn apply_tool_call_detection_rewrites_response_when_sentinel_parses() {
        let sentinel = "<Function_Test_Start/>";
        let id_map = IdMap::default();
        let mut descriptions = HashMap::new();
        descriptions.insert("get_weather".to_string(), "fetches the weather".to_string());

        let mut response = CanonicalResponse {
            id: "chatcmpl-1".to_string(),
            model: "gpt-4o".to_string(),
            choices: vec![CanonicalChoice {
                index: 0,
                message: CanonicalMessage {
                    role: CanonicalRole::Assistant,
                    content: CanonicalContent::Text(format!(
                        "Let me check.\n{sentinel}\n<function_calls><function_call><tool>get_weather</tool><args><city>\"nyc\"</city></args></function_call></function_calls>"
                    )),
                    tool_calls: None,
                    tool_call_id: None,
                },
                finish_reason: CanonicalFinishReason::Stop,
            }],
            usage: CanonicalUsage::default(),
            created: 0,
        };

        apply_tool_call_detection(&mut response, sentinel, &descriptions, &id_map);

        let choice = &response.choices[0];
        assert_eq!(choice.finish_reason, CanonicalFinishReason::ToolCalls);
        let calls = choice.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "get_weather");
        match &choice.message.content {
            CanonicalContent::Text(text) => assert_eq!(text, "Let me check."),
            other => panic!("expected text content, got {other:?}"),
        }
        assert!(id_map.get(&calls[0].id).is_some());
    }

    #[test]
    fn apply_tool_call_detection_leaves_response_untouched_without_sentinel() {
        let sentinel = "<Function_Test_Start/>";
        let id_map = IdMap::default();
        let descriptions = HashMap::new();
        let original_text = "just a plain answer, no tools needed".to_string();

        let mut response = CanonicalResponse {
            id: "chatcmpl-1".to_string(),
            model: "gpt-4o".to_string(),
            choices: vec![CanonicalChoice {
                index: 0,
                message: CanonicalMessage {
                    role: CanonicalRole::Assistant,
                    content: CanonicalContent::Text(original_text.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                },
                finish_reason: CanonicalFinishReason::Stop,
            }],
            usage: CanonicalUsage::default(),
            created: 0,
        };

        apply_tool_call_detection(&mut response, sentinel, &descriptions, &id_map);

        let choice = &response.choices[0];
        assert_eq!(choice.finish_reason, CanonicalFinishReason::Stop);
        assert!(choice.message.tool_calls.is_none());
        match &choice.message.content {
            CanonicalContent::Text(text) => assert_eq!(text, &original_text),
            other => panic!("expected text content, got {other:?}"),
        }
    }

    #[test]
    fn tools_by_name_snapshots_function_descriptions() {
        let request = CanonicalRequest {
            tools: Some(vec![CanonicalTool {
                function: CanonicalFunction {
                    name: "get_weather".to_string(),
                    description: "fetches the weather".to_string(),
                    parameters: json!({"type": "object"}),
                },
            }]),
            ..minimal_request("gpt-4o")
        };

        let descriptions = tools_by_name(&request);
        assert_eq!(descriptions.get("get_weather"), Some(&"fetches the weather".to_string()));
    }

    #[test]
    fn content_text_joins_text_blocks_and_skips_others() {
        let content = CanonicalContent::Blocks(vec![
            CanonicalBlock::Text { text: "first".to_string() },
            CanonicalBlock::Image { source: CanonicalImageSource::Url { url: "https://example.com/x.png".to_string() } },
            CanonicalBlock::Text { text: "second".to_string() },
        ]);

        assert_eq!(content_text(&content), "first\nsecond");
    }

    async fn spawn_mock(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{address}")
    }

    async fn handle_completions_ok(Json(_body): Json<Value>) -> impl IntoResponse {
        Json(json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion",
            "created": 0,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hello from upstream"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
        }))
    }

    async fn handle_completions_server_error(Json(_body): Json<Value>) -> impl IntoResponse {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "boom"})))
    }

    async fn handle_completions_unauthorized(Json(_body): Json<Value>) -> impl IntoResponse {
        (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"})))
    }

    #[tokio::test]
    async fn dispatch_unary_fails_over_to_next_candidate_on_transient_error() {
        let failing_base = spawn_mock(Router::new().route("/chat/completions", post(handle_completions_server_error))).await;
        let healthy_base = spawn_mock(Router::new().route("/chat/completions", post(handle_completions_ok))).await;

        let state = state_with(vec![
            upstream("failing", failing_base, Some("key-a"), 10),
            upstream("healthy", healthy_base, Some("key-b"), 1),
        ]);

        let response = dispatch_unary(&state, minimal_request("gpt-4o"), None).await.unwrap();
        match &response.choices[0].message.content {
            CanonicalContent::Text(text) => assert_eq!(text, "hello from upstream"),
            other => panic!("expected text content, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_unary_stops_immediately_on_client_error() {
        let base = spawn_mock(Router::new().route("/chat/completions", post(handle_completions_unauthorized))).await;
        let state = state_with(vec![upstream("svc", base, Some("key"), 1)]);

        let err = dispatch_unary(&state, minimal_request("gpt-4o"), None).await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamClientError { status: 401, .. }));
    }

    #[tokio::test]
    async fn dispatch_unary_leaves_response_untouched_when_function_calling_disabled() {
        let base = spawn_mock(Router::new().route("/chat/completions", post(handle_completions_ok))).await;
        let mut svc = upstream("svc", base, Some("key"), 1);
        svc.inject_function_calling = Some(false);
        let state = state_with(vec![svc]);

        let response = dispatch_unary(&state, minimal_request("gpt-4o"), None).await.unwrap();
        match &response.choices[0].message.content {
            CanonicalContent::Text(text) => assert_eq!(text, "hello from upstream"),
            other => panic!("expected text content, got {other:?}"),
        }
        assert_eq!(response.choices[0].finish_reason, CanonicalFinishReason::Stop);
    }

    async fn handle_completions_with_tool_signal(Json(_body): Json<Value>) -> impl IntoResponse {
        Json(json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion",
            "created": 0,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Let me check.\n<Function_Test_Start/>\n<function_calls><function_call><tool>get_weather</tool><args><city>\"nyc\"</city></args></function_call></function_calls>"
                },
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
        }))
    }

    #[tokio::test]
    async fn dispatch_unary_recovers_tool_call_from_the_injected_sentinel() {
        let base = spawn_mock(Router::new().route("/chat/completions", post(handle_completions_with_tool_signal))).await;
        let mut svc = upstream("svc", base, Some("key"), 1);
        svc.inject_function_calling = Some(true);
        let state = state_with(vec![svc]);

        let response = dispatch_unary(&state, minimal_request("gpt-4o"), None).await.unwrap();
        let choice = &response.choices[0];

        assert_eq!(choice.finish_reason, CanonicalFinishReason::ToolCalls);
        let calls = choice.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "get_weather");
        match &choice.message.content {
            CanonicalContent::Text(text) => assert_eq!(text, "Let me check."),
            other => panic!("expected text content, got {other:?}"),
        }
    }

    #[test]
    fn finish_reason_while_tool_parsing_without_closing_tag_finalizes_instead_of_truncating() {
        let sentinel = "<Function_Test_Start/>";
        let mut detector = StreamingDetector::new(sentinel);
        // Sentinel seen, but the upstream ends the turn before `</function_calls>` closes out.
        detector.process_chunk(&format!("{sentinel}<function_calls><function_call><tool>f</tool><args></args>"));
        assert!(detector.is_tool_parsing());
        assert!(!detector.ready_to_finalize());

        let mut cursor = StreamCursor {
            events: Box::pin(stream::empty::<Result<SseEvent, eventsource_stream::EventStreamError<reqwest::Error>>>()),
            detector: Some(detector),
            pending: VecDeque::new(),
            ctx: StreamCtx { id: "chatcmpl-1".to_string(), model: "gpt-4o".to_string(), created: 0 },
            role_sent: false,
            done: false,
            descriptions: HashMap::new(),
            id_map: Arc::new(IdMap::default()),
        };

        let upstream_chunk = openai::ChatCompletionChunk {
            id: "x".to_string(),
            object: openai::ObjectType::ChatCompletionChunk,
            created: 0,
            model: "gpt-4o".to_string(),
            system_fingerprint: None,
            choices: vec![openai::ChatChoiceDelta {
                index: 0,
                delta: openai::ChatMessageDelta::default(),
                logprobs: None,
                finish_reason: Some(openai::FinishReason::Stop),
            }],
            usage: None,
        };

        handle_upstream_chunk(&mut cursor, upstream_chunk);

        assert!(cursor.done);
        assert_eq!(cursor.pending.len(), 2);

        let CanonicalMessageDelta { content, .. } = &cursor.pending[0].choices[0].delta;
        assert_eq!(content.as_deref(), Some(STREAM_PARSE_FAILURE_MESSAGE));
    }
}
