//! Error taxonomy shared by both dialects. Every variant carries enough information to
//! render either an OpenAI-shaped or an Anthropic-shaped error body, and to tell the
//! failover loop in the orchestrator whether advancing to the next upstream is worthwhile.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

/// Errors that can occur anywhere along the request pipeline, from client auth through
/// upstream dispatch to response parsing.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The client's own bearer token is missing or not in the configured allow-list.
    #[error("missing or invalid API key")]
    ClientAuth,

    /// The request body failed structural validation before any upstream call was made.
    #[error("{message}")]
    RequestValidation { location: String, message: String },

    /// The requested model has no configured upstream or alias.
    #[error("model '{0}' is not configured")]
    ModelNotConfigured(String),

    /// `model_passthrough` is enabled but no usable upstream exists to send to.
    #[error("no usable upstream is configured")]
    NoUpstreamsConfigured,

    /// The upstream rejected the request itself (`400`/`401`/`403`). Never retried on a
    /// different upstream: the same request would fail there too.
    #[error("upstream rejected the request ({status}): {message}")]
    UpstreamClientError { status: u16, message: String },

    /// A transient upstream failure (`429`, `5xx`, a connection error, an empty body, or a
    /// non-JSON body). The failover loop advances to the next candidate upstream for these.
    #[error("upstream request failed: {0}")]
    UpstreamTransient(String),

    /// The upstream's response could not be parsed into a recognized shape.
    #[error("failed to parse upstream response: {0}")]
    ParseFailure(String),

    /// The on-disk configuration itself is invalid.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ClientAuth => StatusCode::UNAUTHORIZED,
            Self::RequestValidation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ModelNotConfigured(_) | Self::NoUpstreamsConfigured | Self::ConfigInvalid(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::UpstreamClientError { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
            }
            Self::UpstreamTransient(_) | Self::ParseFailure(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Error type string used by the OpenAI-shaped error envelope.
    pub fn openai_type(&self) -> &str {
        match self {
            Self::ClientAuth => "authentication_error",
            Self::RequestValidation { .. } => "invalid_request_error",
            Self::ModelNotConfigured(_) | Self::NoUpstreamsConfigured | Self::ConfigInvalid(_) => "internal_error",
            Self::UpstreamClientError { .. } => "invalid_request_error",
            Self::UpstreamTransient(_) | Self::ParseFailure(_) => "api_error",
        }
    }

    /// Error type string used by the Anthropic-shaped error envelope.
    pub fn anthropic_type(&self) -> &str {
        match self {
            Self::ClientAuth => "authentication_error",
            Self::RequestValidation { .. } => "invalid_request_error",
            Self::ModelNotConfigured(_) | Self::NoUpstreamsConfigured | Self::ConfigInvalid(_) => "api_error",
            Self::UpstreamClientError { .. } => "invalid_request_error",
            Self::UpstreamTransient(_) | Self::ParseFailure(_) => "api_error",
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::ModelNotConfigured(_) | Self::NoUpstreamsConfigured | Self::ConfigInvalid(_) => {
                "internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAiErrorBody {
    error: OpenAiErrorDetails,
}

#[derive(Debug, Serialize)]
struct OpenAiErrorDetails {
    message: String,
    r#type: String,
    code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    param: Option<String>,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let param = match &self {
            Self::RequestValidation { location, .. } => Some(location.clone()),
            _ => None,
        };

        let body = OpenAiErrorBody {
            error: OpenAiErrorDetails { message: self.client_message(), r#type: self.openai_type().to_string(), code: status.as_u16(), param },
        };

        (status, Json(body)).into_response()
    }
}

/// Wraps a [`ProxyError`] to render it in Anthropic's `{"type":"error","error":{...}}` shape
/// instead of the OpenAI-shaped body `IntoResponse` produces by default.
pub struct AnthropicError(pub ProxyError);

#[derive(Debug, Serialize)]
struct AnthropicErrorBody {
    r#type: &'static str,
    error: AnthropicErrorDetails,
}

#[derive(Debug, Serialize)]
struct AnthropicErrorDetails {
    r#type: String,
    message: String,
}

impl IntoResponse for AnthropicError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let body = AnthropicErrorBody {
            r#type: "error",
            error: AnthropicErrorDetails { r#type: self.0.anthropic_type().to_string(), message: self.0.client_message() },
        };

        (status, Json(body)).into_response()
    }
}

impl From<ProxyError> for AnthropicError {
    fn from(error: ProxyError) -> Self {
        Self(error)
    }
}
