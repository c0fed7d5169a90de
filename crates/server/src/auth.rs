//! Bearer-token authentication layer gating every proxied request.
//!
//! Mirrors the passthrough-vs-allow-list branching a provider request makes over whether
//! to forward the caller's own credential or substitute a configured one: here the same
//! boolean decides whether the client's own bearer token must match the configured
//! allow-list, or is accepted unchecked because `key_passthrough` means upstream key
//! selection happens per-request instead.

use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::body::Body;
use http::{Request, Response, StatusCode, header};
use serde::Serialize;
use tower::Layer;

/// Builds an [`AuthService`] wrapping whatever inner service it is applied to.
#[derive(Debug, Clone)]
pub struct AuthLayer {
    inner: Arc<Config>,
}

#[derive(Debug)]
struct Config {
    allowed_keys: Vec<String>,
    passthrough: bool,
}

impl AuthLayer {
    /// `allowed_keys` is ignored entirely when `passthrough` is `true`.
    pub fn new(allowed_keys: Vec<String>, passthrough: bool) -> Self {
        Self { inner: Arc::new(Config { allowed_keys, passthrough }) }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, next: S) -> Self::Service {
        AuthService { next, config: self.inner.clone() }
    }
}

/// Validates `Authorization: Bearer <key>` against the configured allow-list before
/// forwarding the request.
#[derive(Clone)]
pub struct AuthService<S> {
    next: S,
    config: Arc<Config>,
}

impl<S, ReqBody> tower::Service<Request<ReqBody>> for AuthService<S>
where
    S: tower::Service<Request<ReqBody>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Display,
    ReqBody: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();
        let config = self.config.clone();

        Box::pin(async move {
            if config.passthrough {
                return next.call(req).await;
            }

            let presented = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "));

            match presented {
                Some(token) if config.allowed_keys.iter().any(|key| key == token) => next.call(req).await,
                _ => Ok(unauthorized()),
            }
        })
    }
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: &'static str,
}

fn unauthorized() -> Response<Body> {
    let body = serde_json::to_string(&AuthErrorBody { error: "missing or invalid API key" })
        .unwrap_or_else(|_| r#"{"error":"missing or invalid API key"}"#.to_string());

    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::WWW_AUTHENTICATE, "Bearer")
        .body(Body::from(body))
        .expect("static response is always valid")
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::Body, routing::get};
    use http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    fn app(allowed_keys: Vec<String>, passthrough: bool) -> Router {
        Router::new().route("/", get(|| async { "ok" })).layer(AuthLayer::new(allowed_keys, passthrough))
    }

    #[tokio::test]
    async fn rejects_missing_bearer_token() {
        let response = app(vec!["secret".to_string()], false)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn accepts_allow_listed_token() {
        let response = app(vec!["secret".to_string()], false)
            .oneshot(Request::builder().uri("/").header(header::AUTHORIZATION, "Bearer secret").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rejects_token_not_on_allow_list() {
        let response = app(vec!["secret".to_string()], false)
            .oneshot(Request::builder().uri("/").header(header::AUTHORIZATION, "Bearer wrong").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn passthrough_accepts_any_request() {
        let response = app(vec![], true).oneshot(Request::builder().uri("/").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
