//! Extracts the client-presented bearer token from the incoming request, for the
//! `key_passthrough` path where the upstream call reuses the caller's own key verbatim
//! instead of the configured one.

use axum::http::{HeaderMap, header};
use secrecy::SecretString;

/// Returns the bearer token the client presented on `Authorization`, if any. The bearer-auth
/// layer has already validated the request by the time a handler runs, so this is only
/// consulted when `key_passthrough` calls for forwarding it verbatim.
pub(crate) fn client_api_key(headers: &HeaderMap) -> Option<SecretString> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|key| SecretString::from(key.to_string()))
}
