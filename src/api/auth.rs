use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};

use crate::api::handlers::SharedState;
use crate::error::RepositoryError;

/// Header carrying the shared secret on mutating requests
pub const API_KEY_HEADER: &str = "api_key";

/// Proof that the request carried the configured API key.
///
/// Handlers that mutate the repository take this as an argument before any
/// body extractor, so a rejected request is never processed further.
#[derive(Debug, Clone, Copy)]
pub struct ApiKey;

#[async_trait]
impl FromRequestParts<SharedState> for ApiKey {
    type Rejection = RepositoryError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.api_key.as_deref() else {
            log::error!("Rejecting {} {}: no API key configured", parts.method, parts.uri);
            return Err(RepositoryError::Configuration(
                "the server has no API key configured".to_string(),
            ));
        };

        match extract_header_value(&parts.headers, API_KEY_HEADER) {
            Some(provided) if provided == expected => Ok(ApiKey),
            Some(_) => {
                log::warn!("Invalid API key for {} {}", parts.method, parts.uri);
                Err(RepositoryError::Authentication("invalid API key".to_string()))
            }
            None => Err(RepositoryError::Authentication(format!(
                "missing '{}' header",
                API_KEY_HEADER
            ))),
        }
    }
}

/// Extract header value as string
fn extract_header_value<'a>(headers: &'a HeaderMap, header_name: &str) -> Option<&'a str> {
    headers.get(header_name).and_then(|value| value.to_str().ok())
}
