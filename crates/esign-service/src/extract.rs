//! Request extractors for caller identity and network origin.

use crate::error::ApiError;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use esign_core::{OwnerContext, RequestContext};

pub const OWNER_ID_HEADER: &str = "x-owner-id";
pub const OWNER_EMAIL_HEADER: &str = "x-owner-email";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Client address: first `x-forwarded-for` hop, then `x-real-ip`.
pub fn client_ip(headers: &HeaderMap) -> String {
    header(headers, "x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| header(headers, "x-real-ip"))
        .unwrap_or("unknown")
        .to_string()
}

pub fn request_context(headers: &HeaderMap) -> RequestContext {
    RequestContext::new(
        client_ip(headers),
        header(headers, "user-agent").unwrap_or("unknown"),
    )
}

/// Network origin of the current request.
#[derive(Debug, Clone)]
pub struct Client(pub RequestContext);

#[async_trait]
impl<S> FromRequestParts<S> for Client
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(request_context(&parts.headers)))
    }
}

/// Authenticated envelope owner, taken from headers set by the fronting session layer.
#[derive(Debug, Clone)]
pub struct Owner(pub OwnerContext);

#[async_trait]
impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(&parts.headers, OWNER_ID_HEADER)
            .ok_or_else(|| ApiError::unauthorized("missing owner identity"))?;
        let email = header(&parts.headers, OWNER_EMAIL_HEADER).map(str::to_string);
        Ok(Self(OwnerContext::new(
            user_id,
            email,
            request_context(&parts.headers),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(client_ip(&headers), "10.0.0.9");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers), "203.0.113.7");
    }
}
