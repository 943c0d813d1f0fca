use crate::error::ApiError;
use crate::AppState;
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use stepauth_cache::rate_limit_key;
use stepauth_models::Token;

/// Identity probes only ever look at small JSON bodies.
const PROBE_BODY_LIMIT: usize = 64 * 1024;

/// Extract the client address from proxy headers.
fn extract_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|h| h.to_str().ok()))
        .unwrap_or("unknown")
        .trim()
        .to_string()
}

/// Identity dimension for token-bearing routes: the validated token's
/// user ID once the auth middleware has run, the client IP otherwise.
fn token_identity_or_ip(request: &Request) -> String {
    request
        .extensions()
        .get::<Token>()
        .map(|token| token.user_id.to_string())
        .unwrap_or_else(|| extract_ip(request.headers()))
}

#[derive(Deserialize)]
struct IdentityProbe {
    #[serde(default)]
    identity: String,
}

/// Identity dimension for the unauthenticated login and signup routes:
/// the `identity` field of the JSON body, so attempts against one
/// account are throttled together no matter how many addresses they
/// arrive from. Falls back to the client IP when the body carries no
/// identity. The buffered body is handed back for the handler to parse.
async fn body_identity_or_ip(request: Request) -> Result<(Request, String), ApiError> {
    let ip = extract_ip(request.headers());

    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, PROBE_BODY_LIMIT)
        .await
        .map_err(|_| ApiError::bad_request("request body could not be read"))?;

    let identity = serde_json::from_slice::<IdentityProbe>(&bytes)
        .ok()
        .map(|probe| probe.identity.trim().to_lowercase())
        .filter(|identity| !identity.is_empty());

    let request = Request::from_parts(parts, Body::from(bytes));
    Ok((request, identity.unwrap_or(ip)))
}

/// Fixed-window check on `ratelimit:<route>:<key>`. A Redis failure lets
/// the request through with a logged warning rather than taking the API
/// down with it.
async fn check(
    state: &AppState,
    route: &'static str,
    max_requests: i64,
    window_seconds: u64,
    key: &str,
) -> Result<(), ApiError> {
    let key = rate_limit_key(route, key);

    match state.cache.incr_with_ttl(&key, window_seconds).await {
        Ok(count) if count > max_requests => {
            tracing::warn!(route, key = %key, "rate limit exceeded");
            Err(ApiError::rate_limited())
        }
        Ok(_) => Ok(()),
        Err(err) => {
            tracing::warn!(route, error = %err, "rate limit check failed; allowing request");
            Ok(())
        }
    }
}

pub async fn rate_limit_login(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (request, key) = body_identity_or_ip(request).await?;
    check(&state, "login", 10, 60, &key).await?;
    Ok(next.run(request).await)
}

pub async fn rate_limit_signup(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (request, key) = body_identity_or_ip(request).await?;
    check(&state, "signup", 5, 300, &key).await?;
    Ok(next.run(request).await)
}

/// Shared by the code and device verification endpoints, which do
/// expensive cryptographic work per attempt. Runs after token
/// validation, so the quota is per target account.
pub async fn rate_limit_verify(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = token_identity_or_ip(&request);
    check(&state, "verify", 10, 60, &key).await?;
    Ok(next.run(request).await)
}

pub async fn rate_limit_contact(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = token_identity_or_ip(&request);
    check(&state, "contact", 10, 60, &key).await?;
    Ok(next.run(request).await)
}

pub async fn rate_limit_totp(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = token_identity_or_ip(&request);
    check(&state, "totp", 10, 60, &key).await?;
    Ok(next.run(request).await)
}

pub async fn rate_limit_device(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = token_identity_or_ip(&request);
    check(&state, "device", 10, 60, &key).await?;
    Ok(next.run(request).await)
}

pub async fn rate_limit_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = token_identity_or_ip(&request);
    check(&state, "token", 30, 60, &key).await?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Utc;
    use stepauth_models::{Token, TokenState};
    use uuid::Uuid;

    fn token() -> Token {
        let now = Utc::now().timestamp();
        Token {
            jti: Uuid::new_v4().to_string(),
            iss: "stepauth".to_string(),
            aud: "stepauth".to_string(),
            iat: now,
            exp: now + 1200,
            client_id_hash: String::new(),
            client_id: String::new(),
            user_id: Uuid::new_v4(),
            email: String::new(),
            phone: String::new(),
            state: TokenState::Authorized,
            code_hash: None,
            code: None,
            otp_method: None,
            otp_address: None,
            refresh_hash: String::new(),
            refresh_key: None,
            tfa_options: Vec::new(),
        }
    }

    #[test]
    fn test_forwarded_ip_preferred() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(extract_ip(&headers), "203.0.113.7");
    }

    #[test]
    fn test_real_ip_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.9"));
        assert_eq!(extract_ip(&headers), "203.0.113.9");
        assert_eq!(extract_ip(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn test_token_identity_preferred_over_ip() {
        let mut request = Request::new(Body::empty());
        request.headers_mut().insert(
            "x-real-ip",
            HeaderValue::from_static("203.0.113.9"),
        );
        assert_eq!(token_identity_or_ip(&request), "203.0.113.9");

        let token = token();
        let user_id = token.user_id;
        request.extensions_mut().insert(token);
        assert_eq!(token_identity_or_ip(&request), user_id.to_string());
    }

    #[tokio::test]
    async fn test_body_identity_probe_normalizes_and_preserves_body() {
        let payload = r#"{"type":"email","identity":"Jane@Example.com","password":"x"}"#;
        let request = Request::new(Body::from(payload));

        let (request, key) = body_identity_or_ip(request).await.unwrap();
        assert_eq!(key, "jane@example.com");

        // The handler still sees the full body.
        let bytes = to_bytes(request.into_body(), PROBE_BODY_LIMIT).await.unwrap();
        assert_eq!(bytes.as_ref(), payload.as_bytes());
    }

    #[tokio::test]
    async fn test_body_without_identity_falls_back_to_ip() {
        let mut request = Request::new(Body::from("{}"));
        request.headers_mut().insert(
            "x-real-ip",
            HeaderValue::from_static("203.0.113.9"),
        );

        let (_, key) = body_identity_or_ip(request).await.unwrap();
        assert_eq!(key, "203.0.113.9");
    }
}
