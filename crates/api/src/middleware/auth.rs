use crate::error::ApiError;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use stepauth_auth::CLIENT_ID_COOKIE;
use stepauth_models::{Token, TokenState};

/// Extract the signed token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::invalid_token("Authorization header is required"))?
        .to_str()
        .map_err(|_| ApiError::invalid_token("invalid Authorization header"))?;

    value
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(|| ApiError::invalid_token("Authorization header must use Bearer scheme"))
}

/// Extract the plaintext client ID from the request cookies.
pub fn client_id_cookie(headers: &HeaderMap) -> Result<String, ApiError> {
    let cookies = headers
        .get(header::COOKIE)
        .ok_or_else(|| ApiError::invalid_token("client ID cookie is missing"))?
        .to_str()
        .map_err(|_| ApiError::invalid_token("invalid cookie header"))?;

    let prefix = format!("{}=", CLIENT_ID_COOKIE);
    cookies
        .split(';')
        .map(str::trim)
        .find_map(|pair| pair.strip_prefix(prefix.as_str()))
        .map(str::to_string)
        .ok_or_else(|| ApiError::invalid_token("client ID cookie is missing"))
}

/// Validate the bearer token and its client binding, then require the
/// token to be in the expected state.
pub async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    expected: TokenState,
) -> Result<Token, ApiError> {
    let signed = bearer_token(headers)?;
    let client_id = client_id_cookie(headers)?;

    let token = state.token.validate(&signed, &client_id).await?;

    if token.state != expected {
        return Err(ApiError::unauthorized(
            "token state does not permit this operation",
        ));
    }

    Ok(token)
}

/// Middleware for endpoints requiring a fully authorized token.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = authenticate(&state, request.headers(), TokenState::Authorized).await?;
    request.extensions_mut().insert(token);
    Ok(next.run(request).await)
}

/// Middleware for the second-step endpoints, which accept only
/// pre-authorized tokens.
pub async fn require_pre_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = authenticate(&state, request.headers(), TokenState::PreAuthorized).await?;
    request.extensions_mut().insert(token);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn test_bearer_scheme_required() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_err());
        assert!(bearer_token(&HeaderMap::new()).is_err());
    }

    #[test]
    fn test_client_id_cookie_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("session=x; CLIENTID=client-123; theme=dark"),
        );
        assert_eq!(client_id_cookie(&headers).unwrap(), "client-123");
    }

    #[test]
    fn test_missing_client_id_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("session=x"));
        assert!(client_id_cookie(&headers).is_err());
    }
}
