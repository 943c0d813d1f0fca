use crate::handlers;
use crate::middleware;
use crate::AppState;
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

/// Wire every route with its deadline, auth requirement, and rate-limit
/// quota. Layers run outermost-last. On token-bearing routes the auth
/// middleware is outermost so the rate limiter can meter per user ID;
/// on the open login/signup routes the limiter is outermost and meters
/// on the submitted identity, falling back to the client IP.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Liveness; unauthenticated and unmetered.
        .route("/healthcheck", get(handlers::health::healthcheck))
        // Registration
        .route(
            "/api/v1/signup",
            post(handlers::signup::sign_up)
                .layer(TimeoutLayer::new(Duration::from_secs(10)))
                .layer(from_fn_with_state(state.clone(), middleware::rate_limit_signup)),
        )
        .route(
            "/api/v1/signup/verify",
            post(handlers::signup::verify)
                .layer(TimeoutLayer::new(Duration::from_secs(5)))
                .layer(from_fn_with_state(state.clone(), middleware::rate_limit_verify))
                .layer(from_fn_with_state(state.clone(), middleware::require_pre_auth)),
        )
        // Login
        .route(
            "/api/v1/login",
            post(handlers::login::login)
                .layer(TimeoutLayer::new(Duration::from_secs(10)))
                .layer(from_fn_with_state(state.clone(), middleware::rate_limit_login)),
        )
        .route(
            "/api/v1/login/verify-code",
            post(handlers::login::verify_code)
                .layer(TimeoutLayer::new(Duration::from_secs(5)))
                .layer(from_fn_with_state(state.clone(), middleware::rate_limit_verify))
                .layer(from_fn_with_state(state.clone(), middleware::require_pre_auth)),
        )
        .route(
            "/api/v1/login/verify-device",
            post(handlers::login::verify_device)
                .layer(TimeoutLayer::new(Duration::from_secs(30)))
                .layer(from_fn_with_state(state.clone(), middleware::rate_limit_verify))
                .layer(from_fn_with_state(state.clone(), middleware::require_pre_auth)),
        )
        .route(
            "/api/v1/login/device-challenge",
            post(handlers::login::device_challenge)
                .layer(TimeoutLayer::new(Duration::from_secs(30)))
                .layer(from_fn_with_state(state.clone(), middleware::rate_limit_device))
                .layer(from_fn_with_state(state.clone(), middleware::require_pre_auth)),
        )
        // Contact management
        .route(
            "/api/v1/contact/check-address",
            post(handlers::contact::check_address)
                .layer(from_fn_with_state(state.clone(), middleware::rate_limit_contact))
                .layer(from_fn_with_state(state.clone(), middleware::require_auth)),
        )
        .route(
            "/api/v1/contact/verify",
            post(handlers::contact::verify)
                .layer(TimeoutLayer::new(Duration::from_secs(5)))
                .layer(from_fn_with_state(state.clone(), middleware::rate_limit_verify))
                .layer(from_fn_with_state(state.clone(), middleware::require_auth)),
        )
        .route(
            "/api/v1/contact/disable",
            post(handlers::contact::disable)
                .layer(from_fn_with_state(state.clone(), middleware::rate_limit_contact))
                .layer(from_fn_with_state(state.clone(), middleware::require_auth)),
        )
        .route(
            "/api/v1/contact/remove",
            post(handlers::contact::remove)
                .layer(from_fn_with_state(state.clone(), middleware::rate_limit_contact))
                .layer(from_fn_with_state(state.clone(), middleware::require_auth)),
        )
        .route(
            "/api/v1/contact/send",
            post(handlers::contact::send)
                .layer(from_fn_with_state(state.clone(), middleware::rate_limit_contact))
                .layer(from_fn_with_state(state.clone(), middleware::require_auth)),
        )
        // TOTP enrollment
        .route(
            "/api/v1/totp",
            post(handlers::totp::secret)
                .layer(from_fn_with_state(state.clone(), middleware::rate_limit_totp))
                .layer(from_fn_with_state(state.clone(), middleware::require_auth)),
        )
        .route(
            "/api/v1/totp/configure",
            post(handlers::totp::configure)
                .layer(TimeoutLayer::new(Duration::from_secs(5)))
                .layer(from_fn_with_state(state.clone(), middleware::rate_limit_totp))
                .layer(from_fn_with_state(state.clone(), middleware::require_auth)),
        )
        // Device registry
        .route(
            "/api/v1/device",
            post(handlers::device::create)
                .layer(TimeoutLayer::new(Duration::from_secs(30)))
                .layer(from_fn_with_state(state.clone(), middleware::rate_limit_device))
                .layer(from_fn_with_state(state.clone(), middleware::require_auth)),
        )
        .route(
            "/api/v1/device/verify",
            post(handlers::device::verify)
                .layer(TimeoutLayer::new(Duration::from_secs(30)))
                .layer(from_fn_with_state(state.clone(), middleware::rate_limit_device))
                .layer(from_fn_with_state(state.clone(), middleware::require_auth)),
        )
        .route(
            "/api/v1/device/remove/:id",
            post(handlers::device::remove)
                .layer(from_fn_with_state(state.clone(), middleware::rate_limit_device))
                .layer(from_fn_with_state(state.clone(), middleware::require_auth)),
        )
        // Token lifecycle
        .route(
            "/api/v1/token/revoke",
            post(handlers::token::revoke)
                .layer(from_fn_with_state(state.clone(), middleware::rate_limit_token))
                .layer(from_fn_with_state(state.clone(), middleware::require_auth)),
        )
        .route(
            "/api/v1/token/verify",
            post(handlers::token::verify)
                .layer(from_fn_with_state(state.clone(), middleware::rate_limit_token))
                .layer(from_fn_with_state(state.clone(), middleware::require_auth)),
        )
        // Refresh authenticates the bearer itself: the access token may be
        // expired, which the standard middleware would reject. Its quota
        // falls back to the client IP.
        .route(
            "/api/v1/token/refresh",
            post(handlers::token::refresh)
                .layer(from_fn_with_state(state.clone(), middleware::rate_limit_token)),
        )
        // Account settings
        .route(
            "/api/v1/user/password",
            post(handlers::user::update_password)
                .layer(from_fn_with_state(state.clone(), middleware::rate_limit_token))
                .layer(from_fn_with_state(state.clone(), middleware::require_auth)),
        )
        .with_state(state)
}
