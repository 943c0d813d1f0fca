// Stepauth API server
// HTTP surface for multi-factor user authentication.

mod config;
mod error;
mod handlers;
mod middleware;
mod routes;

use config::Config;
use dotenvy::dotenv;
use std::sync::Arc;
use stepauth_auth::{
    MessageConsumer, MessagePublisher, MessageRepo, Messenger, OtpService, PasswordService,
    SmtpEmail, TokenService, TwilioSms, WebauthnService,
};
use stepauth_cache::Cache;
use stepauth_database::RepositoryManager;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub struct AppState {
    pub repo: RepositoryManager,
    pub token: TokenService,
    pub otp: OtpService,
    pub password: PasswordService,
    pub webauthn: WebauthnService,
    pub messaging: MessagePublisher,
    pub cache: Cache,
}

#[tokio::main]
async fn main() {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,stepauth_api=debug".to_string()),
        )
        .init();

    let config = Config::from_env();

    tracing::info!("connecting to Postgres");
    let repo = RepositoryManager::connect(&config.database)
        .await
        .expect("Failed to connect to database");
    repo.ping().await.expect("Database ping failed");

    tracing::info!("connecting to Redis");
    let cache = Cache::new(config.cache.clone())
        .await
        .expect("Failed to connect to Redis");
    cache.ping().await.expect("Redis ping failed");
    let otp = OtpService::new(config.otp.clone());
    let password = PasswordService::new(config.password.clone());
    let token = TokenService::new(
        config.token.clone(),
        cache.clone(),
        otp.clone(),
        repo.clone(),
    );
    let webauthn = WebauthnService::new(config.webauthn.clone(), cache.clone(), repo.clone())
        .expect("Failed to build WebAuthn service");

    let message_repo = Arc::new(MessageRepo::new());
    let messaging = MessagePublisher::new(message_repo.clone());

    let sms = Arc::new(TwilioSms::new(config.sms.clone())) as Arc<dyn Messenger>;
    let email = Arc::new(SmtpEmail::new(config.email.clone()).expect("Failed to build SMTP transport"))
        as Arc<dyn Messenger>;
    let consumer = MessageConsumer::new(&message_repo, sms, email)
        .expect("message queue already consumed")
        .with_workers(config.consumer_workers);

    tracing::info!(workers = config.consumer_workers, "starting message consumer");
    let consumer_handle = tokio::spawn(consumer.run());

    // The publisher inside AppState holds the only remaining queue handle
    // from here on; dropping the state closes the queue.
    drop(message_repo);

    let state = Arc::new(AppState {
        repo,
        token,
        otp,
        password,
        webauthn,
        messaging,
        cache,
    });

    let app = routes::create_router(state.clone())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .expect("Failed to bind to address");
    tracing::info!(addr = %config.http_addr, "API server is starting");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    drop(state);
    if let Err(err) = consumer_handle.await {
        tracing::warn!(error = %err, "message consumer ended abnormally");
    }

    tracing::info!("shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received; draining in-flight requests");
}
