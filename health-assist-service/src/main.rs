//! Process entry point: loads configuration, builds the gateway container,
//! mounts the HTTP surface, and serves with graceful shutdown.

mod handlers;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use health_assist_core::{
    config::Config,
    error::Result,
    health::{health, pool_metrics, readiness},
    middleware::JwtAuth,
    observability::init_tracing,
    server::Server,
    state::AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config)?;

    tracing::info!(service = %config.service.name, port = config.service.port, "starting health-assist-service");

    let state = AppState::builder()
        .config(config.clone())
        .without_tracing()
        .build()
        .await?;

    // JWT verification is a hard startup requirement: almost every business
    // endpoint on this surface requires an authenticated caller, so an
    // unparseable key is a configuration error, not something to start
    // degraded and warn about.
    let jwt_auth = JwtAuth::new(&config.jwt)?;

    let public = Router::new()
        .route("/health", get(health))
        .route("/ready", get(readiness))
        .route("/pool-health", get(pool_metrics));

    let protected = Router::new()
        .route("/chat", post(handlers::chat::chat))
        .route("/chat/stream", post(handlers::chat::chat_stream))
        .route(
            "/session/{session_id}",
            get(handlers::session::get_session).delete(handlers::session::delete_session),
        )
        .route("/session/{session_id}/messages", get(handlers::session::get_session_messages))
        .route("/customer/{uid}", get(handlers::customer::get_customer))
        .route("/customer/{uid}/sessions", get(handlers::customer::get_customer_sessions))
        .route("/cache/stats", get(handlers::cache_admin::cache_stats))
        .route("/cache/invalidate", post(handlers::cache_admin::cache_invalidate))
        .layer(from_fn_with_state(jwt_auth, JwtAuth::middleware));

    let app = public.merge(protected).with_state(state);

    Server::new(config).serve(app).await?;

    Ok(())
}
