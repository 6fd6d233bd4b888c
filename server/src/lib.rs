//! HTTP + WebSocket surface over the classdeck session engine.

#![deny(clippy::print_stdout, clippy::print_stderr)]

mod endpoint;
mod http_api;

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use classdeck_core::config::Config;
use classdeck_core::engine::SessionEngine;
use classdeck_core::util::notify_on_sigint;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing::warn;

/// Assemble the router: the realtime endpoint plus the thin CRUD verbs.
pub fn build_router(engine: Arc<SessionEngine>) -> Router {
    let cors_origin = engine.config().cors_origin.clone();
    let mut router = Router::new()
        .route("/ws", get(endpoint::ws_handler))
        .route("/api/sessions", post(http_api::create_session))
        .route(
            "/api/sessions/{code}",
            get(http_api::get_session)
                .put(http_api::update_session)
                .delete(http_api::delete_session),
        )
        .route("/api/sessions/{code}/join", post(http_api::join_session))
        .route("/api/sessions/{code}/end", put(http_api::end_session))
        .route("/api/sessions/{code}/slide/{index}", put(http_api::set_slide))
        .route("/api/sessions/{code}/summaries", get(http_api::all_summaries))
        .route(
            "/api/sessions/{code}/students/{name}/summaries",
            get(http_api::student_summary),
        )
        .with_state(engine);

    if let Some(origin) = cors_origin {
        let cors = if origin == "*" {
            Some(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
        } else {
            match origin.parse::<HeaderValue>() {
                Ok(value) => Some(
                    CorsLayer::new()
                        .allow_origin(value)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
                Err(_) => {
                    warn!("ignoring malformed CORS_ORIGIN {origin:?}");
                    None
                }
            }
        };
        if let Some(cors) = cors {
            router = router.layer(cors);
        }
    }
    router
}

pub async fn run_main(config: Config) -> anyhow::Result<()> {
    let engine = SessionEngine::new(config.clone())?;
    engine.restore_persisted_sessions().await?;

    let app = build_router(engine.clone());
    let bind = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("classdeck listening on {bind} (routes: /ws, /api/sessions)");

    let ctrl_c = notify_on_sigint();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { ctrl_c.notified().await })
        .await?;
    info!("shutting down");
    engine.shutdown();
    Ok(())
}
