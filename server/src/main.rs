//! Readlist Server - reference reading list service for readlist-engine.
//!
//! This server exposes the HTTP endpoints the engine's `HttpRemoteApi`
//! talks to, storing lists and entries in PostgreSQL with soft deletes so
//! every change shows up in the change feed.

mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod routes;

use crate::config::Config;
use crate::db::Pool;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub config: Arc<Config>,
}

/// Build the router with its middleware stack.
fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "readlist_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Readlist Server on {}", config.bind_address());
    if config.auth_secret.is_none() {
        tracing::warn!("AUTH_SECRET not set, anonymous requests are accepted");
    }

    let pool = db::create_pool(&config.database_url, config.max_connections).await?;

    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await?;

    let addr = config.bind_address();
    let app = build_app(AppState {
        pool,
        config: Arc::new(config),
    });

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header::AUTHORIZATION, Request, StatusCode};
    use readlist_engine::api::{ArticleSummary, ErrorBody};
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    /// App whose pool never connects. Only routes that fail before touching
    /// the database can be exercised.
    fn app(auth_secret: Option<&str>) -> Router {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/readlist_test")
            .unwrap();
        build_app(AppState {
            pool,
            config: Arc::new(Config {
                host: "127.0.0.1".into(),
                port: 0,
                database_url: "postgres://localhost/readlist_test".into(),
                auth_secret: auth_secret.map(str::to_string),
                max_connections: 1,
            }),
        })
    }

    async fn get(app: Router, uri: &str, token: Option<&str>) -> (StatusCode, Vec<u8>) {
        let mut request = Request::builder().uri(uri);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = app
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = get(app(None), "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn secret_requires_bearer_token() {
        let (status, _) = get(app(Some("secret")), "/page/summary?key=enwiki:Giraffe", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = get(
            app(Some("secret")),
            "/page/summary?key=enwiki:Giraffe",
            Some("device-1"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn page_summary_is_title_derived() {
        let (status, body) = get(app(None), "/page/summary?key=enwiki:Red_panda", None).await;
        assert_eq!(status, StatusCode::OK);
        let summary: ArticleSummary = serde_json::from_slice(&body).unwrap();
        assert_eq!(summary.display_title.as_deref(), Some("Red panda"));
    }

    #[tokio::test]
    async fn bad_since_timestamp_is_rejected() {
        let (status, body) = get(app(None), "/lists/changes/since/not-a-time", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorBody = serde_json::from_slice(&body).unwrap();
        assert!(error.code.is_none());
    }
}
