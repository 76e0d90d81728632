// Web server: Axum-based leaderboard frontend.
//
// HTML pages under / and /group/*, JSON under /api/*. Every route except
// the login flow and /health sits behind the force-login middleware.
//
// Auth: Facebook OAuth, then a stateless HMAC-SHA256 session cookie. No
// session table in the DB.

use std::sync::Arc;

use anyhow::Result;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::poller::Collector;

pub mod auth;
pub mod handlers;
pub mod oauth;
pub mod views;

pub use auth::SessionUser;

/// Shared application state threaded through all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub collector: Arc<Collector>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Mark cookies Secure when the public callback URL is https.
    pub fn secure_cookies(&self) -> bool {
        self.config.facebook_callback_url.starts_with("https://")
    }

    /// Header/footer values for an HTML page.
    pub fn page_context(&self, user: Option<SessionUser>) -> views::PageContext {
        views::PageContext {
            user,
            liveness: self.collector.is_running(),
        }
    }
}

/// Start the Axum web server and block until it exits.
pub async fn run_server(
    config: Arc<Config>,
    collector: Arc<Collector>,
    port: u16,
    bind: &str,
) -> Result<()> {
    let state = AppState { collector, config };

    let app = build_router(state);

    let addr = format!("{bind}:{port}");
    info!("crowdstats listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::pages::index))
        .route("/group/{crowd}", get(handlers::pages::crowd))
        .route("/group/{crowd}/{group}", get(handlers::pages::group))
        .route("/group/{crowd}/{group}/{user_id}", get(handlers::pages::user))
        .route("/please-login", get(handlers::pages::please_login))
        .route("/api/data", get(handlers::api::get_data))
        .route("/api/status", get(handlers::api::get_status))
        .route("/api/tokens", get(handlers::tokens::list_tokens))
        .route("/api/tokens/{token}", delete(handlers::tokens::delete_token))
        .route("/auth/facebook", get(handlers::auth::facebook_login))
        .route(
            "/auth/facebook/callback",
            get(handlers::auth::facebook_callback),
        )
        .route("/logout", get(handlers::auth::logout))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::force_login,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check: always returns 200 OK.
async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({ "status": "ok" })),
    )
}

async fn not_found(
    axum::extract::State(state): axum::extract::State<AppState>,
    user: Option<axum::Extension<SessionUser>>,
    uri: axum::http::Uri,
) -> Response {
    let ctx = state.page_context(user.map(|axum::Extension(u)| u));
    (
        StatusCode::NOT_FOUND,
        Html(views::render_not_found(uri.path(), "Page not found!", &ctx)),
    )
        .into_response()
}

/// Typed JSON error response helper.
pub fn api_error(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
}
