//! Wayfare trip chat server library logic.

pub mod api_chat;
pub mod api_ws;
pub mod background;
pub mod config;
pub mod middleware;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod session;

use axum::{
    routing::{get, post},
    Extension, Json, Router,
};
use config::ChatConfig;
use presence::PresenceBroadcaster;
use registry::RoomRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use wayfare_chat::ChatError;
use wayfare_db::DbPool;

/// Application state shared across all request handlers and sessions.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Live trip chat rooms.
    pub registry: RoomRegistry,
    /// Realtime chat tunables.
    pub chat: ChatConfig,
}

impl AppState {
    pub fn new(pool: DbPool, chat: ChatConfig) -> Self {
        Self {
            pool,
            registry: RoomRegistry::new(),
            chat,
        }
    }

    pub fn presence(&self) -> PresenceBroadcaster {
        PresenceBroadcaster::new(self.registry.clone())
    }
}

/// Runs blocking database work on the blocking thread pool with a pooled
/// connection.
pub async fn with_conn<T, F>(pool: &DbPool, f: F) -> Result<T, ChatError>
where
    F: FnOnce(&rusqlite::Connection) -> Result<T, ChatError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        f(&*conn)
    })
    .await
    .map_err(|e| ChatError::Storage(format!("task join error: {e}")))?
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route(
            "/api/trips/{tripId}/messages",
            get(api_chat::history_handler),
        )
        .route(
            "/api/trips/{tripId}/read",
            post(api_chat::mark_read_handler),
        )
        .route(
            "/api/trips/{tripId}/chat-members",
            get(api_chat::chat_members_handler),
        )
        .route("/api/chat/unread", get(api_chat::unread_handler))
        .layer(axum::middleware::from_fn(middleware::auth_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(api_ws::ws_handler))
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
