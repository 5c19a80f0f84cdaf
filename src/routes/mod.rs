mod health;
mod rooms;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(health::health))
        .route("/version", get(health::version))
        .route("/ws", get(crate::gateway::ws_upgrade))
        .nest("/api/v1", api_routes());

    // Static assets are optional; without them unknown paths are plain 404s.
    if let Some(dir) = &state.config.static_dir {
        app = app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new().route("/rooms", get(rooms::list_rooms))
}
