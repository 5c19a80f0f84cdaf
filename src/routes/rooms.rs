use axum::extract::State;
use axum::Json;

use crate::error::AppError;
use crate::gateway::hub::RoomSummary;
use crate::state::AppState;

/// List live rooms and their members. Room passwords are never exposed.
pub async fn list_rooms(State(state): State<AppState>) -> Result<Json<Vec<RoomSummary>>, AppError> {
    let rooms = state.hub.snapshot().await?;
    Ok(Json(rooms))
}
