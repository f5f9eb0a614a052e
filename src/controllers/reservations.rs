use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use super::validated;
use crate::error::BookingResult;
use crate::models::{ScheduleId, SeatId, SessionId, SessionInfo};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/reservations", post(reserve_seats))
        .route(
            "/reservations/{session_id}",
            put(extend_reservation).delete(release_reservation),
        )
        .route(
            "/reservations/{session_id}/seats/{seat_id}",
            delete(deselect_seat),
        )
}

fn seat_ids(raw: &[String]) -> Vec<SeatId> {
    raw.iter().map(|id| SeatId::from(id.trim())).collect()
}

// POST /api/reservations
#[derive(Debug, Deserialize, Validate)]
pub struct ReserveRequest {
    #[validate(range(min = 1))]
    pub schedule_id: ScheduleId,
    #[validate(length(min = 1, max = 20))]
    pub seat_ids: Vec<String>,
    /// Текущая сессия покупателя, если он меняет выбор.
    pub session_id: Option<SessionId>,
}

async fn reserve_seats(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ReserveRequest>,
) -> BookingResult<(StatusCode, Json<SessionInfo>)> {
    let request = validated(request)?;
    let session = state
        .reservations
        .reserve(
            request.schedule_id,
            &seat_ids(&request.seat_ids),
            request.session_id.as_ref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(SessionInfo::from(&session))))
}

// PUT /api/reservations/{session_id}
#[derive(Debug, Deserialize, Validate)]
pub struct ExtendRequest {
    #[validate(length(min = 1, max = 20))]
    pub seat_ids: Vec<String>,
}

async fn extend_reservation(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    Json(request): Json<ExtendRequest>,
) -> BookingResult<Json<SessionInfo>> {
    let request = validated(request)?;
    let session = state
        .reservations
        .extend(&session_id, &seat_ids(&request.seat_ids))
        .await?;
    Ok(Json(SessionInfo::from(&session)))
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub session_id: SessionId,
    pub released: Vec<SeatId>,
}

// DELETE /api/reservations/{session_id}
async fn release_reservation(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
) -> BookingResult<Json<ReleaseResponse>> {
    let released = state.reservations.release(&session_id).await?;
    Ok(Json(ReleaseResponse {
        session_id,
        released,
    }))
}

#[derive(Debug, Serialize)]
pub struct DeselectResponse {
    /// `None`, если это было последнее место и сессия закрыта.
    pub session: Option<SessionInfo>,
}

// DELETE /api/reservations/{session_id}/seats/{seat_id}
async fn deselect_seat(
    State(state): State<Arc<AppState>>,
    Path((session_id, seat_id)): Path<(SessionId, String)>,
) -> BookingResult<Json<DeselectResponse>> {
    let remaining = state
        .reservations
        .deselect(&session_id, &SeatId::from(seat_id.as_str()))
        .await?;
    Ok(Json(DeselectResponse {
        session: remaining.as_ref().map(SessionInfo::from),
    }))
}
