use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

use crate::error::BookingResult;
use crate::models::{ScheduleId, SeatCategory, SeatCounts, SeatId, SeatStatus, ShowType};
use crate::services::booking_window::{self, BookingWindow};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/schedules/{id}/seats", get(get_seat_map))
        .route("/schedules/{id}/booking-window", get(get_booking_window))
}

/* ---------- SEATS ---------- */

#[derive(Debug, Serialize)]
pub struct SeatView {
    pub seat_id: SeatId,
    pub number: i32,
    pub category: SeatCategory,
    pub status: SeatStatus,
    pub price: Decimal,
}

#[derive(Debug, Serialize)]
pub struct RowView {
    pub label: String,
    pub seats: Vec<SeatView>,
}

#[derive(Debug, Serialize)]
pub struct SeatMapResponse {
    pub schedule_id: ScheduleId,
    pub base_price: Decimal,
    pub expected_total: usize,
    pub counts: SeatCounts,
    /// Число мест в карте не совпадает с вместимостью сеанса.
    pub needs_refresh: bool,
    pub rows: Vec<RowView>,
}

// GET /api/schedules/{id}/seats
async fn get_seat_map(
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<ScheduleId>,
) -> BookingResult<Json<SeatMapResponse>> {
    let map = state.store.get_seat_map(schedule_id).await?;
    let counts = map.counts();

    let rows = map
        .rows
        .iter()
        .map(|row| RowView {
            label: row.label.clone(),
            seats: row
                .seats
                .iter()
                .map(|seat| SeatView {
                    seat_id: seat.id.clone(),
                    number: seat.number,
                    category: seat.category,
                    status: seat.status,
                    price: seat.effective_price(map.base_price),
                })
                .collect(),
        })
        .collect();

    Ok(Json(SeatMapResponse {
        schedule_id,
        base_price: map.base_price,
        expected_total: map.expected_total,
        needs_refresh: counts.total != map.expected_total,
        counts,
        rows,
    }))
}

/* ---------- BOOKING WINDOW ---------- */

#[derive(Debug, Serialize)]
pub struct BookingWindowResponse {
    pub schedule_id: ScheduleId,
    pub show_type: ShowType,
    pub starts_at: NaiveDateTime,
    pub window: BookingWindow,
    pub warning: Option<String>,
}

// GET /api/schedules/{id}/booking-window
async fn get_booking_window(
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<ScheduleId>,
) -> BookingResult<Json<BookingWindowResponse>> {
    let schedule = state.schedules.get_schedule(schedule_id).await?;
    let now = state.clock.now();

    Ok(Json(BookingWindowResponse {
        schedule_id,
        show_type: schedule.show_type,
        starts_at: schedule.starts_at(),
        window: booking_window::evaluate(&schedule, now),
        warning: booking_window::urgency_warning(&schedule, now),
    }))
}
