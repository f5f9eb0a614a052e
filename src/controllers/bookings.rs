use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::validated;
use crate::error::BookingResult;
use crate::models::{Booking, CustomerContact, ScheduleId, SeatId, SessionId};
use crate::services::{BookingDetails, CheckoutRequest, Quote};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/pricing/quote", post(quote))
        .route("/bookings", post(create_booking))
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/{id}/cancel", patch(cancel_booking))
        .route("/bookings/{id}/refund", patch(request_refund))
        .route("/bookings/{id}/refund/approve", patch(approve_refund))
}

/* ---------- PRICING ---------- */

// POST /api/pricing/quote
#[derive(Debug, Deserialize, Validate)]
pub struct QuoteRequest {
    #[validate(range(min = 1))]
    pub schedule_id: ScheduleId,
    pub session_id: SessionId,
    #[validate(length(min = 1, max = 64))]
    pub promo_code: Option<String>,
}

async fn quote(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QuoteRequest>,
) -> BookingResult<Json<Quote>> {
    let request = validated(request)?;
    let quote = state
        .bookings
        .quote(
            request.schedule_id,
            &request.session_id,
            request.promo_code.as_deref(),
        )
        .await?;
    Ok(Json(quote))
}

/* ---------- BOOKINGS ---------- */

// POST /api/bookings
#[derive(Debug, Deserialize, Validate)]
pub struct CreateBookingRequest {
    #[validate(range(min = 1))]
    pub schedule_id: ScheduleId,
    pub session_id: SessionId,
    #[serde(default)]
    #[validate(length(max = 20))]
    pub seat_ids: Vec<String>,
    #[validate(length(min = 1, max = 64))]
    pub promo_code: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub payment_method_id: String,
    #[validate(length(min = 1, max = 200))]
    pub customer_name: String,
    #[validate(email)]
    pub customer_email: String,
    #[validate(length(min = 5, max = 32))]
    pub customer_phone: Option<String>,
}

impl From<CreateBookingRequest> for CheckoutRequest {
    fn from(r: CreateBookingRequest) -> Self {
        CheckoutRequest {
            schedule_id: r.schedule_id,
            session_id: r.session_id,
            seat_ids: r.seat_ids.iter().map(|id| SeatId::from(id.trim())).collect(),
            promo_code: r.promo_code,
            payment_method_id: r.payment_method_id,
            customer: CustomerContact {
                name: r.customer_name,
                email: r.customer_email,
                phone: r.customer_phone,
            },
        }
    }
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateBookingRequest>,
) -> BookingResult<(StatusCode, Json<Booking>)> {
    let request = validated(request)?;
    let booking = state.bookings.checkout(request.into()).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

// GET /api/bookings/{id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
) -> BookingResult<Json<BookingDetails>> {
    Ok(Json(state.bookings.get(booking_id).await?))
}

// PATCH /api/bookings/{id}/cancel
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
) -> BookingResult<Json<Booking>> {
    Ok(Json(state.bookings.cancel(booking_id).await?))
}

// PATCH /api/bookings/{id}/refund
async fn request_refund(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
) -> BookingResult<Json<Booking>> {
    Ok(Json(state.bookings.request_refund(booking_id).await?))
}

// PATCH /api/bookings/{id}/refund/approve
async fn approve_refund(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
) -> BookingResult<Json<Booking>> {
    Ok(Json(state.bookings.approve_refund(booking_id).await?))
}
