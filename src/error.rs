use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::models::{BookingStatus, PromotionRejection, ScheduleId, SeatId, SessionId};

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("schedule {0} not found")]
    ScheduleNotFound(ScheduleId),

    #[error("seat {seat_id} not found in schedule {schedule_id}")]
    SeatNotFound {
        schedule_id: ScheduleId,
        seat_id: SeatId,
    },

    #[error("booking {0} not found")]
    BookingNotFound(Uuid),

    #[error("seats are held or sold by another shopper: {}", join_ids(.seat_ids))]
    SeatConflict { seat_ids: Vec<SeatId> },

    #[error("reservation session {0} has expired")]
    SessionExpired(SessionId),

    #[error("booking cannot move from {from} to {to}: {reason}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
        reason: String,
    },

    #[error("seats are no longer held by this session: {}", join_ids(.seat_ids))]
    SeatNoLongerHeld { seat_ids: Vec<SeatId> },

    #[error("promotion code '{code}' rejected: {reason}")]
    PromotionInvalid {
        code: String,
        reason: PromotionRejection,
    },

    #[error("{reason}")]
    BookingWindowClosed { reason: String },

    #[error("payment declined: {0}")]
    PaymentDeclined(String),

    #[error("payment gateway unavailable: {0}")]
    PaymentUnavailable(String),

    #[error("invalid stored record: {0}")]
    InvalidRecord(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),
}

pub type BookingResult<T> = Result<T, BookingError>;

fn join_ids(ids: &[SeatId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl BookingError {
    /// Машиночитаемый код для клиента.
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::ScheduleNotFound(_) => "schedule_not_found",
            BookingError::SeatNotFound { .. } => "seat_not_found",
            BookingError::BookingNotFound(_) => "booking_not_found",
            BookingError::SeatConflict { .. } => "seat_conflict",
            BookingError::SessionExpired(_) => "session_expired",
            BookingError::InvalidTransition { .. } => "invalid_transition",
            BookingError::SeatNoLongerHeld { .. } => "seat_no_longer_held",
            BookingError::PromotionInvalid { .. } => "promotion_invalid",
            BookingError::BookingWindowClosed { .. } => "booking_window_closed",
            BookingError::PaymentDeclined(_) => "payment_declined",
            BookingError::PaymentUnavailable(_) => "payment_unavailable",
            BookingError::InvalidRecord(_) => "invalid_record",
            BookingError::Validation(_) => "validation_error",
            BookingError::Database(_) => "database_error",
            BookingError::Cache(_) => "cache_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            BookingError::ScheduleNotFound(_)
            | BookingError::SeatNotFound { .. }
            | BookingError::BookingNotFound(_) => StatusCode::NOT_FOUND,
            BookingError::SeatConflict { .. } | BookingError::SeatNoLongerHeld { .. } => {
                StatusCode::CONFLICT
            }
            BookingError::SessionExpired(_) => StatusCode::GONE,
            BookingError::InvalidTransition { .. } | BookingError::BookingWindowClosed { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            BookingError::PromotionInvalid { .. } | BookingError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            BookingError::PaymentDeclined(_) => StatusCode::PAYMENT_REQUIRED,
            BookingError::PaymentUnavailable(_) => StatusCode::BAD_GATEWAY,
            BookingError::InvalidRecord(_)
            | BookingError::Database(_)
            | BookingError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    // Подробности, по которым клиент может исправить ситуацию
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            BookingError::SeatConflict { seat_ids } | BookingError::SeatNoLongerHeld { seat_ids } => {
                Some(json!({ "seat_ids": seat_ids }))
            }
            BookingError::PromotionInvalid { reason, .. } => Some(json!(reason)),
            BookingError::InvalidTransition { from, to, .. } => {
                Some(json!({ "from": from, "to": to }))
            }
            _ => None,
        }
    }
}

#[derive(Serialize)]
pub struct ApiError {
    success: bool,
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }

        // Внутренние ошибки наружу не раскрываем
        let message = match &self {
            BookingError::Database(_) | BookingError::Cache(_) => "internal error".to_string(),
            other => other.to_string(),
        };

        let body = ApiError {
            success: false,
            code: self.code(),
            message,
            details: self.details(),
        };
        (status, Json(body)).into_response()
    }
}
