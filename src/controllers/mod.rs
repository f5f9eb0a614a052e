pub mod bookings;
pub mod live;
pub mod reservations;
pub mod seats;

use axum::Router;
use std::sync::Arc;
use validator::Validate;

use crate::error::{BookingError, BookingResult};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(seats::routes())
        .merge(reservations::routes())
        .merge(bookings::routes())
        .merge(live::routes())
}

/// Проверка тела запроса по правилам `validator`.
pub(crate) fn validated<T: Validate>(request: T) -> BookingResult<T> {
    request
        .validate()
        .map_err(|e| BookingError::Validation(e.to_string()))?;
    Ok(request)
}
