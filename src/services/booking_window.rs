//! Окно продаж: можно ли сейчас бронировать места на сеанс.
//!
//! Кино продаётся до 15 минут после начала, остальные показы закрываются
//! в момент начала. Отдельно - мягкое предупреждение за 30 минут до начала.

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use crate::error::{BookingError, BookingResult};
use crate::models::{Schedule, ShowType};

const MOVIE_GRACE_MINUTES: i64 = 15;
const URGENCY_MINUTES: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BookingWindow {
    Open,
    Closed { reason: String, minutes_elapsed: i64 },
}

impl BookingWindow {
    pub fn is_open(&self) -> bool {
        matches!(self, BookingWindow::Open)
    }
}

pub fn evaluate(schedule: &Schedule, now: NaiveDateTime) -> BookingWindow {
    let elapsed = now - schedule.starts_at();
    let minutes_elapsed = elapsed.num_minutes();

    let closed = match schedule.show_type {
        ShowType::Movie => elapsed > Duration::minutes(MOVIE_GRACE_MINUTES),
        _ => elapsed >= Duration::zero(),
    };
    if !closed {
        return BookingWindow::Open;
    }

    let reason = match schedule.show_type {
        ShowType::Movie => format!(
            "Booking is closed: the movie started {} minutes ago and the {}-minute grace period has passed",
            minutes_elapsed, MOVIE_GRACE_MINUTES
        ),
        show_type if minutes_elapsed == 0 => {
            format!("Booking is closed: the {} has just started", show_type.as_str())
        }
        show_type => format!(
            "Booking is closed: the {} started {} minutes ago",
            show_type.as_str(),
            minutes_elapsed
        ),
    };

    BookingWindow::Closed {
        reason,
        minutes_elapsed,
    }
}

pub fn ensure_open(schedule: &Schedule, now: NaiveDateTime) -> BookingResult<()> {
    match evaluate(schedule, now) {
        BookingWindow::Open => Ok(()),
        BookingWindow::Closed { reason, .. } => Err(BookingError::BookingWindowClosed { reason }),
    }
}

/// Не блокирует продажу: только подсказка интерфейсу поторопить покупателя.
pub fn urgency_warning(schedule: &Schedule, now: NaiveDateTime) -> Option<String> {
    let until_start = schedule.starts_at() - now;
    if until_start <= Duration::zero() || until_start > Duration::minutes(URGENCY_MINUTES) {
        return None;
    }
    // Округляем вверх, чтобы не показывать "0 minutes"
    let minutes = (until_start.num_seconds() + 59) / 60;
    Some(format!("Hurry up: the show starts in {} minutes", minutes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use rust_decimal::Decimal;

    fn schedule(show_type: ShowType) -> Schedule {
        Schedule {
            id: 1,
            venue: "Main Hall".to_string(),
            base_price: Decimal::new(250, 0),
            seat_total: 100,
            show_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            show_time: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            show_type,
            sold_seats: 0,
        }
    }

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn movie_has_grace_period() {
        let movie = schedule(ShowType::Movie);
        assert!(evaluate(&movie, at(19, 10)).is_open());
        assert!(evaluate(&movie, at(19, 15)).is_open());

        match evaluate(&movie, at(19, 20)) {
            BookingWindow::Closed {
                reason,
                minutes_elapsed,
            } => {
                assert_eq!(minutes_elapsed, 20);
                assert!(reason.contains("20 minutes"));
            }
            BookingWindow::Open => panic!("movie should be closed at 19:20"),
        }
    }

    #[test]
    fn concert_closes_at_start() {
        let concert = schedule(ShowType::Concert);
        assert!(evaluate(&concert, at(18, 59)).is_open());
        let err = ensure_open(&concert, at(19, 1)).unwrap_err();
        assert!(matches!(err, BookingError::BookingWindowClosed { .. }));
        assert!(err.to_string().contains("1 minutes"));
    }

    #[test]
    fn urgency_only_in_last_half_hour() {
        let concert = schedule(ShowType::Concert);
        assert!(urgency_warning(&concert, at(18, 0)).is_none());
        assert_eq!(
            urgency_warning(&concert, at(18, 45)).as_deref(),
            Some("Hurry up: the show starts in 15 minutes")
        );
        assert!(urgency_warning(&concert, at(19, 0)).is_none());
    }
}
