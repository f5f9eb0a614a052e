use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{ScheduleId, Seat, SeatCategory, SeatId, SessionId};
use crate::error::{BookingError, BookingResult};
use crate::services::pricing::PricingSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    Expired,
    RefundRequested,
    Refunded,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Expired => "EXPIRED",
            BookingStatus::RefundRequested => "REFUND_REQUESTED",
            BookingStatus::Refunded => "REFUNDED",
        }
    }

    /// Разбор сохранённого статуса. Пустой или неизвестный статус - ошибка данных,
    /// а не молчаливое CONFIRMED.
    pub fn parse(value: Option<&str>) -> BookingResult<Self> {
        match value.map(str::trim) {
            Some("PENDING") => Ok(BookingStatus::Pending),
            Some("CONFIRMED") => Ok(BookingStatus::Confirmed),
            Some("CANCELLED") => Ok(BookingStatus::Cancelled),
            Some("COMPLETED") => Ok(BookingStatus::Completed),
            Some("EXPIRED") => Ok(BookingStatus::Expired),
            Some("REFUND_REQUESTED") => Ok(BookingStatus::RefundRequested),
            Some("REFUNDED") => Ok(BookingStatus::Refunded),
            Some(other) if !other.is_empty() => Err(BookingError::InvalidRecord(format!(
                "unknown booking status '{}'",
                other
            ))),
            _ => Err(BookingError::InvalidRecord(
                "booking status is missing".to_string(),
            )),
        }
    }

    /// Единственный источник правды о допустимых переходах.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Expired)
                | (Confirmed, Cancelled)
                | (Confirmed, RefundRequested)
                | (Confirmed, Completed)
                | (RefundRequested, Refunded)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Cancelled
                | BookingStatus::Completed
                | BookingStatus::Expired
                | BookingStatus::Refunded
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Captured,
    Failed,
    /// Деньги списаны, но места потеряны: нужен возврат на стороне шлюза.
    ReversalRequired,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Captured => "CAPTURED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::ReversalRequired => "REVERSAL_REQUIRED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(value: &str) -> BookingResult<Self> {
        match value {
            "PENDING" => Ok(PaymentStatus::Pending),
            "CAPTURED" => Ok(PaymentStatus::Captured),
            "FAILED" => Ok(PaymentStatus::Failed),
            "REVERSAL_REQUIRED" => Ok(PaymentStatus::ReversalRequired),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            other => Err(BookingError::InvalidRecord(format!(
                "unknown payment status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatBooking {
    pub seat_id: SeatId,
    pub row: String,
    pub number: i32,
    pub category: SeatCategory,
    pub price: Decimal,
}

impl SeatBooking {
    pub fn from_seat(seat: &Seat, base_price: Decimal) -> Self {
        Self {
            seat_id: seat.id.clone(),
            row: seat.row.clone(),
            number: seat.number,
            category: seat.category,
            price: seat.effective_price(base_price),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerContact {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub booking_number: String,
    pub schedule_id: ScheduleId,
    pub session_id: Option<SessionId>,
    pub seats: Vec<SeatBooking>,
    pub subtotal: Decimal,
    pub fee: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total_amount: Decimal,
    pub promo_code: Option<String>,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub customer: CustomerContact,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn new_pending(
        schedule_id: ScheduleId,
        session_id: SessionId,
        seats: Vec<SeatBooking>,
        pricing: &PricingSummary,
        promo_code: Option<String>,
        customer: CustomerContact,
        now: DateTime<Utc>,
    ) -> Self {
        let id = Uuid::new_v4();

        Self {
            id,
            booking_number: booking_number(id, now),
            schedule_id,
            session_id: Some(session_id),
            seats,
            subtotal: pricing.subtotal,
            fee: pricing.fee,
            tax: pricing.tax,
            discount: pricing.discount,
            total_amount: pricing.total,
            promo_code,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            transaction_id: None,
            customer,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn seat_ids(&self) -> Vec<SeatId> {
        self.seats.iter().map(|s| s.seat_id.clone()).collect()
    }

    /// Переход по графу состояний; всё, чего нет в графе, - InvalidTransition.
    pub fn transition(&mut self, next: BookingStatus) -> BookingResult<BookingStatus> {
        if !self.status.can_transition_to(next) {
            return Err(BookingError::InvalidTransition {
                from: self.status,
                to: next,
                reason: "transition is not allowed".to_string(),
            });
        }
        let previous = self.status;
        self.status = next;
        self.updated_at = Utc::now();
        Ok(previous)
    }

    /// Статус, который видит пользователь: подтверждённая бронь после начала
    /// показа считается завершённой, даже если это нигде не сохранено.
    pub fn effective_status(&self, show_starts_at: NaiveDateTime, now: NaiveDateTime) -> BookingStatus {
        if self.status == BookingStatus::Confirmed && now >= show_starts_at {
            BookingStatus::Completed
        } else {
            self.status
        }
    }

    pub fn totals_consistent(&self) -> bool {
        self.subtotal + self.fee + self.tax - self.discount == self.total_amount
    }
}

// Внешний номер брони: BK-20250301-3F9A1C
fn booking_number(id: Uuid, now: DateTime<Utc>) -> String {
    let simple = id.simple().to_string().to_uppercase();
    format!("BK-{}-{}", now.format("%Y%m%d"), &simple[..6])
}
