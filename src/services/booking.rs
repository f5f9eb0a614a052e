//! Жизненный цикл брони.
//!
//! Оформление: окно продаж -> проверка резерва -> цена и промокод -> PENDING-бронь ->
//! списание оплаты (без блокировок) -> продажа мест и CONFIRMED под мьютексом сеанса.
//! Если резерв истёк между оплатой и продажей мест, бронь уходит в EXPIRED с пометкой
//! о необходимости вернуть деньги, а вызывающий получает `SeatNoLongerHeld`.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{BookingError, BookingResult};
use crate::models::{
    Booking, BookingStatus, CustomerContact, PaymentStatus, Schedule, ScheduleId, Seat,
    SeatBooking, SeatId, SessionId,
};
use crate::repositories::{BookingRepository, ScheduleProvider};
use crate::services::booking_window;
use crate::services::notifications::{dispatch, Notification, NotificationSink};
use crate::services::payment::{CaptureOutcome, PaymentGateway};
use crate::services::pricing::{PricingCalculator, PricingSummary};
use crate::services::reservation::ReservationManager;

const CANCELLATION_CUTOFF_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub schedule_id: ScheduleId,
    pub session_id: SessionId,
    /// Пусто - все места сессии.
    pub seat_ids: Vec<SeatId>,
    pub promo_code: Option<String>,
    pub payment_method_id: String,
    pub customer: CustomerContact,
}

#[derive(Debug, Clone, Serialize)]
pub struct Quote {
    pub schedule_id: ScheduleId,
    pub session_id: SessionId,
    pub seats: Vec<SeatBooking>,
    pub summary: PricingSummary,
    pub promo_code: Option<String>,
}

/// Бронь вместе со статусом, который видит пользователь.
#[derive(Debug, Clone, Serialize)]
pub struct BookingDetails {
    #[serde(flatten)]
    pub booking: Booking,
    pub effective_status: BookingStatus,
}

pub struct BookingService {
    reservations: Arc<ReservationManager>,
    schedules: Arc<dyn ScheduleProvider>,
    bookings: Arc<dyn BookingRepository>,
    pricing: Arc<PricingCalculator>,
    payments: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

impl BookingService {
    pub fn new(
        reservations: Arc<ReservationManager>,
        schedules: Arc<dyn ScheduleProvider>,
        bookings: Arc<dyn BookingRepository>,
        pricing: Arc<PricingCalculator>,
        payments: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reservations,
            schedules,
            bookings,
            pricing,
            payments,
            notifier,
            clock,
        }
    }

    /* ---------- HELPERS ---------- */

    fn now_utc(&self) -> DateTime<Utc> {
        self.clock.now().and_utc()
    }

    fn notify_status(&self, booking: &Booking, from: BookingStatus) {
        dispatch(
            &self.notifier,
            Notification::BookingStatusChanged {
                booking_id: booking.id,
                booking_number: booking.booking_number.clone(),
                schedule_id: booking.schedule_id,
                from,
                to: booking.status,
            },
        );
    }

    async fn persist_transition(
        &self,
        booking: &mut Booking,
        next: BookingStatus,
    ) -> BookingResult<BookingStatus> {
        let previous = booking.transition(next)?;
        booking.updated_at = self.now_utc();
        self.bookings.save_state(booking, previous).await?;
        self.notify_status(booking, previous);
        info!(
            "Booking {} moved {} -> {}",
            booking.booking_number, previous, booking.status
        );
        Ok(previous)
    }

    /// Места сессии с текущими статусами. Каждое обязано всё ещё удерживаться сессией.
    async fn held_seats(
        &self,
        schedule_id: ScheduleId,
        session_id: &SessionId,
        requested: &[SeatId],
    ) -> BookingResult<Vec<Seat>> {
        let session = self
            .reservations
            .session(session_id)
            .ok_or(BookingError::SessionExpired(*session_id))?;
        if session.schedule_id != schedule_id {
            return Err(BookingError::Validation(format!(
                "session {} belongs to schedule {}",
                session_id, session.schedule_id
            )));
        }

        // Повторы в запросе не должны превращаться в лишние места брони
        let seat_ids: BTreeSet<SeatId> = if requested.is_empty() {
            session.seat_ids.clone()
        } else {
            requested.iter().cloned().collect()
        };

        let map = self.reservations.store().get_seat_map(schedule_id).await?;
        let mut seats = Vec::with_capacity(seat_ids.len());
        let mut lost = Vec::new();
        for seat_id in &seat_ids {
            match map.find(seat_id) {
                Some(seat) if session.holds(seat_id) && seat.is_held_by(session_id) => {
                    seats.push(seat.clone())
                }
                Some(_) => lost.push(seat_id.clone()),
                None => {
                    return Err(BookingError::SeatNotFound {
                        schedule_id,
                        seat_id: seat_id.clone(),
                    })
                }
            }
        }

        if !lost.is_empty() {
            return Err(BookingError::SeatNoLongerHeld { seat_ids: lost });
        }
        Ok(seats)
    }

    async fn price(
        &self,
        seats: &[Seat],
        schedule: &Schedule,
        promo_code: Option<&str>,
    ) -> BookingResult<PricingSummary> {
        let summary = self.pricing.summarize(seats, schedule.base_price);
        match promo_code {
            Some(code) => {
                let prices: Vec<Decimal> = seats
                    .iter()
                    .map(|s| s.effective_price(schedule.base_price))
                    .collect();
                let (discounted, _) = self
                    .pricing
                    .apply_promotion(code, &summary, &prices, self.clock.now())
                    .await?;
                Ok(discounted)
            }
            None => Ok(summary),
        }
    }

    /* ---------- QUOTE / CHECKOUT ---------- */

    pub async fn quote(
        &self,
        schedule_id: ScheduleId,
        session_id: &SessionId,
        promo_code: Option<&str>,
    ) -> BookingResult<Quote> {
        let schedule = self.schedules.get_schedule(schedule_id).await?;
        let seats = self.held_seats(schedule_id, session_id, &[]).await?;
        let summary = self.price(&seats, &schedule, promo_code).await?;

        Ok(Quote {
            schedule_id,
            session_id: *session_id,
            seats: seats
                .iter()
                .map(|s| SeatBooking::from_seat(s, schedule.base_price))
                .collect(),
            summary,
            promo_code: promo_code.map(str::to_string),
        })
    }

    pub async fn checkout(&self, request: CheckoutRequest) -> BookingResult<Booking> {
        let schedule = self.schedules.get_schedule(request.schedule_id).await?;
        booking_window::ensure_open(&schedule, self.clock.now())?;

        let seats = self
            .held_seats(schedule.id, &request.session_id, &request.seat_ids)
            .await?;
        let summary = self
            .price(&seats, &schedule, request.promo_code.as_deref())
            .await?;

        let seat_bookings: Vec<SeatBooking> = seats
            .iter()
            .map(|s| SeatBooking::from_seat(s, schedule.base_price))
            .collect();
        let mut booking = Booking::new_pending(
            schedule.id,
            request.session_id,
            seat_bookings,
            &summary,
            request.promo_code.clone(),
            request.customer,
            self.now_utc(),
        );
        self.bookings.insert(&booking).await?;
        info!(
            "Booking {} created for session {} ({} seats, total {})",
            booking.booking_number,
            request.session_id,
            booking.seats.len(),
            booking.total_amount
        );

        // Списание идёт без каких-либо блокировок: резерв ограничен по времени сам
        let transaction_id = if booking.total_amount <= Decimal::ZERO {
            None
        } else {
            match self
                .payments
                .capture(booking.id, &request.payment_method_id, booking.total_amount)
                .await
            {
                Ok(CaptureOutcome::Captured { transaction_id }) => Some(transaction_id),
                Ok(CaptureOutcome::Declined { reason }) => {
                    self.mark_payment_failed(&mut booking).await;
                    return Err(BookingError::PaymentDeclined(reason));
                }
                Err(e) => {
                    self.mark_payment_failed(&mut booking).await;
                    return Err(BookingError::PaymentUnavailable(e.to_string()));
                }
            }
        };

        let mut confirmed = booking.clone();
        confirmed.payment_status = PaymentStatus::Captured;
        confirmed.transaction_id = transaction_id;
        confirmed.transition(BookingStatus::Confirmed)?;

        let seat_ids = booking.seat_ids();
        let repository = Arc::clone(&self.bookings);
        let snapshot = confirmed.clone();
        let committed = self
            .reservations
            .commit_hold(schedule.id, &request.session_id, &seat_ids, move || async move {
                repository.save_state(&snapshot, BookingStatus::Pending).await
            })
            .await;

        if let Err(e) = committed {
            self.abandon_after_capture(&mut booking, confirmed.transaction_id)
                .await;
            return Err(e);
        }

        if let Err(e) = self
            .schedules
            .record_sold(schedule.id, seat_ids.len() as i32)
            .await
        {
            warn!("Failed to bump sold count for schedule {}: {}", schedule.id, e);
        }
        if let Some(code) = &confirmed.promo_code {
            match self.pricing.promotions().record_use(code).await {
                Ok(true) => {}
                Ok(false) => warn!("Promotion {} hit its usage limit concurrently", code),
                Err(e) => warn!("Failed to record use of promotion {}: {}", code, e),
            }
        }

        self.notify_status(&confirmed, BookingStatus::Pending);
        info!("✅ Booking {} confirmed", confirmed.booking_number);
        Ok(confirmed)
    }

    // Оплата не прошла: бронь остаётся PENDING, позже её закроет очистка
    async fn mark_payment_failed(&self, booking: &mut Booking) {
        booking.payment_status = PaymentStatus::Failed;
        booking.updated_at = self.now_utc();
        if let Err(e) = self.bookings.save_state(booking, BookingStatus::Pending).await {
            error!(
                "Failed to record payment failure for booking {}: {}",
                booking.booking_number, e
            );
        }
    }

    // Деньги списаны, а места потеряны
    async fn abandon_after_capture(&self, booking: &mut Booking, transaction_id: Option<String>) {
        booking.transaction_id = transaction_id;
        booking.payment_status = if booking.transaction_id.is_some() {
            PaymentStatus::ReversalRequired
        } else {
            PaymentStatus::Failed
        };
        if let Err(e) = self.persist_transition(booking, BookingStatus::Expired).await {
            error!(
                "Failed to expire booking {} after losing its seats: {}",
                booking.booking_number, e
            );
        }
        warn!(
            "Booking {} lost its hold after payment, marked {}",
            booking.booking_number,
            booking.payment_status.as_str()
        );
    }

    /* ---------- READ ---------- */

    pub async fn get(&self, booking_id: Uuid) -> BookingResult<BookingDetails> {
        let booking = self.bookings.get(booking_id).await?;
        let schedule = self.schedules.get_schedule(booking.schedule_id).await?;
        let effective_status = booking.effective_status(schedule.starts_at(), self.clock.now());
        Ok(BookingDetails {
            booking,
            effective_status,
        })
    }

    /* ---------- TRANSITIONS ---------- */

    /// CONFIRMED -> CANCELLED не позже чем за 24 часа до начала.
    pub async fn cancel(&self, booking_id: Uuid) -> BookingResult<Booking> {
        let mut booking = self.bookings.get(booking_id).await?;
        let schedule = self.schedules.get_schedule(booking.schedule_id).await?;

        if booking.status == BookingStatus::Confirmed
            && schedule.starts_at() - self.clock.now() <= Duration::hours(CANCELLATION_CUTOFF_HOURS)
        {
            return Err(BookingError::InvalidTransition {
                from: booking.status,
                to: BookingStatus::Cancelled,
                reason: format!(
                    "cancellation closes {} hours before the show",
                    CANCELLATION_CUTOFF_HOURS
                ),
            });
        }

        ensure_transition(&booking, BookingStatus::Cancelled)?;
        self.return_to_sale(&booking).await?;
        self.persist_transition(&mut booking, BookingStatus::Cancelled)
            .await?;
        Ok(booking)
    }

    /// CONFIRMED -> REFUND_REQUESTED, только после начала показа.
    pub async fn request_refund(&self, booking_id: Uuid) -> BookingResult<Booking> {
        let mut booking = self.bookings.get(booking_id).await?;
        let schedule = self.schedules.get_schedule(booking.schedule_id).await?;

        if booking.status == BookingStatus::Confirmed && self.clock.now() < schedule.starts_at() {
            return Err(BookingError::InvalidTransition {
                from: booking.status,
                to: BookingStatus::RefundRequested,
                reason: "refunds can be requested only after the show has started".to_string(),
            });
        }

        self.persist_transition(&mut booking, BookingStatus::RefundRequested)
            .await?;
        Ok(booking)
    }

    /// Внешнее одобрение возврата: REFUND_REQUESTED -> REFUNDED.
    pub async fn approve_refund(&self, booking_id: Uuid) -> BookingResult<Booking> {
        let mut booking = self.bookings.get(booking_id).await?;
        ensure_transition(&booking, BookingStatus::Refunded)?;
        self.return_to_sale(&booking).await?;
        booking.payment_status = PaymentStatus::Refunded;
        self.persist_transition(&mut booking, BookingStatus::Refunded)
            .await?;
        Ok(booking)
    }

    /// PENDING -> EXPIRED для брони, оплата которой так и не прошла.
    pub async fn expire_pending(&self, booking_id: Uuid) -> BookingResult<Booking> {
        let mut booking = self.bookings.get(booking_id).await?;
        self.persist_transition(&mut booking, BookingStatus::Expired)
            .await?;
        Ok(booking)
    }

    /// PENDING-брони старше `grace`, у которых больше нет живого резерва.
    pub async fn expire_abandoned(&self, grace: Duration) -> BookingResult<usize> {
        let cutoff = self.now_utc() - grace;
        let mut expired = 0;
        for booking in self.bookings.list_pending(cutoff).await? {
            let hold_alive = booking
                .session_id
                .and_then(|s| self.reservations.session(&s))
                .is_some();
            if hold_alive {
                continue;
            }
            match self.expire_pending(booking.id).await {
                Ok(_) => expired += 1,
                // Бронь успели подтвердить или закрыть параллельно
                Err(BookingError::InvalidTransition { .. }) => {}
                Err(e) => warn!("Failed to expire booking {}: {}", booking.booking_number, e),
            }
        }
        Ok(expired)
    }

    // Места освобождаются до смены статуса: если хранилище недоступно, бронь
    // остаётся в прежнем статусе и операцию можно повторить
    async fn return_to_sale(&self, booking: &Booking) -> BookingResult<()> {
        let freed = self
            .reservations
            .return_seats(booking.schedule_id, &booking.seat_ids())
            .await?;
        if let Err(e) = self
            .schedules
            .record_sold(booking.schedule_id, -(freed.len() as i32))
            .await
        {
            warn!(
                "Failed to lower sold count for schedule {}: {}",
                booking.schedule_id, e
            );
        }
        info!(
            "Booking {}: {} seats back on sale",
            booking.booking_number,
            freed.len()
        );
        Ok(())
    }
}

fn ensure_transition(booking: &Booking, next: BookingStatus) -> BookingResult<()> {
    if booking.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(BookingError::InvalidTransition {
            from: booking.status,
            to: next,
            reason: "transition is not allowed".to_string(),
        })
    }
}
