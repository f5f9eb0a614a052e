//! Хранилище карт мест - единственный авторитетный источник статусов мест.
//!
//! Помимо простых чтения/записи хранилище предоставляет атомарные операции
//! "проверить и установить", на которых построен менеджер резервов:
//! захват мест целиком или никак, освобождение только своих мест,
//! продажа только тех мест, что всё ещё удерживаются сессией.

use async_trait::async_trait;

use crate::error::BookingResult;
use crate::models::{ScheduleId, Seat, SeatId, SeatMap, SeatStatus, SessionId};

pub mod memory;
pub mod postgres;

pub use memory::InMemorySeatMapStore;
pub use postgres::PgSeatMapStore;

#[async_trait]
pub trait SeatMapStore: Send + Sync {
    async fn get_seat_map(&self, schedule_id: ScheduleId) -> BookingResult<SeatMap>;

    async fn get_seat(&self, schedule_id: ScheduleId, seat_id: &SeatId) -> BookingResult<Seat>;

    /// Прямая установка статуса (обслуживание, блокировка места). Снимает отметку
    /// сессии, если новый статус не RESERVED.
    async fn set_seat_status(
        &self,
        schedule_id: ScheduleId,
        seat_id: &SeatId,
        status: SeatStatus,
    ) -> BookingResult<()>;

    /// Все места или ни одного: каждое должно быть свободно либо уже удерживаться
    /// `session_id`/`prior`. Иначе `SeatConflict` со списком всех конфликтных мест.
    async fn hold_seats(
        &self,
        schedule_id: ScheduleId,
        seat_ids: &[SeatId],
        session_id: &SessionId,
        prior: Option<&SessionId>,
    ) -> BookingResult<()>;

    /// RESERVED -> AVAILABLE только для мест, всё ещё помеченных этой сессией.
    /// `only` сужает набор. Возвращает реально освобождённые места.
    async fn release_seats(
        &self,
        schedule_id: ScheduleId,
        session_id: &SessionId,
        only: Option<&[SeatId]>,
    ) -> BookingResult<Vec<SeatId>>;

    /// RESERVED -> SOLD. Если хоть одно место больше не удерживается сессией,
    /// ничего не меняется и возвращается `SeatNoLongerHeld`.
    async fn sell_seats(
        &self,
        schedule_id: ScheduleId,
        seat_ids: &[SeatId],
        session_id: &SessionId,
    ) -> BookingResult<()>;

    /// SOLD -> AVAILABLE (отмена, возврат).
    async fn free_sold_seats(
        &self,
        schedule_id: ScheduleId,
        seat_ids: &[SeatId],
    ) -> BookingResult<Vec<SeatId>>;

    async fn insert_seat_map(&self, map: &SeatMap) -> BookingResult<()>;
}

/// Можно ли захватить место для `session_id`, учитывая предыдущую сессию покупателя.
pub(crate) fn can_hold(seat: &Seat, session_id: &SessionId, prior: Option<&SessionId>) -> bool {
    match seat.status {
        SeatStatus::Available => true,
        SeatStatus::Reserved => match seat.held_by.as_ref() {
            Some(holder) => holder == session_id || Some(holder) == prior,
            None => false,
        },
        SeatStatus::Sold | SeatStatus::Disabled | SeatStatus::Maintenance => false,
    }
}
