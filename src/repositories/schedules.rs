use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use sqlx::FromRow;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::database::Database;
use crate::error::{BookingError, BookingResult};
use crate::models::{Schedule, ScheduleId, ShowType};

/// Источник сведений о сеансах: цена, площадка, вместимость, время, тип показа.
#[async_trait]
pub trait ScheduleProvider: Send + Sync {
    async fn get_schedule(&self, schedule_id: ScheduleId) -> BookingResult<Schedule>;

    /// Изменить счётчик проданных мест. Счётчик не уходит ниже нуля.
    async fn record_sold(&self, schedule_id: ScheduleId, delta: i32) -> BookingResult<()>;
}

/* ---------- IN-MEMORY ---------- */

#[derive(Default)]
pub struct InMemoryScheduleProvider {
    schedules: RwLock<HashMap<ScheduleId, Schedule>>,
}

impl InMemoryScheduleProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, schedule: Schedule) {
        let mut schedules = self.schedules.write().unwrap_or_else(|e| e.into_inner());
        schedules.insert(schedule.id, schedule);
    }
}

#[async_trait]
impl ScheduleProvider for InMemoryScheduleProvider {
    async fn get_schedule(&self, schedule_id: ScheduleId) -> BookingResult<Schedule> {
        let schedules = self.schedules.read().unwrap_or_else(|e| e.into_inner());
        schedules
            .get(&schedule_id)
            .cloned()
            .ok_or(BookingError::ScheduleNotFound(schedule_id))
    }

    async fn record_sold(&self, schedule_id: ScheduleId, delta: i32) -> BookingResult<()> {
        let mut schedules = self.schedules.write().unwrap_or_else(|e| e.into_inner());
        let schedule = schedules
            .get_mut(&schedule_id)
            .ok_or(BookingError::ScheduleNotFound(schedule_id))?;
        schedule.sold_seats = (schedule.sold_seats + delta).max(0);
        Ok(())
    }
}

/* ---------- POSTGRES ---------- */

#[derive(Clone)]
pub struct PgScheduleProvider {
    db: Database,
}

impl PgScheduleProvider {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[derive(Debug, FromRow)]
struct ScheduleRecord {
    id: i64,
    venue: String,
    base_price: Decimal,
    seat_total: i32,
    show_date: NaiveDate,
    show_time: NaiveTime,
    show_type: String,
    sold_seats: i32,
}

impl From<ScheduleRecord> for Schedule {
    fn from(r: ScheduleRecord) -> Self {
        Schedule {
            id: r.id,
            venue: r.venue,
            base_price: r.base_price,
            seat_total: r.seat_total,
            show_date: r.show_date,
            show_time: r.show_time,
            show_type: ShowType::parse(&r.show_type),
            sold_seats: r.sold_seats,
        }
    }
}

#[async_trait]
impl ScheduleProvider for PgScheduleProvider {
    async fn get_schedule(&self, schedule_id: ScheduleId) -> BookingResult<Schedule> {
        let record = sqlx::query_as::<_, ScheduleRecord>(
            r#"
            SELECT id, venue, base_price, seat_total, show_date, show_time, show_type, sold_seats
            FROM schedules
            WHERE id = $1
            "#,
        )
        .bind(schedule_id)
        .fetch_optional(&self.db.pool)
        .await?;

        record
            .map(Schedule::from)
            .ok_or(BookingError::ScheduleNotFound(schedule_id))
    }

    async fn record_sold(&self, schedule_id: ScheduleId, delta: i32) -> BookingResult<()> {
        let result = sqlx::query(
            "UPDATE schedules SET sold_seats = GREATEST(sold_seats + $2, 0) WHERE id = $1",
        )
        .bind(schedule_id)
        .bind(delta)
        .execute(&self.db.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BookingError::ScheduleNotFound(schedule_id));
        }
        Ok(())
    }
}
