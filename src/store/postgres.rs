use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{FromRow, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use super::{can_hold, SeatMapStore};
use crate::cache::CacheService;
use crate::database::Database;
use crate::error::{BookingError, BookingResult};
use crate::models::{ScheduleId, Seat, SeatCategory, SeatId, SeatMap, SeatStatus, SessionId};

/// Хранилище карт мест в PostgreSQL.
///
/// Проверка и захват мест выполняются в одной транзакции под `SELECT ... FOR UPDATE`,
/// поэтому взаимное исключение держится и между несколькими процессами.
/// Снимки карт кешируются в Redis и инвалидируются после каждой записи.
#[derive(Clone)]
pub struct PgSeatMapStore {
    db: Database,
    cache: Option<CacheService>,
}

#[derive(Debug, FromRow)]
struct SeatRecord {
    seat_id: String,
    row_label: String,
    number: i32,
    category: String,
    status: String,
    price: Option<Decimal>,
    held_by: Option<Uuid>,
}

impl TryFrom<SeatRecord> for Seat {
    type Error = BookingError;

    fn try_from(r: SeatRecord) -> Result<Self, Self::Error> {
        let category = SeatCategory::parse(&r.category).ok_or_else(|| {
            BookingError::InvalidRecord(format!("seat {} has unknown category '{}'", r.seat_id, r.category))
        })?;
        let status = SeatStatus::parse(&r.status).ok_or_else(|| {
            BookingError::InvalidRecord(format!("seat {} has unknown status '{}'", r.seat_id, r.status))
        })?;

        Ok(Seat {
            id: SeatId::from(r.seat_id),
            row: r.row_label,
            number: r.number,
            category,
            status,
            price: r.price,
            held_by: r.held_by.map(SessionId::from),
        })
    }
}

const SEAT_COLUMNS: &str = "seat_id, row_label, number, category, status, price, held_by";

fn as_strings(seat_ids: &[SeatId]) -> Vec<String> {
    seat_ids.iter().map(|id| id.as_str().to_string()).collect()
}

impl PgSeatMapStore {
    pub fn new(db: Database, cache: Option<CacheService>) -> Self {
        Self { db, cache }
    }

    async fn invalidate(&self, schedule_id: ScheduleId) {
        if let Some(cache) = &self.cache {
            cache.invalidate_seats(schedule_id).await;
        }
    }

    async fn load_seat_map(&self, schedule_id: ScheduleId) -> BookingResult<SeatMap> {
        let schedule: Option<(Decimal, i32)> =
            sqlx::query_as("SELECT base_price, seat_total FROM schedules WHERE id = $1")
                .bind(schedule_id)
                .fetch_optional(&self.db.pool)
                .await?;
        let (base_price, seat_total) = schedule.ok_or(BookingError::ScheduleNotFound(schedule_id))?;

        let records = sqlx::query_as::<_, SeatRecord>(&format!(
            "SELECT {} FROM seats WHERE schedule_id = $1 ORDER BY position",
            SEAT_COLUMNS
        ))
        .bind(schedule_id)
        .fetch_all(&self.db.pool)
        .await?;

        let seats = records
            .into_iter()
            .map(Seat::try_from)
            .collect::<BookingResult<Vec<_>>>()?;

        Ok(SeatMap::from_seats(
            schedule_id,
            base_price,
            seat_total.max(0) as usize,
            seats,
        ))
    }

    // Блокирует строки мест до конца транзакции
    async fn lock_seats(
        tx: &mut Transaction<'_, Postgres>,
        schedule_id: ScheduleId,
        seat_ids: &[SeatId],
    ) -> BookingResult<Vec<Seat>> {
        let records = sqlx::query_as::<_, SeatRecord>(&format!(
            "SELECT {} FROM seats WHERE schedule_id = $1 AND seat_id = ANY($2) ORDER BY seat_id FOR UPDATE",
            SEAT_COLUMNS
        ))
        .bind(schedule_id)
        .bind(as_strings(seat_ids))
        .fetch_all(&mut **tx)
        .await?;

        let seats = records
            .into_iter()
            .map(Seat::try_from)
            .collect::<BookingResult<Vec<_>>>()?;

        if let Some(missing) = seat_ids.iter().find(|id| !seats.iter().any(|s| &s.id == *id)) {
            return Err(BookingError::SeatNotFound {
                schedule_id,
                seat_id: missing.clone(),
            });
        }
        Ok(seats)
    }

    async fn schedule_exists(&self, schedule_id: ScheduleId) -> BookingResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM schedules WHERE id = $1)")
            .bind(schedule_id)
            .fetch_one(&self.db.pool)
            .await?;
        Ok(exists)
    }
}

#[async_trait]
impl SeatMapStore for PgSeatMapStore {
    async fn get_seat_map(&self, schedule_id: ScheduleId) -> BookingResult<SeatMap> {
        // Сначала пробуем кеш
        if let Some(cache) = &self.cache {
            if let Some(map) = cache.get_seat_map(schedule_id).await {
                return Ok(map);
            }
        }

        // Кеш пуст - идём в БД
        let map = self.load_seat_map(schedule_id).await?;
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save_seat_map(&map).await {
                debug!("seat map for schedule {} not cached: {}", schedule_id, e);
            }
        }
        Ok(map)
    }

    async fn get_seat(&self, schedule_id: ScheduleId, seat_id: &SeatId) -> BookingResult<Seat> {
        let record = sqlx::query_as::<_, SeatRecord>(&format!(
            "SELECT {} FROM seats WHERE schedule_id = $1 AND seat_id = $2",
            SEAT_COLUMNS
        ))
        .bind(schedule_id)
        .bind(seat_id.as_str())
        .fetch_optional(&self.db.pool)
        .await?;

        match record {
            Some(record) => Seat::try_from(record),
            None if self.schedule_exists(schedule_id).await? => Err(BookingError::SeatNotFound {
                schedule_id,
                seat_id: seat_id.clone(),
            }),
            None => Err(BookingError::ScheduleNotFound(schedule_id)),
        }
    }

    async fn set_seat_status(
        &self,
        schedule_id: ScheduleId,
        seat_id: &SeatId,
        status: SeatStatus,
    ) -> BookingResult<()> {
        let affected = sqlx::query(
            r#"
            UPDATE seats
            SET status = $3,
                held_by = CASE WHEN $3 = 'RESERVED' THEN held_by ELSE NULL END,
                updated_at = NOW()
            WHERE schedule_id = $1 AND seat_id = $2
            "#,
        )
        .bind(schedule_id)
        .bind(seat_id.as_str())
        .bind(status.as_str())
        .execute(&self.db.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            // Отличаем неизвестный сеанс от неизвестного места
            self.get_seat(schedule_id, seat_id).await?;
        }
        self.invalidate(schedule_id).await;
        Ok(())
    }

    async fn hold_seats(
        &self,
        schedule_id: ScheduleId,
        seat_ids: &[SeatId],
        session_id: &SessionId,
        prior: Option<&SessionId>,
    ) -> BookingResult<()> {
        let mut tx = self.db.pool.begin().await?;

        let seats = match Self::lock_seats(&mut tx, schedule_id, seat_ids).await {
            Ok(seats) => seats,
            Err(BookingError::SeatNotFound { seat_id, .. }) => {
                tx.rollback().await?;
                if !self.schedule_exists(schedule_id).await? {
                    return Err(BookingError::ScheduleNotFound(schedule_id));
                }
                return Err(BookingError::SeatNotFound { schedule_id, seat_id });
            }
            Err(e) => return Err(e),
        };

        let conflicts: Vec<SeatId> = seats
            .iter()
            .filter(|seat| !can_hold(seat, session_id, prior))
            .map(|seat| seat.id.clone())
            .collect();
        if !conflicts.is_empty() {
            tx.rollback().await?;
            return Err(BookingError::SeatConflict { seat_ids: conflicts });
        }

        sqlx::query(
            "UPDATE seats SET status = 'RESERVED', held_by = $3, updated_at = NOW()
             WHERE schedule_id = $1 AND seat_id = ANY($2)",
        )
        .bind(schedule_id)
        .bind(as_strings(seat_ids))
        .bind(session_id.as_uuid())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.invalidate(schedule_id).await;
        Ok(())
    }

    async fn release_seats(
        &self,
        schedule_id: ScheduleId,
        session_id: &SessionId,
        only: Option<&[SeatId]>,
    ) -> BookingResult<Vec<SeatId>> {
        let released: Vec<String> = match only {
            Some(seat_ids) => {
                sqlx::query_scalar(
                    "UPDATE seats SET status = 'AVAILABLE', held_by = NULL, updated_at = NOW()
                     WHERE schedule_id = $1 AND held_by = $2 AND status = 'RESERVED' AND seat_id = ANY($3)
                     RETURNING seat_id",
                )
                .bind(schedule_id)
                .bind(session_id.as_uuid())
                .bind(as_strings(seat_ids))
                .fetch_all(&self.db.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    "UPDATE seats SET status = 'AVAILABLE', held_by = NULL, updated_at = NOW()
                     WHERE schedule_id = $1 AND held_by = $2 AND status = 'RESERVED'
                     RETURNING seat_id",
                )
                .bind(schedule_id)
                .bind(session_id.as_uuid())
                .fetch_all(&self.db.pool)
                .await?
            }
        };

        if !released.is_empty() {
            self.invalidate(schedule_id).await;
        }
        Ok(released.into_iter().map(SeatId::from).collect())
    }

    async fn sell_seats(
        &self,
        schedule_id: ScheduleId,
        seat_ids: &[SeatId],
        session_id: &SessionId,
    ) -> BookingResult<()> {
        let mut tx = self.db.pool.begin().await?;
        let seats = Self::lock_seats(&mut tx, schedule_id, seat_ids).await?;

        let lost: Vec<SeatId> = seats
            .iter()
            .filter(|seat| !seat.is_held_by(session_id))
            .map(|seat| seat.id.clone())
            .collect();
        if !lost.is_empty() {
            tx.rollback().await?;
            return Err(BookingError::SeatNoLongerHeld { seat_ids: lost });
        }

        sqlx::query(
            "UPDATE seats SET status = 'SOLD', held_by = NULL, updated_at = NOW()
             WHERE schedule_id = $1 AND seat_id = ANY($2)",
        )
        .bind(schedule_id)
        .bind(as_strings(seat_ids))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.invalidate(schedule_id).await;
        Ok(())
    }

    async fn free_sold_seats(
        &self,
        schedule_id: ScheduleId,
        seat_ids: &[SeatId],
    ) -> BookingResult<Vec<SeatId>> {
        let freed: Vec<String> = sqlx::query_scalar(
            "UPDATE seats SET status = 'AVAILABLE', held_by = NULL, updated_at = NOW()
             WHERE schedule_id = $1 AND seat_id = ANY($2) AND status = 'SOLD'
             RETURNING seat_id",
        )
        .bind(schedule_id)
        .bind(as_strings(seat_ids))
        .fetch_all(&self.db.pool)
        .await?;

        self.invalidate(schedule_id).await;
        Ok(freed.into_iter().map(SeatId::from).collect())
    }

    async fn insert_seat_map(&self, map: &SeatMap) -> BookingResult<()> {
        if !self.schedule_exists(map.schedule_id).await? {
            return Err(BookingError::ScheduleNotFound(map.schedule_id));
        }

        let mut tx = self.db.pool.begin().await?;
        for (position, seat) in map.seats().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO seats (schedule_id, seat_id, row_label, number, category, status, price, held_by, position)
                VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, $8)
                ON CONFLICT (schedule_id, seat_id) DO NOTHING
                "#,
            )
            .bind(map.schedule_id)
            .bind(seat.id.as_str())
            .bind(&seat.row)
            .bind(seat.number)
            .bind(seat.category.as_str())
            .bind(seat.status.as_str())
            .bind(seat.price)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.invalidate(map.schedule_id).await;
        info!(
            "Generated seat map for schedule {}: {} seats",
            map.schedule_id,
            map.seat_count()
        );
        Ok(())
    }
}
