use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{BookingError, BookingResult};
use crate::models::{
    Booking, BookingStatus, CustomerContact, PaymentStatus, SeatBooking, SeatCategory, SeatId,
    SessionId,
};

/// Хранилище броней. Бронь создаётся один раз вместе с местами,
/// дальше меняются только статусы. Брони не удаляются.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert(&self, booking: &Booking) -> BookingResult<()>;

    async fn get(&self, booking_id: Uuid) -> BookingResult<Booking>;

    /// Сохранить статус, статус оплаты и id транзакции, если в хранилище
    /// бронь всё ещё в статусе `expected`.
    async fn save_state(&self, booking: &Booking, expected: BookingStatus) -> BookingResult<()>;

    /// PENDING-брони, созданные раньше `older_than`.
    async fn list_pending(&self, older_than: DateTime<Utc>) -> BookingResult<Vec<Booking>>;
}

fn concurrent_change(booking: &Booking, expected: BookingStatus) -> BookingError {
    BookingError::InvalidTransition {
        from: expected,
        to: booking.status,
        reason: "booking was modified concurrently".to_string(),
    }
}

/* ---------- IN-MEMORY ---------- */

#[derive(Default)]
pub struct InMemoryBookingRepository {
    bookings: RwLock<HashMap<Uuid, Booking>>,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn insert(&self, booking: &Booking) -> BookingResult<()> {
        let mut bookings = self.bookings.write().unwrap_or_else(|e| e.into_inner());
        if bookings.contains_key(&booking.id) {
            return Err(BookingError::Validation(format!(
                "booking {} already exists",
                booking.id
            )));
        }
        bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get(&self, booking_id: Uuid) -> BookingResult<Booking> {
        let bookings = self.bookings.read().unwrap_or_else(|e| e.into_inner());
        bookings
            .get(&booking_id)
            .cloned()
            .ok_or(BookingError::BookingNotFound(booking_id))
    }

    async fn save_state(&self, booking: &Booking, expected: BookingStatus) -> BookingResult<()> {
        let mut bookings = self.bookings.write().unwrap_or_else(|e| e.into_inner());
        let stored = bookings
            .get_mut(&booking.id)
            .ok_or(BookingError::BookingNotFound(booking.id))?;
        if stored.status != expected {
            return Err(concurrent_change(booking, expected));
        }
        stored.status = booking.status;
        stored.payment_status = booking.payment_status;
        stored.transaction_id = booking.transaction_id.clone();
        stored.updated_at = booking.updated_at;
        Ok(())
    }

    async fn list_pending(&self, older_than: DateTime<Utc>) -> BookingResult<Vec<Booking>> {
        let bookings = self.bookings.read().unwrap_or_else(|e| e.into_inner());
        Ok(bookings
            .values()
            .filter(|b| b.status == BookingStatus::Pending && b.created_at < older_than)
            .cloned()
            .collect())
    }
}

/* ---------- POSTGRES ---------- */

#[derive(Clone)]
pub struct PgBookingRepository {
    db: Database,
}

impl PgBookingRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn load_seats(&self, booking_id: Uuid) -> BookingResult<Vec<SeatBooking>> {
        let records = sqlx::query_as::<_, SeatBookingRecord>(
            r#"
            SELECT seat_id, row_label, number, category, price
            FROM booking_seats
            WHERE booking_id = $1
            ORDER BY position
            "#,
        )
        .bind(booking_id)
        .fetch_all(&self.db.pool)
        .await?;

        records.into_iter().map(SeatBooking::try_from).collect()
    }

    async fn hydrate(&self, record: BookingRecord) -> BookingResult<Booking> {
        let seats = self.load_seats(record.id).await?;
        record.into_booking(seats)
    }
}

#[derive(Debug, FromRow)]
struct BookingRecord {
    id: Uuid,
    booking_number: String,
    schedule_id: i64,
    session_id: Option<Uuid>,
    subtotal: Decimal,
    fee: Decimal,
    tax: Decimal,
    discount: Decimal,
    total_amount: Decimal,
    promo_code: Option<String>,
    status: Option<String>,
    payment_status: String,
    transaction_id: Option<String>,
    customer_name: String,
    customer_email: String,
    customer_phone: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BookingRecord {
    fn into_booking(self, seats: Vec<SeatBooking>) -> BookingResult<Booking> {
        Ok(Booking {
            id: self.id,
            booking_number: self.booking_number,
            schedule_id: self.schedule_id,
            session_id: self.session_id.map(SessionId::from),
            seats,
            subtotal: self.subtotal,
            fee: self.fee,
            tax: self.tax,
            discount: self.discount,
            total_amount: self.total_amount,
            promo_code: self.promo_code,
            status: BookingStatus::parse(self.status.as_deref())?,
            payment_status: PaymentStatus::parse(&self.payment_status)?,
            transaction_id: self.transaction_id,
            customer: CustomerContact {
                name: self.customer_name,
                email: self.customer_email,
                phone: self.customer_phone,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SeatBookingRecord {
    seat_id: String,
    row_label: String,
    number: i32,
    category: String,
    price: Decimal,
}

impl TryFrom<SeatBookingRecord> for SeatBooking {
    type Error = BookingError;

    fn try_from(r: SeatBookingRecord) -> Result<Self, Self::Error> {
        let category = SeatCategory::parse(&r.category).ok_or_else(|| {
            BookingError::InvalidRecord(format!(
                "booked seat {} has unknown category '{}'",
                r.seat_id, r.category
            ))
        })?;
        Ok(SeatBooking {
            seat_id: SeatId::from(r.seat_id),
            row: r.row_label,
            number: r.number,
            category,
            price: r.price,
        })
    }
}

const BOOKING_COLUMNS: &str = "id, booking_number, schedule_id, session_id, subtotal, fee, tax, \
     discount, total_amount, promo_code, status, payment_status, transaction_id, customer_name, \
     customer_email, customer_phone, created_at, updated_at";

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn insert(&self, booking: &Booking) -> BookingResult<()> {
        let mut tx = self.db.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO bookings (id, booking_number, schedule_id, session_id, subtotal, fee, tax,
                discount, total_amount, promo_code, status, payment_status, transaction_id,
                customer_name, customer_email, customer_phone, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(booking.id)
        .bind(&booking.booking_number)
        .bind(booking.schedule_id)
        .bind(booking.session_id.map(|s| s.as_uuid()))
        .bind(booking.subtotal)
        .bind(booking.fee)
        .bind(booking.tax)
        .bind(booking.discount)
        .bind(booking.total_amount)
        .bind(&booking.promo_code)
        .bind(booking.status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(&booking.transaction_id)
        .bind(&booking.customer.name)
        .bind(&booking.customer.email)
        .bind(&booking.customer.phone)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *tx)
        .await?;

        for (position, seat) in booking.seats.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO booking_seats (booking_id, position, seat_id, row_label, number, category, price)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(booking.id)
            .bind(position as i32)
            .bind(seat.seat_id.as_str())
            .bind(&seat.row)
            .bind(seat.number)
            .bind(seat.category.as_str())
            .bind(seat.price)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, booking_id: Uuid) -> BookingResult<Booking> {
        let record = sqlx::query_as::<_, BookingRecord>(&format!(
            "SELECT {} FROM bookings WHERE id = $1",
            BOOKING_COLUMNS
        ))
        .bind(booking_id)
        .fetch_optional(&self.db.pool)
        .await?
        .ok_or(BookingError::BookingNotFound(booking_id))?;

        self.hydrate(record).await
    }

    async fn save_state(&self, booking: &Booking, expected: BookingStatus) -> BookingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = $2, payment_status = $3, transaction_id = $4, updated_at = $5
            WHERE id = $1 AND status = $6
            "#,
        )
        .bind(booking.id)
        .bind(booking.status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(&booking.transaction_id)
        .bind(booking.updated_at)
        .bind(expected.as_str())
        .execute(&self.db.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Либо брони нет, либо её статус уже сменил кто-то другой
            self.get(booking.id).await?;
            return Err(concurrent_change(booking, expected));
        }
        Ok(())
    }

    async fn list_pending(&self, older_than: DateTime<Utc>) -> BookingResult<Vec<Booking>> {
        let records = sqlx::query_as::<_, BookingRecord>(&format!(
            "SELECT {} FROM bookings WHERE status = 'PENDING' AND created_at < $1 ORDER BY created_at",
            BOOKING_COLUMNS
        ))
        .bind(older_than)
        .fetch_all(&self.db.pool)
        .await?;

        let mut bookings = Vec::with_capacity(records.len());
        for record in records {
            bookings.push(self.hydrate(record).await?);
        }
        Ok(bookings)
    }
}
