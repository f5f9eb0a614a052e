#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use showtime_booking::{
    app,
    clock::FixedClock,
    error::{BookingError, BookingResult},
    models::{
        CustomerContact, DiscountType, Promotion, RowLayout, Schedule, ScheduleId, Seat,
        SeatCategory, SeatId, SeatMap, SeatStatus, SessionId, ShowType,
    },
    repositories::{
        InMemoryBookingRepository, InMemoryPromotionStore, InMemoryScheduleProvider,
        ScheduleProvider,
    },
    services::{
        CaptureOutcome, Notification, NotificationSink, PaymentError, PaymentGateway,
        PricingPolicy, SyncSettings,
    },
    store::{InMemorySeatMapStore, SeatMapStore},
    AppParts, AppState,
};

pub const SCHEDULE_ID: ScheduleId = 1;

/// Текущее "время" тестов: за четыре дня до показа.
pub fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 1)
        .and_then(|d| d.and_hms_opt(12, 0, 0))
        .unwrap()
}

pub fn show_start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 5)
        .and_then(|d| d.and_hms_opt(19, 0, 0))
        .unwrap()
}

pub fn schedule(id: ScheduleId, show_type: ShowType) -> Schedule {
    let start = show_start();
    Schedule {
        id,
        venue: "Hall 1".to_string(),
        base_price: dec!(250),
        seat_total: 10,
        show_date: start.date(),
        show_time: start.time(),
        show_type,
        sold_seats: 0,
    }
}

/// Ряд A: 5 обычных мест, ряд B: 5 премиум.
pub fn seat_map(id: ScheduleId) -> SeatMap {
    SeatMap::generate(
        id,
        dec!(250),
        10,
        &[
            RowLayout::new("A", 5, SeatCategory::Standard),
            RowLayout::new("B", 5, SeatCategory::Premium),
        ],
    )
}

pub fn seats(ids: &[&str]) -> Vec<SeatId> {
    ids.iter().map(|id| SeatId::from(*id)).collect()
}

pub fn customer() -> CustomerContact {
    CustomerContact {
        name: "Aigerim Sadykova".to_string(),
        email: "aigerim@example.com".to_string(),
        phone: Some("+77010000000".to_string()),
    }
}

pub fn promotion(code: &str, discount_type: DiscountType, value: Decimal) -> Promotion {
    Promotion {
        code: code.to_string(),
        discount_type,
        value,
        buy_quantity: None,
        get_quantity: None,
        max_uses: None,
        used_count: 0,
        min_purchase: None,
        max_discount: None,
        starts_at: NaiveDate::from_ymd_opt(2026, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap(),
        ends_at: None,
        is_active: true,
    }
}

/* ---------- FAKES ---------- */

#[derive(Debug, Clone)]
pub enum GatewayBehavior {
    Approve,
    Decline(String),
    Unavailable,
}

/// Шлюз оплаты для тестов: заданный исход и необязательная задержка.
pub struct FakeGateway {
    behavior: Mutex<GatewayBehavior>,
    delay: Mutex<Option<Duration>>,
    captures: Mutex<Vec<(Uuid, Decimal)>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            behavior: Mutex::new(GatewayBehavior::Approve),
            delay: Mutex::new(None),
            captures: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, behavior: GatewayBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn captures(&self) -> Vec<(Uuid, Decimal)> {
        self.captures.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn capture(
        &self,
        booking_id: Uuid,
        _payment_method_id: &str,
        amount: Decimal,
    ) -> Result<CaptureOutcome, PaymentError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.captures.lock().unwrap().push((booking_id, amount));

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            GatewayBehavior::Approve => Ok(CaptureOutcome::Captured {
                transaction_id: format!("tx-{}", booking_id.simple()),
            }),
            GatewayBehavior::Decline(reason) => Ok(CaptureOutcome::Declined { reason }),
            GatewayBehavior::Unavailable => Err(PaymentError::CircuitOpen),
        }
    }
}

/// Копит уведомления вместо доставки.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
        self.delivered.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Переключатели сбоев для хранилища мест и счётчика продаж.
#[derive(Default)]
pub struct Faults {
    pub free_sold_seats: AtomicBool,
    pub record_sold: AtomicBool,
}

impl Faults {
    fn tripped(flag: &AtomicBool) -> BookingResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(BookingError::Database(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }
}

pub struct FaultyStore {
    inner: Arc<InMemorySeatMapStore>,
    faults: Arc<Faults>,
}

#[async_trait]
impl SeatMapStore for FaultyStore {
    async fn get_seat_map(&self, schedule_id: ScheduleId) -> BookingResult<SeatMap> {
        self.inner.get_seat_map(schedule_id).await
    }

    async fn get_seat(&self, schedule_id: ScheduleId, seat_id: &SeatId) -> BookingResult<Seat> {
        self.inner.get_seat(schedule_id, seat_id).await
    }

    async fn set_seat_status(
        &self,
        schedule_id: ScheduleId,
        seat_id: &SeatId,
        status: SeatStatus,
    ) -> BookingResult<()> {
        self.inner.set_seat_status(schedule_id, seat_id, status).await
    }

    async fn hold_seats(
        &self,
        schedule_id: ScheduleId,
        seat_ids: &[SeatId],
        session_id: &SessionId,
        prior: Option<&SessionId>,
    ) -> BookingResult<()> {
        self.inner
            .hold_seats(schedule_id, seat_ids, session_id, prior)
            .await
    }

    async fn release_seats(
        &self,
        schedule_id: ScheduleId,
        session_id: &SessionId,
        only: Option<&[SeatId]>,
    ) -> BookingResult<Vec<SeatId>> {
        self.inner.release_seats(schedule_id, session_id, only).await
    }

    async fn sell_seats(
        &self,
        schedule_id: ScheduleId,
        seat_ids: &[SeatId],
        session_id: &SessionId,
    ) -> BookingResult<()> {
        self.inner.sell_seats(schedule_id, seat_ids, session_id).await
    }

    async fn free_sold_seats(
        &self,
        schedule_id: ScheduleId,
        seat_ids: &[SeatId],
    ) -> BookingResult<Vec<SeatId>> {
        Faults::tripped(&self.faults.free_sold_seats)?;
        self.inner.free_sold_seats(schedule_id, seat_ids).await
    }

    async fn insert_seat_map(&self, map: &SeatMap) -> BookingResult<()> {
        self.inner.insert_seat_map(map).await
    }
}

pub struct FaultySchedules {
    inner: Arc<InMemoryScheduleProvider>,
    faults: Arc<Faults>,
}

#[async_trait]
impl ScheduleProvider for FaultySchedules {
    async fn get_schedule(&self, schedule_id: ScheduleId) -> BookingResult<Schedule> {
        self.inner.get_schedule(schedule_id).await
    }

    async fn record_sold(&self, schedule_id: ScheduleId, delta: i32) -> BookingResult<()> {
        Faults::tripped(&self.faults.record_sold)?;
        self.inner.record_sold(schedule_id, delta).await
    }
}

/* ---------- HARNESS ---------- */

/// Приложение целиком на реализациях в памяти.
pub struct TestApp {
    pub state: Arc<AppState>,
    pub store: Arc<InMemorySeatMapStore>,
    pub schedules: Arc<InMemoryScheduleProvider>,
    pub bookings: Arc<InMemoryBookingRepository>,
    pub promotions: Arc<InMemoryPromotionStore>,
    pub gateway: Arc<FakeGateway>,
    pub notifications: Arc<RecordingSink>,
    pub clock: Arc<FixedClock>,
    pub faults: Arc<Faults>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_show_type(ShowType::Movie)
    }

    pub fn with_show_type(show_type: ShowType) -> Self {
        let store = Arc::new(InMemorySeatMapStore::with_map(seat_map(SCHEDULE_ID)));
        let schedules = Arc::new(InMemoryScheduleProvider::new());
        schedules.insert(schedule(SCHEDULE_ID, show_type));
        let bookings = Arc::new(InMemoryBookingRepository::new());
        let promotions = Arc::new(InMemoryPromotionStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let notifications = Arc::new(RecordingSink::default());
        let clock = Arc::new(FixedClock::new(now()));
        let faults = Arc::new(Faults::default());

        let parts = AppParts {
            store: Arc::new(FaultyStore {
                inner: store.clone(),
                faults: faults.clone(),
            }),
            schedules: Arc::new(FaultySchedules {
                inner: schedules.clone(),
                faults: faults.clone(),
            }),
            bookings: bookings.clone(),
            promotions: promotions.clone(),
            payments: gateway.clone(),
            notifier: notifications.clone(),
            clock: clock.clone(),
            pricing: PricingPolicy::default(),
            hold_ttl: Duration::from_secs(5 * 60),
            sync: SyncSettings {
                interval: Duration::from_secs(5),
                max_retries: 2,
                retry_backoff: Duration::from_millis(10),
            },
            pending_grace: chrono::Duration::minutes(15),
        };

        Self {
            state: Arc::new(AppState::from_parts(parts)),
            store,
            schedules,
            bookings,
            promotions,
            gateway,
            notifications,
            clock,
            faults,
        }
    }

    pub fn router(&self) -> Router {
        app(Arc::clone(&self.state))
    }

    pub fn set_now(&self, now: NaiveDateTime) {
        self.clock.set(now);
    }
}

/// Даёт фоновым задачам (доставке уведомлений) отработать.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
