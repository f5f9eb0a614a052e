pub mod cache;
pub mod clock;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod events;
pub mod models;
pub mod redis_client;
pub mod repositories;
pub mod services;
pub mod store;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::clock::{Clock, SystemClock};
use crate::database::Database;
use crate::events::SeatEventBus;
use crate::redis_client::RedisClient;
use crate::repositories::{
    BookingRepository, PgBookingRepository, PgPromotionStore, PgScheduleProvider,
    PromotionStore, ScheduleProvider,
};
use crate::services::{
    AvailabilitySynchronizer, BookingService, CleanupService, HttpPaymentGateway,
    NotificationSink, PaymentGateway, PricingCalculator, PricingPolicy, RedisNotificationSink,
    ReservationManager, SyncSettings,
};
use crate::store::{PgSeatMapStore, SeatMapStore};

/// Внешние зависимости ядра. Для продакшена собираются из конфига,
/// в тестах подставляются реализации в памяти.
pub struct AppParts {
    pub store: Arc<dyn SeatMapStore>,
    pub schedules: Arc<dyn ScheduleProvider>,
    pub bookings: Arc<dyn BookingRepository>,
    pub promotions: Arc<dyn PromotionStore>,
    pub payments: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
    pub pricing: PricingPolicy,
    pub hold_ttl: Duration,
    pub sync: SyncSettings,
    pub pending_grace: chrono::Duration,
}

// Shared state для всего приложения
pub struct AppState {
    pub store: Arc<dyn SeatMapStore>,
    pub schedules: Arc<dyn ScheduleProvider>,
    pub events: Arc<SeatEventBus>,
    pub reservations: Arc<ReservationManager>,
    pub pricing: Arc<PricingCalculator>,
    pub bookings: Arc<BookingService>,
    pub synchronizer: Arc<AvailabilitySynchronizer>,
    pub cleanup: Arc<CleanupService>,
    pub clock: Arc<dyn Clock>,
    /// Инфраструктура для /health; в тестах на памяти отсутствует.
    pub database: Option<Database>,
    pub redis: Option<RedisClient>,
}

impl AppState {
    pub async fn new(config: config::Config) -> anyhow::Result<Arc<Self>> {
        let db = Database::connect(&config.database).await?;
        db.run_migrations().await?;

        let redis = RedisClient::connect(&config.redis).await?;
        let cache = cache::CacheService::new(redis.clone())
            .with_seat_map_ttl(config.redis.seat_map_ttl_secs);

        let payments = HttpPaymentGateway::from_config(&config.payment, &config.circuit_breaker)?;

        let parts = AppParts {
            store: Arc::new(PgSeatMapStore::new(db.clone(), Some(cache))),
            schedules: Arc::new(PgScheduleProvider::new(db.clone())),
            bookings: Arc::new(PgBookingRepository::new(db.clone())),
            promotions: Arc::new(PgPromotionStore::new(db.clone())),
            payments: Arc::new(payments),
            notifier: Arc::new(RedisNotificationSink::new(
                redis.clone(),
                config.redis.notification_channel.clone(),
            )),
            clock: Arc::new(SystemClock),
            pricing: PricingPolicy {
                fee_rate: config.pricing.fee_rate,
                tax_rate: config.pricing.tax_rate,
                ..PricingPolicy::default()
            },
            hold_ttl: config.reservation.hold_ttl(),
            sync: SyncSettings {
                interval: config.reservation.sync_interval(),
                max_retries: config.reservation.sync_max_retries,
                ..SyncSettings::default()
            },
            pending_grace: chrono::Duration::minutes(config.reservation.pending_grace_minutes),
        };

        let mut state = Self::from_parts(parts);
        state.database = Some(db);
        state.redis = Some(redis);
        Ok(Arc::new(state))
    }

    pub fn from_parts(parts: AppParts) -> Self {
        let events = Arc::new(SeatEventBus::new());
        let reservations = Arc::new(ReservationManager::new(
            Arc::clone(&parts.store),
            Arc::clone(&events),
            Arc::clone(&parts.notifier),
            parts.hold_ttl,
        ));
        let pricing = Arc::new(PricingCalculator::new(parts.pricing, parts.promotions));
        let bookings = Arc::new(BookingService::new(
            Arc::clone(&reservations),
            Arc::clone(&parts.schedules),
            parts.bookings,
            Arc::clone(&pricing),
            parts.payments,
            parts.notifier,
            Arc::clone(&parts.clock),
        ));
        let synchronizer = Arc::new(AvailabilitySynchronizer::new(
            Arc::clone(&parts.store),
            Arc::clone(&events),
            parts.sync,
        ));
        let cleanup = Arc::new(CleanupService::new(
            Arc::clone(&reservations),
            Arc::clone(&bookings),
            parts.pending_grace,
        ));

        Self {
            store: parts.store,
            schedules: parts.schedules,
            events,
            reservations,
            pricing,
            bookings,
            synchronizer,
            cleanup,
            clock: parts.clock,
            database: None,
            redis: None,
        }
    }
}

/// Полный роутер приложения.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api", controllers::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let database = match &state.database {
        Some(db) => Some(db.ping().await.is_ok()),
        None => None,
    };
    let redis = match &state.redis {
        Some(redis) => Some(redis.ping().await.is_ok()),
        None => None,
    };

    let healthy = database.unwrap_or(true) && redis.unwrap_or(true);
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "database": database,
            "redis": redis,
            "active_sessions": state.reservations.active_sessions(),
        })),
    )
}
