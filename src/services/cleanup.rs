use chrono::Duration as ChronoDuration;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use crate::services::booking::BookingService;
use crate::services::reservation::ReservationManager;

/// Периодическая уборка: просроченные резервы, которые не успел снять таймер,
/// и PENDING-брони, чья оплата так и не прошла.
pub struct CleanupService {
    reservations: Arc<ReservationManager>,
    bookings: Arc<BookingService>,
    pending_grace: ChronoDuration,
}

impl CleanupService {
    pub fn new(
        reservations: Arc<ReservationManager>,
        bookings: Arc<BookingService>,
        pending_grace: ChronoDuration,
    ) -> Self {
        Self {
            reservations,
            bookings,
            pending_grace,
        }
    }

    /// Полная очистка: сначала резервы, потом брони, оставшиеся без резерва
    pub async fn run_full_cleanup(&self) -> CleanupStats {
        info!("🧹 Starting full cleanup process");

        let expired_sessions = self.reservations.sweep_expired().await;
        if expired_sessions > 0 {
            info!("⏰ Expired {} overdue reservation sessions", expired_sessions);
        }

        let expired_bookings = match self.bookings.expire_abandoned(self.pending_grace).await {
            Ok(count) => count,
            Err(e) => {
                error!("🎫 Failed to expire abandoned bookings: {}", e);
                0
            }
        };
        if expired_bookings > 0 {
            info!("🎫 Expired {} unpaid bookings", expired_bookings);
        }

        let stats = CleanupStats {
            expired_sessions,
            expired_bookings,
            active_sessions: self.reservations.active_sessions(),
        };
        info!("✅ Full cleanup process completed: {:?}", stats);
        stats
    }

    pub async fn start(self: Arc<Self>, every: Duration) {
        info!("🚀 Starting cleanup service (every {:?})", every);
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_full_cleanup().await;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupStats {
    pub expired_sessions: usize,
    pub expired_bookings: usize,
    pub active_sessions: usize,
}

impl CleanupStats {
    pub fn total_items_cleaned(&self) -> usize {
        self.expired_sessions + self.expired_bookings
    }
}
