//! Внешние источники данных ядра: сеансы, промокоды, брони.
//! У каждого трейта есть реализация в памяти и поверх PostgreSQL.

pub mod bookings;
pub mod promotions;
pub mod schedules;

pub use bookings::{BookingRepository, InMemoryBookingRepository, PgBookingRepository};
pub use promotions::{InMemoryPromotionStore, PgPromotionStore, PromotionStore};
pub use schedules::{InMemoryScheduleProvider, PgScheduleProvider, ScheduleProvider};
