pub mod availability;
pub mod booking;
pub mod booking_window;
pub mod cleanup;
pub mod expiry;
pub mod notifications;
pub mod payment;
pub mod pricing;
pub mod reservation;

pub use availability::{AvailabilitySynchronizer, ClientSeatView, MergeReport, SyncSettings};
pub use booking::{BookingDetails, BookingService, CheckoutRequest, Quote};
pub use booking_window::BookingWindow;
pub use cleanup::{CleanupService, CleanupStats};
pub use notifications::{LogNotificationSink, Notification, NotificationSink, RedisNotificationSink};
pub use payment::{CaptureOutcome, CircuitBreaker, HttpPaymentGateway, PaymentError, PaymentGateway};
pub use pricing::{price_for, PricingCalculator, PricingPolicy, PricingSummary};
pub use reservation::ReservationManager;
