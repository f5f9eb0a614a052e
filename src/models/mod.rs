pub mod booking;
pub mod promotion;
pub mod schedule;
pub mod seat;
pub mod session;

pub use booking::{Booking, BookingStatus, CustomerContact, PaymentStatus, SeatBooking};
pub use promotion::{DiscountType, Promotion, PromotionRejection};
pub use schedule::{Schedule, ScheduleId, ShowType};
pub use seat::{RowLayout, Seat, SeatCategory, SeatCounts, SeatId, SeatMap, SeatRow, SeatStatus};
pub use session::{ReservationSession, SessionId, SessionInfo};
