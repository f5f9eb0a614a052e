use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ScheduleId, SessionId};

/// Идентификатор места: метка ряда + номер ("A1", "K12"). Уникален в рамках сеанса.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeatId(String);

impl SeatId {
    pub fn new(row: &str, number: i32) -> Self {
        Self(format!("{}{}", row, number))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SeatId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SeatId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatCategory {
    Standard,
    Premium,
    Vip,
}

impl SeatCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatCategory::Standard => "STANDARD",
            SeatCategory::Premium => "PREMIUM",
            SeatCategory::Vip => "VIP",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "STANDARD" => Some(SeatCategory::Standard),
            "PREMIUM" => Some(SeatCategory::Premium),
            "VIP" => Some(SeatCategory::Vip),
            _ => None,
        }
    }

    /// Множитель к базовой цене сеанса.
    pub fn multiplier(&self) -> Decimal {
        match self {
            SeatCategory::Standard => Decimal::ONE,
            SeatCategory::Premium => Decimal::new(15, 1),
            SeatCategory::Vip => Decimal::TWO,
        }
    }
}

/// Персистентный статус места. SELECTED сюда не входит: это клиентский оверлей.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    Reserved,
    Sold,
    Disabled,
    Maintenance,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "AVAILABLE",
            SeatStatus::Reserved => "RESERVED",
            SeatStatus::Sold => "SOLD",
            SeatStatus::Disabled => "DISABLED",
            SeatStatus::Maintenance => "MAINTENANCE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "AVAILABLE" => Some(SeatStatus::Available),
            "RESERVED" => Some(SeatStatus::Reserved),
            "SOLD" => Some(SeatStatus::Sold),
            "DISABLED" => Some(SeatStatus::Disabled),
            "MAINTENANCE" => Some(SeatStatus::Maintenance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seat {
    pub id: SeatId,
    pub row: String,
    pub number: i32,
    pub category: SeatCategory,
    pub status: SeatStatus,
    /// Явно заданная цена. Если её нет, цена выводится из категории.
    pub price: Option<Decimal>,
    pub held_by: Option<SessionId>,
}

impl Seat {
    pub fn new(row: &str, number: i32, category: SeatCategory) -> Self {
        Self {
            id: SeatId::new(row, number),
            row: row.to_string(),
            number,
            category,
            status: SeatStatus::Available,
            price: None,
            held_by: None,
        }
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_status(mut self, status: SeatStatus) -> Self {
        self.status = status;
        self
    }

    pub fn effective_price(&self, base_price: Decimal) -> Decimal {
        self.price
            .unwrap_or_else(|| base_price * self.category.multiplier())
    }

    pub fn is_held_by(&self, session_id: &SessionId) -> bool {
        self.status == SeatStatus::Reserved && self.held_by.as_ref() == Some(session_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatRow {
    pub label: String,
    pub seats: Vec<Seat>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatCounts {
    pub total: usize,
    pub available: usize,
    pub reserved: usize,
    pub sold: usize,
    pub unavailable: usize,
}

/// Карта мест сеанса с живыми статусами.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatMap {
    pub schedule_id: ScheduleId,
    pub base_price: Decimal,
    /// Ожидаемое число мест (вместимость площадки из расписания).
    pub expected_total: usize,
    pub rows: Vec<SeatRow>,
}

impl SeatMap {
    /// Собирает карту из плоского списка, сохраняя порядок рядов и мест.
    pub fn from_seats(
        schedule_id: ScheduleId,
        base_price: Decimal,
        expected_total: usize,
        seats: Vec<Seat>,
    ) -> Self {
        let mut rows: Vec<SeatRow> = Vec::new();
        for seat in seats {
            match rows.iter_mut().find(|r| r.label == seat.row) {
                Some(row) => row.seats.push(seat),
                None => rows.push(SeatRow {
                    label: seat.row.clone(),
                    seats: vec![seat],
                }),
            }
        }

        Self {
            schedule_id,
            base_price,
            expected_total,
            rows,
        }
    }

    /// Генерация карты по схеме зала. Все места создаются свободными.
    pub fn generate(
        schedule_id: ScheduleId,
        base_price: Decimal,
        expected_total: usize,
        layout: &[RowLayout],
    ) -> Self {
        let seats = layout
            .iter()
            .flat_map(|row| {
                (1..=row.seats).map(move |number| Seat::new(&row.label, number, row.category))
            })
            .collect();
        Self::from_seats(schedule_id, base_price, expected_total, seats)
    }

    pub fn seats(&self) -> impl Iterator<Item = &Seat> {
        self.rows.iter().flat_map(|row| row.seats.iter())
    }

    pub fn seats_mut(&mut self) -> impl Iterator<Item = &mut Seat> {
        self.rows.iter_mut().flat_map(|row| row.seats.iter_mut())
    }

    pub fn find(&self, seat_id: &SeatId) -> Option<&Seat> {
        self.seats().find(|s| &s.id == seat_id)
    }

    pub fn find_mut(&mut self, seat_id: &SeatId) -> Option<&mut Seat> {
        self.seats_mut().find(|s| &s.id == seat_id)
    }

    pub fn seat_count(&self) -> usize {
        self.rows.iter().map(|r| r.seats.len()).sum()
    }

    pub fn counts(&self) -> SeatCounts {
        let mut counts = SeatCounts::default();
        for seat in self.seats() {
            counts.total += 1;
            match seat.status {
                SeatStatus::Available => counts.available += 1,
                SeatStatus::Reserved => counts.reserved += 1,
                SeatStatus::Sold => counts.sold += 1,
                SeatStatus::Disabled | SeatStatus::Maintenance => counts.unavailable += 1,
            }
        }
        counts
    }
}

/// Описание ряда для генерации карты мест.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowLayout {
    pub label: String,
    pub seats: i32,
    pub category: SeatCategory,
}

impl RowLayout {
    pub fn new(label: &str, seats: i32, category: SeatCategory) -> Self {
        Self {
            label: label.to_string(),
            seats,
            category,
        }
    }
}
