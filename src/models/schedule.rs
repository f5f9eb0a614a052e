use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type ScheduleId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShowType {
    Movie,
    Concert,
    Theater,
    Sports,
    #[serde(other)]
    Other,
}

impl ShowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShowType::Movie => "movie",
            ShowType::Concert => "concert",
            ShowType::Theater => "theater",
            ShowType::Sports => "sports",
            ShowType::Other => "other",
        }
    }

    // Неизвестные типы не ошибка: для них действуют правила "не кино"
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "movie" => ShowType::Movie,
            "concert" => ShowType::Concert,
            "theater" | "theatre" => ShowType::Theater,
            "sports" => ShowType::Sports,
            _ => ShowType::Other,
        }
    }
}

/// Сеанс (показ) на площадке. Время хранится в UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub venue: String,
    pub base_price: Decimal,
    /// Вместимость площадки. Авторитетный источник, карта мест от неё производна.
    pub seat_total: i32,
    pub show_date: NaiveDate,
    pub show_time: NaiveTime,
    pub show_type: ShowType,
    pub sold_seats: i32,
}

impl Schedule {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.show_date.and_time(self.show_time)
    }
}
