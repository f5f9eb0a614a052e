use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    Percentage,
    FixedAmount,
    BuyXGetY,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Percentage => "PERCENTAGE",
            DiscountType::FixedAmount => "FIXED_AMOUNT",
            DiscountType::BuyXGetY => "BUY_X_GET_Y",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PERCENTAGE" => Some(DiscountType::Percentage),
            "FIXED_AMOUNT" => Some(DiscountType::FixedAmount),
            "BUY_X_GET_Y" => Some(DiscountType::BuyXGetY),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Promotion {
    pub code: String,
    pub discount_type: DiscountType,
    /// Процент (0-100) для PERCENTAGE, сумма для FIXED_AMOUNT.
    pub value: Decimal,
    pub buy_quantity: Option<u32>,
    pub get_quantity: Option<u32>,
    pub max_uses: Option<i64>,
    pub used_count: i64,
    pub min_purchase: Option<Decimal>,
    pub max_discount: Option<Decimal>,
    pub starts_at: NaiveDateTime,
    pub ends_at: Option<NaiveDateTime>,
    pub is_active: bool,
}

/// Причина, по которой промокод не применён.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PromotionRejection {
    Unknown,
    Inactive,
    NotStarted,
    Expired,
    Exhausted,
    MinimumNotMet { minimum: Decimal },
    NotApplicable { detail: String },
}

impl fmt::Display for PromotionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromotionRejection::Unknown => write!(f, "promotion code does not exist"),
            PromotionRejection::Inactive => write!(f, "promotion is not active"),
            PromotionRejection::NotStarted => write!(f, "promotion has not started yet"),
            PromotionRejection::Expired => write!(f, "promotion has expired"),
            PromotionRejection::Exhausted => write!(f, "promotion usage limit reached"),
            PromotionRejection::MinimumNotMet { minimum } => {
                write!(f, "order total must be at least {}", minimum)
            }
            PromotionRejection::NotApplicable { detail } => write!(f, "{}", detail),
        }
    }
}

impl Promotion {
    /// Проверка применимости: активность, окно действия, лимит, минимальная сумма.
    pub fn check(&self, now: NaiveDateTime, amount: Decimal) -> Result<(), PromotionRejection> {
        if !self.is_active {
            return Err(PromotionRejection::Inactive);
        }
        if now < self.starts_at {
            return Err(PromotionRejection::NotStarted);
        }
        if matches!(self.ends_at, Some(end) if now >= end) {
            return Err(PromotionRejection::Expired);
        }
        if matches!(self.max_uses, Some(max) if self.used_count >= max) {
            return Err(PromotionRejection::Exhausted);
        }
        if let Some(minimum) = self.min_purchase {
            if amount < minimum {
                return Err(PromotionRejection::MinimumNotMet { minimum });
            }
        }
        Ok(())
    }

    /// Сумма скидки, никогда не больше `amount`.
    pub fn discount_for(
        &self,
        amount: Decimal,
        seat_prices: &[Decimal],
    ) -> Result<Decimal, PromotionRejection> {
        let raw = match self.discount_type {
            DiscountType::Percentage => {
                let pct = amount * self.value / Decimal::ONE_HUNDRED;
                match self.max_discount {
                    Some(cap) => pct.min(cap),
                    None => pct,
                }
            }
            DiscountType::FixedAmount => self.value,
            DiscountType::BuyXGetY => self.buy_x_get_y(seat_prices)?,
        };

        Ok(raw.max(Decimal::ZERO).min(amount.max(Decimal::ZERO)))
    }

    // Из каждой группы X+Y мест бесплатны Y самых дешёвых
    fn buy_x_get_y(&self, seat_prices: &[Decimal]) -> Result<Decimal, PromotionRejection> {
        let (buy, get) = match (self.buy_quantity, self.get_quantity) {
            (Some(buy), Some(get)) if buy > 0 && get > 0 => (buy as usize, get as usize),
            _ => {
                return Err(PromotionRejection::NotApplicable {
                    detail: "promotion is misconfigured".to_string(),
                })
            }
        };

        let group = buy + get;
        let groups = seat_prices.len() / group;
        if groups == 0 {
            return Err(PromotionRejection::NotApplicable {
                detail: format!("requires at least {} seats", group),
            });
        }

        let mut prices = seat_prices.to_vec();
        prices.sort();
        Ok(prices.iter().take(groups * get).copied().sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn promo(discount_type: DiscountType, value: i64) -> Promotion {
        Promotion {
            code: "TEST".to_string(),
            discount_type,
            value: Decimal::new(value, 0),
            buy_quantity: None,
            get_quantity: None,
            max_uses: None,
            used_count: 0,
            min_purchase: None,
            max_discount: None,
            starts_at: NaiveDate::from_ymd_opt(2024, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap(),
            ends_at: None,
            is_active: true,
        }
    }

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap()
    }

    #[test]
    fn percentage_respects_cap() {
        let mut p = promo(DiscountType::Percentage, 50);
        p.max_discount = Some(Decimal::new(100, 0));
        let discount = p.discount_for(Decimal::new(923, 0), &[]).unwrap();
        assert_eq!(discount, Decimal::new(100, 0));
    }

    #[test]
    fn fixed_amount_never_exceeds_total() {
        let p = promo(DiscountType::FixedAmount, 1000);
        let discount = p.discount_for(Decimal::new(923, 0), &[]).unwrap();
        assert_eq!(discount, Decimal::new(923, 0));
    }

    #[test]
    fn buy_two_get_one_frees_cheapest() {
        let mut p = promo(DiscountType::BuyXGetY, 0);
        p.buy_quantity = Some(2);
        p.get_quantity = Some(1);
        let prices = [
            Decimal::new(500, 0),
            Decimal::new(250, 0),
            Decimal::new(375, 0),
        ];
        let discount = p.discount_for(Decimal::new(2000, 0), &prices).unwrap();
        assert_eq!(discount, Decimal::new(250, 0));

        let err = p.discount_for(Decimal::new(2000, 0), &prices[..2]).unwrap_err();
        assert!(matches!(err, PromotionRejection::NotApplicable { .. }));
    }

    #[test]
    fn check_rejects_window_and_usage() {
        let mut p = promo(DiscountType::FixedAmount, 10);
        p.ends_at = Some(at(2024, 6, 1));
        assert_eq!(
            p.check(at(2024, 7, 1), Decimal::new(100, 0)),
            Err(PromotionRejection::Expired)
        );
        assert_eq!(
            p.check(at(2023, 7, 1), Decimal::new(100, 0)),
            Err(PromotionRejection::NotStarted)
        );

        p.ends_at = None;
        p.max_uses = Some(3);
        p.used_count = 3;
        assert_eq!(
            p.check(at(2024, 7, 1), Decimal::new(100, 0)),
            Err(PromotionRejection::Exhausted)
        );
    }
}
