//! Расчёт стоимости: цена места, сервисный сбор, налог, скидка по промокоду.

use chrono::NaiveDateTime;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;
use std::sync::Arc;

use crate::error::{BookingError, BookingResult};
use crate::models::{Promotion, PromotionRejection, Seat, SeatCategory};
use crate::repositories::PromotionStore;

/// Цена места по категории, когда у места нет собственной цены.
pub fn price_for(category: SeatCategory, base_price: Decimal) -> Decimal {
    base_price * category.multiplier()
}

#[derive(Debug, Clone, Copy)]
pub struct PricingPolicy {
    pub fee_rate: Decimal,
    pub tax_rate: Decimal,
    /// Знаков после запятой при округлении сбора и налога.
    pub scale: u32,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            fee_rate: dec!(0.05),
            tax_rate: dec!(0.18),
            scale: 0,
        }
    }
}

impl PricingPolicy {
    fn round(&self, value: Decimal) -> Decimal {
        value.round_dp_with_strategy(self.scale, RoundingStrategy::MidpointAwayFromZero)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricingSummary {
    pub seat_count: usize,
    pub subtotal: Decimal,
    pub fee: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

impl PricingSummary {
    /// Сумма до скидки.
    pub fn gross(&self) -> Decimal {
        self.subtotal + self.fee + self.tax
    }

    /// Скидка зажимается в [0, gross], итог не уходит в минус.
    pub fn with_discount(&self, discount: Decimal) -> Self {
        let gross = self.gross();
        let discount = discount.max(Decimal::ZERO).min(gross);
        Self {
            discount,
            total: gross - discount,
            ..self.clone()
        }
    }
}

pub struct PricingCalculator {
    policy: PricingPolicy,
    promotions: Arc<dyn PromotionStore>,
}

impl PricingCalculator {
    pub fn new(policy: PricingPolicy, promotions: Arc<dyn PromotionStore>) -> Self {
        Self { policy, promotions }
    }

    pub fn policy(&self) -> &PricingPolicy {
        &self.policy
    }

    pub fn promotions(&self) -> &Arc<dyn PromotionStore> {
        &self.promotions
    }

    pub fn summarize(&self, seats: &[Seat], base_price: Decimal) -> PricingSummary {
        let prices: Vec<Decimal> = seats.iter().map(|s| s.effective_price(base_price)).collect();
        self.summarize_prices(&prices)
    }

    pub fn summarize_prices(&self, prices: &[Decimal]) -> PricingSummary {
        let subtotal: Decimal = prices.iter().copied().sum();
        let fee = self.policy.round(subtotal * self.policy.fee_rate);
        let tax = self.policy.round(subtotal * self.policy.tax_rate);

        PricingSummary {
            seat_count: prices.len(),
            subtotal,
            fee,
            tax,
            discount: Decimal::ZERO,
            total: subtotal + fee + tax,
        }
    }

    /// Проверяет промокод и возвращает сводку со скидкой. Скидка считается от
    /// суммы до скидки, цены мест нужны для BUY_X_GET_Y.
    pub async fn apply_promotion(
        &self,
        code: &str,
        summary: &PricingSummary,
        seat_prices: &[Decimal],
        now: NaiveDateTime,
    ) -> BookingResult<(PricingSummary, Promotion)> {
        let reject = |reason: PromotionRejection| BookingError::PromotionInvalid {
            code: code.to_string(),
            reason,
        };

        let promotion = self
            .promotions
            .validate(code)
            .await?
            .ok_or_else(|| reject(PromotionRejection::Unknown))?;

        let gross = summary.gross();
        promotion.check(now, gross).map_err(reject)?;
        let discount = promotion.discount_for(gross, seat_prices).map_err(reject)?;

        Ok((summary.with_discount(discount), promotion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::InMemoryPromotionStore;

    fn calculator() -> PricingCalculator {
        PricingCalculator::new(
            PricingPolicy::default(),
            Arc::new(InMemoryPromotionStore::new()),
        )
    }

    #[test]
    fn category_multipliers() {
        assert_eq!(price_for(SeatCategory::Standard, dec!(250)), dec!(250));
        assert_eq!(price_for(SeatCategory::Premium, dec!(250)), dec!(375));
        assert_eq!(price_for(SeatCategory::Vip, dec!(250)), dec!(500));
    }

    #[test]
    fn explicit_price_wins_over_category() {
        let seat = Seat::new("A", 1, SeatCategory::Vip).with_price(dec!(300));
        let summary = calculator().summarize(&[seat], dec!(250));
        assert_eq!(summary.subtotal, dec!(300));
    }

    #[test]
    fn standard_plus_vip_summary() {
        let seats = [
            Seat::new("A", 1, SeatCategory::Standard),
            Seat::new("A", 2, SeatCategory::Vip),
        ];
        let summary = calculator().summarize(&seats, dec!(250));

        assert_eq!(summary.subtotal, dec!(750));
        assert_eq!(summary.fee, dec!(38));
        assert_eq!(summary.tax, dec!(135));
        assert_eq!(summary.total, dec!(923));
    }

    #[test]
    fn discount_floors_total_at_zero() {
        let summary = calculator().summarize_prices(&[dec!(250), dec!(500)]);

        let partial = summary.with_discount(dec!(600));
        assert_eq!(partial.total, dec!(323));

        let full = summary.with_discount(dec!(1000));
        assert_eq!(full.total, Decimal::ZERO);
        assert_eq!(full.discount, dec!(923));
        assert_eq!(full.subtotal + full.fee + full.tax - full.discount, full.total);
    }
}
