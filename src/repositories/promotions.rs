use async_trait::async_trait;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use sqlx::FromRow;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::database::Database;
use crate::error::{BookingError, BookingResult};
use crate::models::{DiscountType, Promotion};

#[async_trait]
pub trait PromotionStore: Send + Sync {
    /// Найти промокод. `None` - такого кода нет.
    async fn validate(&self, code: &str) -> BookingResult<Option<Promotion>>;

    /// Атомарно учесть использование. `false`, если лимит уже выбран.
    async fn record_use(&self, code: &str) -> BookingResult<bool>;
}

// Коды сравниваются без учёта регистра
fn normalize(code: &str) -> String {
    code.trim().to_uppercase()
}

/* ---------- IN-MEMORY ---------- */

#[derive(Default)]
pub struct InMemoryPromotionStore {
    promotions: RwLock<HashMap<String, Promotion>>,
}

impl InMemoryPromotionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, promotion: Promotion) {
        let mut promotions = self.promotions.write().unwrap_or_else(|e| e.into_inner());
        promotions.insert(normalize(&promotion.code), promotion);
    }
}

#[async_trait]
impl PromotionStore for InMemoryPromotionStore {
    async fn validate(&self, code: &str) -> BookingResult<Option<Promotion>> {
        let promotions = self.promotions.read().unwrap_or_else(|e| e.into_inner());
        Ok(promotions.get(&normalize(code)).cloned())
    }

    async fn record_use(&self, code: &str) -> BookingResult<bool> {
        let mut promotions = self.promotions.write().unwrap_or_else(|e| e.into_inner());
        let Some(promotion) = promotions.get_mut(&normalize(code)) else {
            return Ok(false);
        };
        if matches!(promotion.max_uses, Some(max) if promotion.used_count >= max) {
            return Ok(false);
        }
        promotion.used_count += 1;
        Ok(true)
    }
}

/* ---------- POSTGRES ---------- */

#[derive(Clone)]
pub struct PgPromotionStore {
    db: Database,
}

impl PgPromotionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[derive(Debug, FromRow)]
struct PromotionRecord {
    code: String,
    discount_type: String,
    value: Decimal,
    buy_quantity: Option<i32>,
    get_quantity: Option<i32>,
    max_uses: Option<i64>,
    used_count: i64,
    min_purchase: Option<Decimal>,
    max_discount: Option<Decimal>,
    starts_at: NaiveDateTime,
    ends_at: Option<NaiveDateTime>,
    is_active: bool,
}

impl TryFrom<PromotionRecord> for Promotion {
    type Error = BookingError;

    fn try_from(r: PromotionRecord) -> Result<Self, Self::Error> {
        let discount_type = DiscountType::parse(&r.discount_type).ok_or_else(|| {
            BookingError::InvalidRecord(format!(
                "promotion {} has unknown discount type '{}'",
                r.code, r.discount_type
            ))
        })?;

        Ok(Promotion {
            code: r.code,
            discount_type,
            value: r.value,
            buy_quantity: r.buy_quantity.and_then(|q| u32::try_from(q).ok()),
            get_quantity: r.get_quantity.and_then(|q| u32::try_from(q).ok()),
            max_uses: r.max_uses,
            used_count: r.used_count,
            min_purchase: r.min_purchase,
            max_discount: r.max_discount,
            starts_at: r.starts_at,
            ends_at: r.ends_at,
            is_active: r.is_active,
        })
    }
}

#[async_trait]
impl PromotionStore for PgPromotionStore {
    async fn validate(&self, code: &str) -> BookingResult<Option<Promotion>> {
        let record = sqlx::query_as::<_, PromotionRecord>(
            r#"
            SELECT code, discount_type, value, buy_quantity, get_quantity, max_uses, used_count,
                   min_purchase, max_discount, starts_at, ends_at, is_active
            FROM promotions
            WHERE UPPER(code) = $1
            "#,
        )
        .bind(normalize(code))
        .fetch_optional(&self.db.pool)
        .await?;

        record.map(Promotion::try_from).transpose()
    }

    async fn record_use(&self, code: &str) -> BookingResult<bool> {
        // Лимит проверяется в том же UPDATE, гонки двух броней нет
        let result = sqlx::query(
            r#"
            UPDATE promotions
            SET used_count = used_count + 1
            WHERE UPPER(code) = $1 AND (max_uses IS NULL OR used_count < max_uses)
            "#,
        )
        .bind(normalize(code))
        .execute(&self.db.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
