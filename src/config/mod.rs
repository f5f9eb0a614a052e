use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub payment: PaymentConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub reservation: ReservationConfig,
    pub pricing: PricingConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    /// "json" или "plain"
    pub log_format: String,
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Настройки Redis
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub seat_map_ttl_secs: u64,
    pub notification_channel: String,
}

// Настройки платежного шлюза
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    pub merchant_id: String,
    pub merchant_password: String,
    pub gateway_url: String,
    pub currency: String,
    pub timeout_seconds: u64,
}

// Настройки Circuit Breaker
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

// Резервы, синхронизация и фоновая уборка
#[derive(Debug, Clone, Deserialize)]
pub struct ReservationConfig {
    pub hold_ttl_seconds: u64,
    pub sync_interval_seconds: u64,
    pub sync_max_retries: u32,
    pub cleanup_interval_seconds: u64,
    /// Сколько ждать неоплаченную PENDING-бронь, прежде чем закрыть её.
    pub pending_grace_minutes: i64,
}

impl ReservationConfig {
    pub fn hold_ttl(&self) -> Duration {
        Duration::from_secs(self.hold_ttl_seconds)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

// Ставки сбора и налога
#[derive(Debug, Clone, Deserialize)]
pub struct PricingConfig {
    pub fee_rate: Decimal,
    pub tax_rate: Decimal,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn or_default(key: &'static str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = or_default(key, default);
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config {
            app: AppConfig {
                host: or_default("HOST", "0.0.0.0"),
                port: parsed("PORT", "8000")?,
                environment: or_default("ENVIRONMENT", "development"),
                rust_log: or_default("RUST_LOG", "showtime_booking=debug,tower_http=debug"),
                log_format: or_default("LOG_FORMAT", "plain"),
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                pool_size: parsed("DB_POOL_SIZE", "20")?,
            },
            redis: RedisConfig {
                url: required("REDIS_URL")?,
                seat_map_ttl_secs: parsed("SEAT_MAP_CACHE_TTL_SECONDS", "60")?,
                notification_channel: or_default("NOTIFICATION_CHANNEL", "booking-notifications"),
            },
            payment: PaymentConfig {
                merchant_id: required("MERCHANT_ID")?,
                merchant_password: required("MERCHANT_PASSWORD")?,
                gateway_url: or_default("PAYMENT_GATEWAY_URL", "https://gateway.hackload.com"),
                currency: or_default("PAYMENT_CURRENCY", "KZT"),
                timeout_seconds: parsed("PAYMENT_TIMEOUT_SECONDS", "30")?,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parsed("CIRCUIT_BREAKER_FAILURE_THRESHOLD", "5")?,
                timeout_seconds: parsed("CIRCUIT_BREAKER_TIMEOUT_SECONDS", "60")?,
            },
            reservation: ReservationConfig {
                hold_ttl_seconds: parsed("HOLD_TTL_SECONDS", "300")?,
                sync_interval_seconds: parsed("SYNC_INTERVAL_SECONDS", "5")?,
                sync_max_retries: parsed("SYNC_MAX_RETRIES", "3")?,
                cleanup_interval_seconds: parsed("CLEANUP_INTERVAL_SECONDS", "60")?,
                pending_grace_minutes: parsed("PENDING_BOOKING_GRACE_MINUTES", "15")?,
            },
            pricing: PricingConfig {
                fee_rate: parsed("SERVICE_FEE_RATE", "0.05")?,
                tax_rate: parsed("TAX_RATE", "0.18")?,
            },
        };

        if config.reservation.hold_ttl_seconds == 0 {
            return Err(ConfigError::Invalid {
                key: "HOLD_TTL_SECONDS",
                value: "0".to_string(),
            });
        }
        Ok(config)
    }
}
