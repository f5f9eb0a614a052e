//! payment.rs
//!
//! Списание оплаты за бронь через внешний платёжный шлюз.
//!
//! Ключевые компоненты:
//! 1.  **CircuitBreaker**: "Автоматический выключатель". После серии сбоев перестаёт
//!     пускать запросы к шлюзу, через таймаут пропускает один пробный.
//! 2.  **PaymentGateway**: граница ядра. `capture` возвращает либо списание с id
//!     транзакции, либо отказ; отказ - это неуспешный переход брони, а не авария.
//! 3.  **HttpPaymentGateway**: реализация поверх HTTP API шлюза с подписью запросов
//!     SHA-256 токеном. Все сетевые вызовы идут через `CircuitBreaker`.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};
use tokio::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{CircuitBreakerConfig, PaymentConfig};

/// Состояния "Автоматического выключателя" (Circuit Breaker).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// **Closed (Замкнуто)**: нормальный режим, запросы разрешены.
    Closed,
    /// **Open (Разомкнуто)**: после серии сбоев запросы временно запрещены.
    Open,
    /// **HalfOpen (Полуоткрыто)**: после таймаута пропускается пробный запрос.
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    /// Счетчик последовательных сбоев.
    failure_count: AtomicU32,
    /// Момент последнего сбоя, от него отсчитывается таймаут.
    last_failure: Mutex<Option<Instant>>,
    failure_threshold: u32,
    timeout_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            last_failure: Mutex::new(None),
            failure_threshold: failure_threshold.max(1),
            timeout_duration: timeout,
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(
            config.failure_threshold,
            Duration::from_secs(config.timeout_seconds),
        )
    }

    fn read_state(&self) -> CircuitState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: CircuitState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// Проверяет, можно ли выполнить следующий запрос к сервису.
    pub fn can_execute(&self) -> bool {
        match self.read_state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let last_failure = *self.last_failure.lock().unwrap_or_else(|e| e.into_inner());
                let cooled_down = last_failure
                    .map(|at| at.elapsed() >= self.timeout_duration)
                    .unwrap_or(true);

                if cooled_down {
                    self.set_state(CircuitState::HalfOpen);
                    info!("Circuit breaker transitioning to HalfOpen state");
                }
                cooled_down
            }
        }
    }

    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        if self.read_state() == CircuitState::HalfOpen {
            self.set_state(CircuitState::Closed);
            info!("Circuit breaker recovered - transitioning to Closed state");
        }
    }

    pub fn record_failure(&self) {
        let failure_count = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());

        match self.read_state() {
            CircuitState::Closed if failure_count >= self.failure_threshold => {
                self.set_state(CircuitState::Open);
                error!(
                    "Circuit breaker OPENED - {} failures reached threshold {}",
                    failure_count, self.failure_threshold
                );
            }
            CircuitState::HalfOpen => {
                self.set_state(CircuitState::Open);
                warn!("Circuit breaker test failed - returning to Open state");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.read_state()
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }
}

/// Итог попытки списания, дошедшей до шлюза.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Captured { transaction_id: String },
    Declined { reason: String },
}

/// Шлюз не ответил вовсе: выключатель разомкнут или сетевая ошибка.
#[derive(Debug)]
pub enum PaymentError {
    CircuitOpen,
    Gateway(reqwest::Error),
    InvalidAmount(Decimal),
}

impl std::fmt::Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentError::CircuitOpen => write!(
                f,
                "Circuit breaker is open - payment gateway temporarily unavailable"
            ),
            PaymentError::Gateway(e) => write!(f, "Payment gateway error: {}", e),
            PaymentError::InvalidAmount(amount) => write!(f, "Amount {} cannot be charged", amount),
        }
    }
}

impl std::error::Error for PaymentError {}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn capture(
        &self,
        booking_id: Uuid,
        payment_method_id: &str,
        amount: Decimal,
    ) -> Result<CaptureOutcome, PaymentError>;
}

// --- Модели данных для API платёжного шлюза ---

#[derive(Debug, Serialize)]
struct PaymentConfirmRequest {
    #[serde(rename = "teamSlug")]
    team_slug: String,
    token: String,
    #[serde(rename = "paymentId")]
    payment_id: String,
    amount: i64,
    currency: String,
    #[serde(rename = "orderId")]
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct PaymentConfirmResponse {
    success: bool,
    #[serde(rename = "transactionId")]
    transaction_id: Option<String>,
    code: Option<i32>,
    message: Option<String>,
}

/// Клиент HTTP API платёжного шлюза.
pub struct HttpPaymentGateway {
    team_slug: String,
    /// Секрет для подписи запросов.
    password: String,
    base_url: String,
    currency: String,
    http_client: reqwest::Client,
    circuit_breaker: CircuitBreaker,
}

impl HttpPaymentGateway {
    pub fn from_config(
        config: &PaymentConfig,
        breaker: &CircuitBreakerConfig,
    ) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            team_slug: config.merchant_id.clone(),
            password: config.merchant_password.clone(),
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            currency: config.currency.clone(),
            http_client,
            circuit_breaker: CircuitBreaker::from_config(breaker),
        })
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    /// Токен подписи: sha256(amount + currency + orderId + password + teamSlug).
    fn sign(&self, amount: i64, order_id: &str) -> String {
        let token_string = format!(
            "{}{}{}{}{}",
            amount, self.currency, order_id, self.password, self.team_slug
        );
        let mut hasher = Sha256::new();
        hasher.update(token_string.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    async fn execute_with_circuit_breaker<F, T>(&self, operation: F) -> Result<T, PaymentError>
    where
        F: std::future::Future<Output = Result<T, reqwest::Error>>,
    {
        if !self.circuit_breaker.can_execute() {
            warn!("Circuit breaker is OPEN - blocking payment gateway request");
            return Err(PaymentError::CircuitOpen);
        }

        match operation.await {
            Ok(result) => {
                self.circuit_breaker.record_success();
                Ok(result)
            }
            Err(e) => {
                error!("Payment gateway request failed: {:?}", e);
                self.circuit_breaker.record_failure();
                Err(PaymentError::Gateway(e))
            }
        }
    }
}

// Сумма в минимальных единицах валюты
fn minor_units(amount: Decimal) -> Option<i64> {
    (amount * Decimal::ONE_HUNDRED).round().to_i64()
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn capture(
        &self,
        booking_id: Uuid,
        payment_method_id: &str,
        amount: Decimal,
    ) -> Result<CaptureOutcome, PaymentError> {
        let amount_minor = minor_units(amount).ok_or(PaymentError::InvalidAmount(amount))?;
        let order_id = booking_id.to_string();

        let request = PaymentConfirmRequest {
            team_slug: self.team_slug.clone(),
            token: self.sign(amount_minor, &order_id),
            payment_id: payment_method_id.to_string(),
            amount: amount_minor,
            currency: self.currency.clone(),
            order_id,
        };

        info!(
            "Capturing payment for booking {}: amount={}, currency={}",
            booking_id, amount_minor, self.currency
        );

        let operation = async {
            self.http_client
                .post(format!("{}/api/v1/PaymentConfirm/confirm", self.base_url))
                .json(&request)
                .send()
                .await?
                .error_for_status()?
                .json::<PaymentConfirmResponse>()
                .await
        };

        let response = self.execute_with_circuit_breaker(operation).await?;

        if response.success {
            Ok(CaptureOutcome::Captured {
                transaction_id: response
                    .transaction_id
                    .unwrap_or_else(|| payment_method_id.to_string()),
            })
        } else {
            let reason = match (response.code, response.message) {
                (Some(code), Some(message)) => format!("{} (code {})", message, code),
                (None, Some(message)) => message,
                (Some(code), None) => format!("gateway code {}", code),
                (None, None) => "declined by gateway".to_string(),
            };
            warn!("Payment for booking {} declined: {}", booking_id, reason);
            Ok(CaptureOutcome::Declined { reason })
        }
    }
}
