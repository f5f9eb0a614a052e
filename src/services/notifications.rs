//! Уведомления об истечении резерва и смене статуса брони.
//!
//! Доставка "выстрелил и забыл": ошибка доставки логируется и никак не влияет
//! на корректность резервов и броней.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{BookingStatus, ScheduleId, SeatId, SessionId};
use crate::redis_client::RedisClient;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    HoldExpired {
        schedule_id: ScheduleId,
        session_id: SessionId,
        seat_ids: Vec<SeatId>,
    },
    BookingStatusChanged {
        booking_id: Uuid,
        booking_number: String,
        schedule_id: ScheduleId,
        from: BookingStatus,
        to: BookingStatus,
    },
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Отправляет уведомление в фоне, не дожидаясь доставки.
pub fn dispatch(sink: &Arc<dyn NotificationSink>, notification: Notification) {
    let sink = Arc::clone(sink);
    tokio::spawn(async move {
        if let Err(e) = sink.deliver(&notification).await {
            warn!("notification delivery failed: {:#}", e);
        }
    });
}

/// Просто пишет уведомления в лог.
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
        match notification {
            Notification::HoldExpired {
                schedule_id,
                session_id,
                seat_ids,
            } => info!(
                "⏰ Hold {} on schedule {} lapsed, {} seats returned",
                session_id,
                schedule_id,
                seat_ids.len()
            ),
            Notification::BookingStatusChanged {
                booking_number,
                from,
                to,
                ..
            } => info!("🎫 Booking {} moved {} -> {}", booking_number, from, to),
        }
        Ok(())
    }
}

/// Публикует уведомления в Redis-канал; доставкой до людей занимается внешний сервис.
pub struct RedisNotificationSink {
    redis: RedisClient,
    channel: String,
}

impl RedisNotificationSink {
    pub fn new(redis: RedisClient, channel: impl Into<String>) -> Self {
        Self {
            redis,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for RedisNotificationSink {
    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
        let payload = serde_json::to_string(notification)?;
        let receivers = self.redis.publish(&self.channel, payload).await?;
        if receivers == 0 {
            debug!("No subscribers on {}", self.channel);
        }
        Ok(())
    }
}
