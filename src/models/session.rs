use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use super::{ScheduleId, SeatId};

/// Непрозрачный токен сессии резерва. Клиент хранит его сам и передаёт в каждом вызове.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Набор мест, удерживаемых одним покупателем на одном сеансе.
#[derive(Debug, Clone)]
pub struct ReservationSession {
    pub id: SessionId,
    pub schedule_id: ScheduleId,
    pub seat_ids: BTreeSet<SeatId>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub(crate) deadline: Instant,
}

impl ReservationSession {
    pub fn new(schedule_id: ScheduleId, seat_ids: BTreeSet<SeatId>, ttl: Duration) -> Self {
        let created_at = Utc::now();
        let expires_at = created_at
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(5));

        Self {
            id: SessionId::new(),
            schedule_id,
            seat_ids,
            created_at,
            expires_at,
            deadline: Instant::now() + ttl,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    pub fn holds(&self, seat_id: &SeatId) -> bool {
        self.seat_ids.contains(seat_id)
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// То, что уходит клиенту: без внутренних таймеров.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub schedule_id: ScheduleId,
    pub seat_ids: Vec<SeatId>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remaining_seconds: u64,
}

impl From<&ReservationSession> for SessionInfo {
    fn from(session: &ReservationSession) -> Self {
        Self {
            session_id: session.id,
            schedule_id: session.schedule_id,
            seat_ids: session.seat_ids.iter().cloned().collect(),
            created_at: session.created_at,
            expires_at: session.expires_at,
            remaining_seconds: session.remaining().as_secs(),
        }
    }
}
