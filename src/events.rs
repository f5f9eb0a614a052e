//! Шина событий по местам: отдельный broadcast-канал на каждый сеанс.
//!
//! Менеджер резервов и машина состояний броней публикуют сюда смену статусов мест,
//! синхронизатор доступности и WebSocket-подписчики слушают. Публикация без
//! подписчиков - не ошибка.
//!
//! Шина же помнит, какая сессия какую заменила: при изменении набора мест резерв
//! получает новый id, и представление покупателя должно перейти на него.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::models::{ScheduleId, SeatId, SeatStatus, SessionId};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SeatEvent {
    StatusChanged {
        schedule_id: ScheduleId,
        seat_id: SeatId,
        status: SeatStatus,
        held_by: Option<SessionId>,
    },
    HoldExpired {
        schedule_id: ScheduleId,
        session_id: SessionId,
        seat_ids: Vec<SeatId>,
    },
    SessionReplaced {
        schedule_id: ScheduleId,
        from: SessionId,
        to: SessionId,
    },
}

impl SeatEvent {
    pub fn schedule_id(&self) -> ScheduleId {
        match self {
            SeatEvent::StatusChanged { schedule_id, .. } => *schedule_id,
            SeatEvent::HoldExpired { schedule_id, .. } => *schedule_id,
            SeatEvent::SessionReplaced { schedule_id, .. } => *schedule_id,
        }
    }
}

pub struct SeatEventBus {
    channels: Mutex<HashMap<ScheduleId, broadcast::Sender<SeatEvent>>>,
    // старый id -> актуальный id
    successors: Mutex<HashMap<SessionId, SessionId>>,
    capacity: usize,
}

impl SeatEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            successors: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, schedule_id: ScheduleId) -> broadcast::Sender<SeatEvent> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(schedule_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub fn subscribe(&self, schedule_id: ScheduleId) -> broadcast::Receiver<SeatEvent> {
        self.sender(schedule_id).subscribe()
    }

    pub fn publish(&self, event: SeatEvent) {
        let sender = self.sender(event.schedule_id());
        // Err означает лишь отсутствие подписчиков
        let _ = sender.send(event);
    }

    pub fn publish_status(
        &self,
        schedule_id: ScheduleId,
        seat_ids: &[SeatId],
        status: SeatStatus,
        held_by: Option<SessionId>,
    ) {
        for seat_id in seat_ids {
            self.publish(SeatEvent::StatusChanged {
                schedule_id,
                seat_id: seat_id.clone(),
                status,
                held_by,
            });
        }
    }

    /// Запомнить замену сессии и разослать `SessionReplaced`. Публиковать до
    /// смены статусов мест новой сессии.
    pub fn replace_session(&self, schedule_id: ScheduleId, from: SessionId, to: SessionId) {
        {
            let mut successors = self.successors.lock().unwrap_or_else(|e| e.into_inner());
            for current in successors.values_mut() {
                if *current == from {
                    *current = to;
                }
            }
            successors.insert(from, to);
        }
        self.publish(SeatEvent::SessionReplaced {
            schedule_id,
            from,
            to,
        });
    }

    /// Актуальный id для сессии, которую могли заменить.
    pub fn current_session(&self, session_id: &SessionId) -> SessionId {
        let successors = self.successors.lock().unwrap_or_else(|e| e.into_inner());
        successors.get(session_id).copied().unwrap_or(*session_id)
    }

    /// Сессия завершена: цепочки замен, ведущие к ней, больше не нужны.
    pub fn retire_session(&self, session_id: &SessionId) {
        let mut successors = self.successors.lock().unwrap_or_else(|e| e.into_inner());
        successors.retain(|_, current| current != session_id);
    }

    pub fn subscriber_count(&self, schedule_id: ScheduleId) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .get(&schedule_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for SeatEventBus {
    fn default() -> Self {
        Self::new()
    }
}
