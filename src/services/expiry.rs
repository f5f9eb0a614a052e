//! Очередь истечения резервов: один таймер на сессию вместо таймера на каждое место.
//!
//! Состав мест сессии смотрится в момент срабатывания, поэтому отменённая или уже
//! освобождённая сессия просто не находится и срабатывание ничего не делает.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::models::SessionId;

#[derive(Default)]
struct QueueState {
    by_deadline: BTreeSet<(Instant, SessionId)>,
    deadlines: HashMap<SessionId, Instant>,
}

#[derive(Default)]
pub struct ExpiryQueue {
    state: Mutex<QueueState>,
    changed: Notify,
}

impl ExpiryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ставит (или переставляет) срок истечения сессии.
    pub fn schedule(&self, session_id: SessionId, deadline: Instant) {
        {
            let mut state = self.state();
            if let Some(previous) = state.deadlines.insert(session_id, deadline) {
                state.by_deadline.remove(&(previous, session_id));
            }
            state.by_deadline.insert((deadline, session_id));
        }
        // Будим цикл: новый срок может оказаться ближайшим
        self.changed.notify_one();
    }

    pub fn cancel(&self, session_id: &SessionId) -> bool {
        let mut state = self.state();
        match state.deadlines.remove(session_id) {
            Some(deadline) => {
                state.by_deadline.remove(&(deadline, *session_id));
                true
            }
            None => false,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.state().by_deadline.iter().next().map(|(deadline, _)| *deadline)
    }

    /// Забирает из очереди все сессии со сроком не позже `now`.
    pub fn pop_due(&self, now: Instant) -> Vec<SessionId> {
        let mut state = self.state();
        let mut due = Vec::new();
        while let Some(&(deadline, session_id)) = state.by_deadline.iter().next() {
            if deadline > now {
                break;
            }
            state.by_deadline.remove(&(deadline, session_id));
            state.deadlines.remove(&session_id);
            due.push(session_id);
        }
        due
    }

    pub fn len(&self) -> usize {
        self.state().deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn changed(&self) {
        self.changed.notified().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    #[test]
    fn pops_in_deadline_order() {
        let queue = ExpiryQueue::new();
        let now = Instant::now();
        let late = SessionId::new();
        let early = SessionId::new();

        queue.schedule(late, now + Duration::from_secs(20));
        queue.schedule(early, now + Duration::from_secs(10));

        assert_eq!(queue.next_deadline(), Some(now + Duration::from_secs(10)));
        assert!(queue.pop_due(now).is_empty());
        assert_eq!(queue.pop_due(now + Duration::from_secs(15)), vec![early]);
        assert_eq!(queue.pop_due(now + Duration::from_secs(60)), vec![late]);
        assert!(queue.is_empty());
    }

    #[test]
    fn rescheduling_replaces_old_deadline() {
        let queue = ExpiryQueue::new();
        let now = Instant::now();
        let session = SessionId::new();

        queue.schedule(session, now + Duration::from_secs(5));
        queue.schedule(session, now + Duration::from_secs(50));

        assert_eq!(queue.len(), 1);
        assert!(queue.pop_due(now + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn cancelled_session_never_fires() {
        let queue = ExpiryQueue::new();
        let now = Instant::now();
        let session = SessionId::new();

        queue.schedule(session, now);
        assert!(queue.cancel(&session));
        assert!(!queue.cancel(&session));
        assert!(queue.pop_due(now + Duration::from_secs(1)).is_empty());
    }
}
