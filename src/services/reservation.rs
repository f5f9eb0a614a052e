//! Менеджер резервов - ядро конкурентного доступа к местам.
//!
//! 1. Все изменения мест одного сеанса сериализуются асинхронным мьютексом сеанса
//! 2. Поверх этого хранилище делает атомарный "проверить и установить"
//! 3. Истечение резервов - одна очередь сроков по id сессии (см. `expiry`)
//! 4. Продажа мест и финализация брони идут под тем же мьютексом, что и истечение,
//!    поэтому истечение и подтверждение не могут перемешаться

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{BookingError, BookingResult};
use crate::events::{SeatEvent, SeatEventBus};
use crate::models::{ReservationSession, ScheduleId, SeatId, SeatStatus, SessionId};
use crate::services::expiry::ExpiryQueue;
use crate::services::notifications::{dispatch, Notification, NotificationSink};
use crate::store::SeatMapStore;

pub const DEFAULT_HOLD_TTL: Duration = Duration::from_secs(5 * 60);

// Пауза перед повторной попыткой истечения, если хранилище не ответило
const EXPIRY_RETRY: Duration = Duration::from_secs(5);

pub struct ReservationManager {
    store: Arc<dyn SeatMapStore>,
    events: Arc<SeatEventBus>,
    notifier: Arc<dyn NotificationSink>,
    hold_ttl: Duration,
    sessions: Mutex<HashMap<SessionId, ReservationSession>>,
    schedule_locks: Mutex<HashMap<ScheduleId, Arc<tokio::sync::Mutex<()>>>>,
    expiry: ExpiryQueue,
}

/// Страховка на случай отмены `reserve` посреди захвата: если future бросили
/// после того, как хранилище уже выдало места, они освобождаются в фоне.
struct PendingHold {
    store: Option<Arc<dyn SeatMapStore>>,
    schedule_id: ScheduleId,
    session_id: SessionId,
}

impl PendingHold {
    fn arm(store: &Arc<dyn SeatMapStore>, schedule_id: ScheduleId, session_id: SessionId) -> Self {
        Self {
            store: Some(Arc::clone(store)),
            schedule_id,
            session_id,
        }
    }

    fn disarm(mut self) {
        self.store = None;
    }
}

impl Drop for PendingHold {
    fn drop(&mut self) {
        let Some(store) = self.store.take() else {
            return;
        };
        let (schedule_id, session_id) = (self.schedule_id, self.session_id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                match store.release_seats(schedule_id, &session_id, None).await {
                    Ok(released) if !released.is_empty() => warn!(
                        "Reservation {} abandoned mid-flight, released {} seats",
                        session_id,
                        released.len()
                    ),
                    Ok(_) => {}
                    Err(e) => warn!("Failed to roll back abandoned reservation {}: {}", session_id, e),
                }
            });
        }
    }
}

impl ReservationManager {
    pub fn new(
        store: Arc<dyn SeatMapStore>,
        events: Arc<SeatEventBus>,
        notifier: Arc<dyn NotificationSink>,
        hold_ttl: Duration,
    ) -> Self {
        Self {
            store,
            events,
            notifier,
            hold_ttl,
            sessions: Mutex::new(HashMap::new()),
            schedule_locks: Mutex::new(HashMap::new()),
            expiry: ExpiryQueue::new(),
        }
    }

    pub fn hold_ttl(&self) -> Duration {
        self.hold_ttl
    }

    pub fn store(&self) -> &Arc<dyn SeatMapStore> {
        &self.store
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, ReservationSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn schedule_lock(&self, schedule_id: ScheduleId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.schedule_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(schedule_id).or_default())
    }

    /// Живая (не истёкшая) сессия.
    pub fn session(&self, session_id: &SessionId) -> Option<ReservationSession> {
        let now = Instant::now();
        self.sessions()
            .get(session_id)
            .filter(|s| !s.is_expired_at(now))
            .cloned()
    }

    pub fn active_sessions(&self) -> usize {
        let now = Instant::now();
        self.sessions().values().filter(|s| !s.is_expired_at(now)).count()
    }

    fn schedule_of(&self, session_id: &SessionId) -> Option<ScheduleId> {
        self.sessions().get(session_id).map(|s| s.schedule_id)
    }

    fn forget(&self, session_id: &SessionId) -> Option<ReservationSession> {
        self.expiry.cancel(session_id);
        self.events.retire_session(session_id);
        self.sessions().remove(session_id)
    }

    /* ---------- RESERVE ---------- */

    pub async fn reserve(
        &self,
        schedule_id: ScheduleId,
        seat_ids: &[SeatId],
        existing: Option<&SessionId>,
    ) -> BookingResult<ReservationSession> {
        self.reserve_replacing(schedule_id, seat_ids, existing, None)
            .await
    }

    // `predecessor` - уже освобождённая сессия, на смену которой приходит новая
    async fn reserve_replacing(
        &self,
        schedule_id: ScheduleId,
        seat_ids: &[SeatId],
        existing: Option<&SessionId>,
        predecessor: Option<SessionId>,
    ) -> BookingResult<ReservationSession> {
        let wanted: BTreeSet<SeatId> = seat_ids.iter().cloned().collect();
        if wanted.is_empty() {
            return Err(BookingError::Validation(
                "at least one seat must be selected".to_string(),
            ));
        }
        let wanted_list: Vec<SeatId> = wanted.iter().cloned().collect();

        let lock = self.schedule_lock(schedule_id);
        let _guard = lock.lock().await;

        // Просроченные, но ещё не обработанные таймером сессии не должны мешать
        self.expire_overdue_locked(schedule_id).await;

        let prior = existing.and_then(|id| {
            self.session(id)
                .filter(|s| s.schedule_id == schedule_id)
                .map(|s| s.id)
        });

        let session = ReservationSession::new(schedule_id, wanted, self.hold_ttl);
        let pending = PendingHold::arm(&self.store, schedule_id, session.id);

        if let Err(e) = self
            .store
            .hold_seats(schedule_id, &wanted_list, &session.id, prior.as_ref())
            .await
        {
            pending.disarm();
            return Err(e);
        }

        self.sessions().insert(session.id, session.clone());
        self.expiry.schedule(session.id, session.deadline());
        pending.disarm();

        // Подписчики должны узнать новый id раньше, чем увидят его в статусах мест
        if let Some(from) = prior.or(predecessor) {
            self.events.replace_session(schedule_id, from, session.id);
            debug!("Session {} replaced by {}", from, session.id);
        }

        let mut released = Vec::new();
        if let Some(prior_id) = prior {
            // Места старой сессии, не вошедшие в новый набор, всё ещё помечены ею
            released = self.store.release_seats(schedule_id, &prior_id, None).await?;
            self.forget(&prior_id);
        }

        self.events.publish_status(
            schedule_id,
            &wanted_list,
            SeatStatus::Reserved,
            Some(session.id),
        );
        self.events
            .publish_status(schedule_id, &released, SeatStatus::Available, None);

        info!(
            "Reserved {} seats on schedule {} for session {}",
            wanted_list.len(),
            schedule_id,
            session.id
        );
        Ok(session)
    }

    /* ---------- RELEASE / EXTEND / DESELECT ---------- */

    /// Идемпотентно: неизвестная или уже освобождённая сессия - пустой результат.
    pub async fn release(&self, session_id: &SessionId) -> BookingResult<Vec<SeatId>> {
        let Some(schedule_id) = self.schedule_of(session_id) else {
            return Ok(Vec::new());
        };

        let lock = self.schedule_lock(schedule_id);
        let _guard = lock.lock().await;

        let expired = match self.sessions().get(session_id) {
            None => return Ok(Vec::new()),
            Some(session) => session.is_expired_at(Instant::now()),
        };
        if expired {
            // Истёкшую сессию отпускаем как истечение, с уведомлением
            self.expire_locked(session_id, Instant::now()).await?;
            return Ok(Vec::new());
        }

        let released = self.store.release_seats(schedule_id, session_id, None).await?;
        self.forget(session_id);
        self.events
            .publish_status(schedule_id, &released, SeatStatus::Available, None);

        info!("Released session {} ({} seats)", session_id, released.len());
        Ok(released)
    }

    /// Освободить и захватить заново. Между шагами места могут уйти другому покупателю.
    pub async fn extend(
        &self,
        session_id: &SessionId,
        seat_ids: &[SeatId],
    ) -> BookingResult<ReservationSession> {
        let session = self
            .session(session_id)
            .ok_or(BookingError::SessionExpired(*session_id))?;

        self.release(session_id).await?;
        self.reserve_replacing(session.schedule_id, seat_ids, None, Some(*session_id))
            .await
    }

    /// Снять одно место с резерва. Опустевшая сессия уничтожается (`None`).
    pub async fn deselect(
        &self,
        session_id: &SessionId,
        seat_id: &SeatId,
    ) -> BookingResult<Option<ReservationSession>> {
        let schedule_id = self
            .session(session_id)
            .map(|s| s.schedule_id)
            .ok_or(BookingError::SessionExpired(*session_id))?;

        let lock = self.schedule_lock(schedule_id);
        let _guard = lock.lock().await;

        let holds = self
            .session(session_id)
            .ok_or(BookingError::SessionExpired(*session_id))?
            .holds(seat_id);
        if !holds {
            return Err(BookingError::SeatNoLongerHeld {
                seat_ids: vec![seat_id.clone()],
            });
        }

        let released = self
            .store
            .release_seats(schedule_id, session_id, Some(std::slice::from_ref(seat_id)))
            .await?;
        self.events
            .publish_status(schedule_id, &released, SeatStatus::Available, None);

        let remaining = {
            let mut sessions = self.sessions();
            match sessions.get_mut(session_id) {
                Some(session) => {
                    session.seat_ids.remove(seat_id);
                    (!session.seat_ids.is_empty()).then(|| session.clone())
                }
                None => None,
            }
        };
        if remaining.is_none() {
            self.forget(session_id);
        }
        Ok(remaining)
    }

    /* ---------- EXPIRY ---------- */

    /// Срабатывание таймера. После release или до наступления срока ничего не делает.
    pub async fn expire(&self, session_id: &SessionId) -> BookingResult<Vec<SeatId>> {
        let Some(schedule_id) = self.schedule_of(session_id) else {
            return Ok(Vec::new());
        };
        let lock = self.schedule_lock(schedule_id);
        let _guard = lock.lock().await;
        self.expire_locked(session_id, Instant::now()).await
    }

    // Вызывать только под мьютексом сеанса
    async fn expire_locked(
        &self,
        session_id: &SessionId,
        now: Instant,
    ) -> BookingResult<Vec<SeatId>> {
        let schedule_id = match self.sessions().get(session_id) {
            Some(session) if session.is_expired_at(now) => session.schedule_id,
            _ => return Ok(Vec::new()),
        };

        let released = self.store.release_seats(schedule_id, session_id, None).await?;
        self.forget(session_id);

        self.events
            .publish_status(schedule_id, &released, SeatStatus::Available, None);
        self.events.publish(SeatEvent::HoldExpired {
            schedule_id,
            session_id: *session_id,
            seat_ids: released.clone(),
        });
        dispatch(
            &self.notifier,
            Notification::HoldExpired {
                schedule_id,
                session_id: *session_id,
                seat_ids: released.clone(),
            },
        );

        info!(
            "Hold {} expired on schedule {}, {} seats back on sale",
            session_id,
            schedule_id,
            released.len()
        );
        Ok(released)
    }

    async fn expire_overdue_locked(&self, schedule_id: ScheduleId) {
        let now = Instant::now();
        let overdue: Vec<SessionId> = self
            .sessions()
            .values()
            .filter(|s| s.schedule_id == schedule_id && s.is_expired_at(now))
            .map(|s| s.id)
            .collect();

        for session_id in overdue {
            if let Err(e) = self.expire_locked(&session_id, now).await {
                warn!("Failed to expire overdue session {}: {}", session_id, e);
            }
        }
    }

    /// Истекает все просроченные сессии. Возвращает число обработанных сессий.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let overdue: Vec<(SessionId, ScheduleId)> = self
            .sessions()
            .values()
            .filter(|s| s.is_expired_at(now))
            .map(|s| (s.id, s.schedule_id))
            .collect();

        let mut expired = 0;
        for (session_id, schedule_id) in overdue {
            let lock = self.schedule_lock(schedule_id);
            let _guard = lock.lock().await;
            match self.expire_locked(&session_id, now).await {
                Ok(_) => expired += 1,
                Err(e) => warn!("Failed to expire session {}: {}", session_id, e),
            }
        }
        expired
    }

    /// Фоновый цикл очереди сроков. Запускается один раз при старте.
    pub async fn run_expiry_loop(self: Arc<Self>) {
        info!("🚀 Starting reservation expiry loop");
        loop {
            match self.expiry.next_deadline() {
                Some(deadline) => {
                    tokio::select! {
                        _ = sleep_until(deadline) => {}
                        _ = self.expiry.changed() => continue,
                    }
                }
                None => {
                    self.expiry.changed().await;
                    continue;
                }
            }

            for session_id in self.expiry.pop_due(Instant::now()) {
                if let Err(e) = self.expire(&session_id).await {
                    warn!("Expiry of session {} failed, retrying: {}", session_id, e);
                    self.expiry.schedule(session_id, Instant::now() + EXPIRY_RETRY);
                }
            }
        }
    }

    /* ---------- COMMIT / RETURN ---------- */

    /// RESERVED -> SOLD и финализация брони под мьютексом сеанса.
    ///
    /// Если финализатор вернул ошибку, проданные места возвращаются в продажу,
    /// а сессия забывается.
    pub async fn commit_hold<F, Fut, T>(
        &self,
        schedule_id: ScheduleId,
        session_id: &SessionId,
        seat_ids: &[SeatId],
        finalize: F,
    ) -> BookingResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BookingResult<T>>,
    {
        let lock = self.schedule_lock(schedule_id);
        let _guard = lock.lock().await;

        // Срок вышел, а таймер ещё не сработал: истечение выигрывает
        self.expire_locked(session_id, Instant::now()).await?;

        self.store.sell_seats(schedule_id, seat_ids, session_id).await?;

        let outcome = match finalize().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    "Finalizing session {} failed, returning {} seats: {}",
                    session_id,
                    seat_ids.len(),
                    e
                );
                let freed = self.store.free_sold_seats(schedule_id, seat_ids).await?;
                self.forget(session_id);
                self.events
                    .publish_status(schedule_id, &freed, SeatStatus::Available, None);
                return Err(e);
            }
        };

        // Места сессии, не попавшие в бронь. Бронь уже финализирована, поэтому
        // сбой здесь только логируется: остатки вернёт истечение сессии.
        let leftovers = match self.store.release_seats(schedule_id, session_id, None).await {
            Ok(leftovers) => {
                self.forget(session_id);
                leftovers
            }
            Err(e) => {
                warn!("Failed to release leftovers of session {}: {}", session_id, e);
                Vec::new()
            }
        };

        self.events
            .publish_status(schedule_id, seat_ids, SeatStatus::Sold, None);
        self.events
            .publish_status(schedule_id, &leftovers, SeatStatus::Available, None);

        info!(
            "Session {} committed: {} seats sold on schedule {}",
            session_id,
            seat_ids.len(),
            schedule_id
        );
        Ok(outcome)
    }

    /// SOLD -> AVAILABLE при отмене или возврате.
    pub async fn return_seats(
        &self,
        schedule_id: ScheduleId,
        seat_ids: &[SeatId],
    ) -> BookingResult<Vec<SeatId>> {
        let lock = self.schedule_lock(schedule_id);
        let _guard = lock.lock().await;

        let freed = self.store.free_sold_seats(schedule_id, seat_ids).await?;
        self.events
            .publish_status(schedule_id, &freed, SeatStatus::Available, None);
        Ok(freed)
    }
}
