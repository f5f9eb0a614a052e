//! Синхронизатор доступности: держит клиентское представление карты мест
//! в актуальном состоянии, не ломая выбор, который покупатель делает прямо сейчас.
//!
//! 1. Основной канал - события шины по сеансу (push)
//! 2. Опрос хранилища раз в интервал - сверка и запасной путь при отставании подписчика
//! 3. Ошибки чтения повторяются ограниченное число раз, затем представление помечается устаревшим

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::time::{interval, sleep, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{BookingError, BookingResult};
use crate::events::{SeatEvent, SeatEventBus};
use crate::models::{ScheduleId, Seat, SeatId, SeatMap, SeatRow, SeatStatus, SessionId};
use crate::store::SeatMapStore;

#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub interval: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_retries: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

/// Как место выглядит у покупателя: выбранное им самим или статус из хранилища.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatDisplay {
    Selected,
    Store(SeatStatus),
}

impl SeatDisplay {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatDisplay::Selected => "SELECTED",
            SeatDisplay::Store(status) => status.as_str(),
        }
    }
}

impl Serialize for SeatDisplay {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Изменение одного места относительно локального представления.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeatDelta {
    pub seat_id: SeatId,
    pub status: SeatStatus,
    pub held_by: Option<SessionId>,
    pub price: Option<rust_decimal::Decimal>,
}

impl From<&Seat> for SeatDelta {
    fn from(seat: &Seat) -> Self {
        Self {
            seat_id: seat.id.clone(),
            status: seat.status,
            held_by: seat.held_by,
            price: seat.price,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeReport {
    /// Места, обновлённые из хранилища.
    pub applied: Vec<SeatId>,
    /// Выбранные покупателем места, оставленные как есть.
    pub preserved: Vec<SeatId>,
    /// Выбранные места, которые ушли другому покупателю или были проданы.
    pub lost_selection: Vec<SeatId>,
    /// Места, которых нет в ответе хранилища. Из представления не удаляются.
    pub missing: Vec<SeatId>,
    pub received: usize,
    pub expected: usize,
    pub needs_refresh: bool,
    /// Получено меньше 90% ожидаемого: нужен повторный запрос.
    pub refetch: bool,
    pub refetched: bool,
}

#[derive(Debug, Clone)]
pub struct ClientSeatView {
    map: SeatMap,
    session_id: Option<SessionId>,
    selected: BTreeSet<SeatId>,
    needs_refresh: bool,
    stale: bool,
    last_synced: Option<Instant>,
}

impl ClientSeatView {
    pub fn new(map: SeatMap, session_id: Option<SessionId>) -> Self {
        Self {
            map,
            session_id,
            selected: BTreeSet::new(),
            needs_refresh: false,
            stale: false,
            last_synced: Some(Instant::now()),
        }
    }

    pub fn schedule_id(&self) -> ScheduleId {
        self.map.schedule_id
    }

    pub fn map(&self) -> &SeatMap {
        &self.map
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn set_session(&mut self, session_id: Option<SessionId>) {
        self.session_id = session_id;
    }

    pub fn seat(&self, seat_id: &SeatId) -> Option<&Seat> {
        self.map.find(seat_id)
    }

    pub fn selected(&self) -> &BTreeSet<SeatId> {
        &self.selected
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh
    }

    /// Данные не удалось обновить за отведённое число попыток.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn last_synced(&self) -> Option<Instant> {
        self.last_synced
    }

    /// Выбрать можно только свободное место или удерживаемое своей сессией.
    pub fn select(&mut self, seat_id: &SeatId) -> bool {
        let selectable = self
            .map
            .find(seat_id)
            .is_some_and(|seat| self.owned_or_free(seat.status, seat.held_by));
        if selectable {
            self.selected.insert(seat_id.clone());
        }
        selectable
    }

    pub fn deselect(&mut self, seat_id: &SeatId) -> bool {
        self.selected.remove(seat_id)
    }

    pub fn display(&self, seat_id: &SeatId) -> Option<SeatDisplay> {
        let seat = self.map.find(seat_id)?;
        if self.selected.contains(seat_id) {
            Some(SeatDisplay::Selected)
        } else {
            Some(SeatDisplay::Store(seat.status))
        }
    }

    fn owned_or_free(&self, status: SeatStatus, held_by: Option<SessionId>) -> bool {
        match status {
            SeatStatus::Available => true,
            SeatStatus::Reserved => held_by.is_some() && held_by == self.session_id,
            _ => false,
        }
    }

    /// Места, отличающиеся от свежей карты (статус, держатель, цена) или новые в ней.
    pub fn diff(&self, fresh: &SeatMap) -> Vec<SeatDelta> {
        self.changed_seats(fresh).map(SeatDelta::from).collect()
    }

    fn changed_seats<'a>(&'a self, fresh: &'a SeatMap) -> impl Iterator<Item = &'a Seat> + 'a {
        fresh.seats().filter(|seat| match self.map.find(&seat.id) {
            Some(local) => {
                local.status != seat.status
                    || local.held_by != seat.held_by
                    || local.price != seat.price
            }
            None => true,
        })
    }

    /// Слить свежую карту в представление. Выбор покупателя имеет приоритет,
    /// пока хранилище показывает место свободным или удерживаемым его сессией.
    pub fn merge(&mut self, fresh: &SeatMap) -> MergeReport {
        let mut report = MergeReport {
            received: fresh.seat_count(),
            expected: fresh.expected_total,
            ..MergeReport::default()
        };

        let changed: Vec<Seat> = self.changed_seats(fresh).cloned().collect();
        for seat in changed {
            self.apply_seat(seat, &mut report);
        }

        // Выбранные места без изменений тоже считаются сохранёнными
        for seat_id in &self.selected {
            if !report.preserved.contains(seat_id) {
                report.preserved.push(seat_id.clone());
            }
        }

        report.missing = self
            .map
            .seats()
            .filter(|seat| fresh.find(&seat.id).is_none())
            .map(|seat| seat.id.clone())
            .collect();

        report.needs_refresh = report.received != report.expected || !report.missing.is_empty();
        report.refetch = report.received * 10 < report.expected * 9;

        self.map.base_price = fresh.base_price;
        self.map.expected_total = fresh.expected_total;
        self.needs_refresh = report.needs_refresh;
        self.stale = false;
        self.last_synced = Some(Instant::now());
        report
    }

    /// Применить событие шины. Возвращает true, если представление изменилось.
    pub fn apply_event(&mut self, event: &SeatEvent) -> bool {
        match event {
            SeatEvent::StatusChanged {
                schedule_id,
                seat_id,
                status,
                held_by,
            } if *schedule_id == self.map.schedule_id => {
                let Some(mut seat) = self.map.find(seat_id).cloned() else {
                    // Неизвестное место: карта разошлась, нужна сверка
                    self.needs_refresh = true;
                    return false;
                };
                seat.status = *status;
                seat.held_by = *held_by;

                let mut report = MergeReport::default();
                self.apply_seat(seat, &mut report);
                !report.applied.is_empty() || !report.lost_selection.is_empty()
            }
            SeatEvent::SessionReplaced {
                schedule_id,
                from,
                to,
            } if *schedule_id == self.map.schedule_id && self.session_id == Some(*from) => {
                self.session_id = Some(*to);
                true
            }
            // Освобождённые места приходят отдельными StatusChanged
            _ => false,
        }
    }

    fn apply_seat(&mut self, fresh: Seat, report: &mut MergeReport) {
        if self.selected.contains(&fresh.id) {
            if self.owned_or_free(fresh.status, fresh.held_by) {
                report.preserved.push(fresh.id);
                return;
            }
            self.selected.remove(&fresh.id);
            report.lost_selection.push(fresh.id.clone());
        }

        report.applied.push(fresh.id.clone());
        match self.map.find_mut(&fresh.id) {
            Some(local) => *local = fresh,
            None => match self.map.rows.iter_mut().find(|r| r.label == fresh.row) {
                Some(row) => row.seats.push(fresh),
                None => self.map.rows.push(SeatRow {
                    label: fresh.row.clone(),
                    seats: vec![fresh],
                }),
            },
        }
    }
}

fn is_transient(error: &BookingError) -> bool {
    matches!(error, BookingError::Database(_) | BookingError::Cache(_))
}

pub struct AvailabilitySynchronizer {
    store: Arc<dyn SeatMapStore>,
    events: Arc<SeatEventBus>,
    settings: SyncSettings,
}

impl AvailabilitySynchronizer {
    pub fn new(
        store: Arc<dyn SeatMapStore>,
        events: Arc<SeatEventBus>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            events,
            settings,
        }
    }

    pub async fn open_view(
        &self,
        schedule_id: ScheduleId,
        session_id: Option<SessionId>,
    ) -> BookingResult<ClientSeatView> {
        let map = self.fetch(schedule_id).await?;
        let session_id = session_id.map(|id| self.events.current_session(&id));
        let mut view = ClientSeatView::new(map.clone(), session_id);
        view.needs_refresh = map.seat_count() != map.expected_total;
        Ok(view)
    }

    async fn fetch(&self, schedule_id: ScheduleId) -> BookingResult<SeatMap> {
        let mut attempt = 0;
        loop {
            match self.store.get_seat_map(schedule_id).await {
                Ok(map) => return Ok(map),
                Err(e) if is_transient(&e) && attempt < self.settings.max_retries => {
                    attempt += 1;
                    debug!(
                        "Seat map read for schedule {} failed (attempt {}): {}",
                        schedule_id, attempt, e
                    );
                    sleep(self.settings.retry_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Один цикл сверки. При неудаче чтения представление помечается устаревшим.
    pub async fn poll(&self, view: &mut ClientSeatView) -> BookingResult<MergeReport> {
        let schedule_id = view.schedule_id();
        // События замены сессии могли пройти мимо (опрос без подписки, отставание)
        if let Some(id) = view.session_id {
            view.session_id = Some(self.events.current_session(&id));
        }
        let fresh = match self.fetch(schedule_id).await {
            Ok(map) => map,
            Err(e) => {
                view.stale = true;
                warn!("Seat map for schedule {} is stale: {}", schedule_id, e);
                return Err(e);
            }
        };

        let mut report = view.merge(&fresh);

        if report.refetch {
            info!(
                "Schedule {} returned {} of {} seats, re-fetching",
                schedule_id, report.received, report.expected
            );
            match self.fetch(schedule_id).await {
                Ok(second) => {
                    report = view.merge(&second);
                    report.refetched = true;
                }
                Err(e) => {
                    view.stale = true;
                    return Err(e);
                }
            }
        }

        if report.needs_refresh {
            warn!(
                "Seat map for schedule {} has {} seats, expected {}",
                schedule_id, report.received, report.expected
            );
        }
        Ok(report)
    }

    /// Фоновая синхронизация одного представления: события шины плюс опрос по интервалу.
    /// Каждое обновление публикуется в `publish`; цикл завершается по `shutdown`
    /// или когда у `publish` не осталось читателей.
    pub async fn run(
        &self,
        mut view: ClientSeatView,
        publish: watch::Sender<ClientSeatView>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let schedule_id = view.schedule_id();
        let mut events = self.events.subscribe(schedule_id);
        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let changed = tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll(&mut view).await {
                        warn!("Availability poll for schedule {} failed: {}", schedule_id, e);
                    }
                    true
                }
                event = events.recv() => match event {
                    Ok(event) => view.apply_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Subscriber for schedule {} lagged by {} events, polling", schedule_id, skipped);
                        if let Err(e) = self.poll(&mut view).await {
                            warn!("Availability poll for schedule {} failed: {}", schedule_id, e);
                        }
                        true
                    }
                    Err(RecvError::Closed) => {
                        events = self.events.subscribe(schedule_id);
                        false
                    }
                },
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                    false
                }
            };

            if changed {
                publish.send_replace(view.clone());
            }
            if publish.is_closed() {
                break;
            }
        }
        debug!("Availability sync for schedule {} stopped", schedule_id);
    }
}
