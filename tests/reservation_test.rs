mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use common::{seat_map, seats, settle, TestApp, SCHEDULE_ID};
use showtime_booking::error::{BookingError, BookingResult};
use showtime_booking::events::{SeatEvent, SeatEventBus};
use showtime_booking::models::{ScheduleId, Seat, SeatId, SeatMap, SeatStatus, SessionId};
use showtime_booking::services::{LogNotificationSink, Notification, ReservationManager};
use showtime_booking::store::{InMemorySeatMapStore, SeatMapStore};

async fn status_of(app: &TestApp, seat: &str) -> SeatStatus {
    app.store
        .get_seat(SCHEDULE_ID, &SeatId::from(seat))
        .await
        .unwrap()
        .status
}

#[tokio::test]
async fn overlapping_request_is_rejected_as_a_whole() {
    let app = TestApp::new();
    let reservations = &app.state.reservations;

    let first = reservations
        .reserve(SCHEDULE_ID, &seats(&["A1", "A2"]), None)
        .await
        .unwrap();

    let err = reservations
        .reserve(SCHEDULE_ID, &seats(&["A2", "A3"]), None)
        .await
        .unwrap_err();
    match err {
        BookingError::SeatConflict { seat_ids } => assert_eq!(seat_ids, seats(&["A2"])),
        other => panic!("expected SeatConflict, got {other:?}"),
    }

    // A3 не должно было захватиться частично
    assert_eq!(status_of(&app, "A3").await, SeatStatus::Available);
    let a2 = app.store.get_seat(SCHEDULE_ID, &SeatId::from("A2")).await.unwrap();
    assert!(a2.is_held_by(&first.id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_shoppers_get_a_seat_at_most_once() {
    let app = TestApp::new();
    let reservations = Arc::clone(&app.state.reservations);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let reservations = Arc::clone(&reservations);
        handles.push(tokio::spawn(async move {
            reservations
                .reserve(SCHEDULE_ID, &seats(&["B3"]), None)
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(BookingError::SeatConflict { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(reservations.active_sessions(), 1);
    assert_eq!(status_of(&app, "B3").await, SeatStatus::Reserved);
}

#[tokio::test]
async fn released_seats_go_to_the_next_shopper() {
    let app = TestApp::new();
    let reservations = &app.state.reservations;

    let first = reservations
        .reserve(SCHEDULE_ID, &seats(&["A4", "A5"]), None)
        .await
        .unwrap();
    let released = reservations.release(&first.id).await.unwrap();
    assert_eq!(released.len(), 2);

    // Повторное освобождение ничего не делает
    assert!(reservations.release(&first.id).await.unwrap().is_empty());

    let second = reservations
        .reserve(SCHEDULE_ID, &seats(&["A5"]), None)
        .await
        .unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(status_of(&app, "A4").await, SeatStatus::Available);
}

#[tokio::test]
async fn changing_selection_keeps_shared_seats() {
    let app = TestApp::new();
    let reservations = &app.state.reservations;

    let first = reservations
        .reserve(SCHEDULE_ID, &seats(&["A1", "A2"]), None)
        .await
        .unwrap();
    let second = reservations
        .reserve(SCHEDULE_ID, &seats(&["A2", "A3"]), Some(&first.id))
        .await
        .unwrap();

    assert!(reservations.session(&first.id).is_none());
    assert_eq!(status_of(&app, "A1").await, SeatStatus::Available);
    for seat in ["A2", "A3"] {
        let seat = app.store.get_seat(SCHEDULE_ID, &SeatId::from(seat)).await.unwrap();
        assert!(seat.is_held_by(&second.id));
    }
}

#[tokio::test]
async fn unknown_seat_is_not_found() {
    let app = TestApp::new();
    let err = app
        .state
        .reservations
        .reserve(SCHEDULE_ID, &seats(&["Z9"]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::SeatNotFound { .. }));
}

#[tokio::test]
async fn maintenance_seat_cannot_be_held() {
    let app = TestApp::new();
    app.store
        .set_seat_status(SCHEDULE_ID, &SeatId::from("B1"), SeatStatus::Maintenance)
        .await
        .unwrap();

    let err = app
        .state
        .reservations
        .reserve(SCHEDULE_ID, &seats(&["B1"]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::SeatConflict { .. }));
}

#[tokio::test(start_paused = true)]
async fn hold_lapses_after_five_minutes() {
    let app = TestApp::new();
    let reservations = Arc::clone(&app.state.reservations);
    tokio::spawn(Arc::clone(&reservations).run_expiry_loop());

    let session = reservations
        .reserve(SCHEDULE_ID, &seats(&["B2", "B3"]), None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(4 * 60)).await;
    assert_eq!(status_of(&app, "B2").await, SeatStatus::Reserved);
    assert!(reservations.session(&session.id).is_some());

    tokio::time::sleep(Duration::from_secs(61)).await;
    settle().await;

    assert_eq!(status_of(&app, "B2").await, SeatStatus::Available);
    assert_eq!(status_of(&app, "B3").await, SeatStatus::Available);
    assert!(reservations.session(&session.id).is_none());

    let expired: Vec<_> = app
        .notifications
        .delivered()
        .into_iter()
        .filter(|n| matches!(n, Notification::HoldExpired { session_id, .. } if *session_id == session.id))
        .collect();
    assert_eq!(expired.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn overdue_hold_does_not_block_without_the_timer() {
    let app = TestApp::new();
    let reservations = &app.state.reservations;

    let stale = reservations
        .reserve(SCHEDULE_ID, &seats(&["A1"]), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;

    let fresh = reservations
        .reserve(SCHEDULE_ID, &seats(&["A1"]), None)
        .await
        .unwrap();
    let seat = app.store.get_seat(SCHEDULE_ID, &SeatId::from("A1")).await.unwrap();
    assert!(seat.is_held_by(&fresh.id));
    assert!(reservations.session(&stale.id).is_none());
}

#[tokio::test(start_paused = true)]
async fn extending_an_expired_session_fails() {
    let app = TestApp::new();
    let reservations = &app.state.reservations;

    let session = reservations
        .reserve(SCHEDULE_ID, &seats(&["A3"]), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(5 * 60)).await;

    let err = reservations
        .extend(&session.id, &seats(&["A3"]))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::SessionExpired(id) if id == session.id));
}

#[tokio::test(start_paused = true)]
async fn extend_starts_a_fresh_countdown() {
    let app = TestApp::new();
    let reservations = &app.state.reservations;

    let session = reservations
        .reserve(SCHEDULE_ID, &seats(&["A3"]), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(4 * 60)).await;

    let extended = reservations
        .extend(&session.id, &seats(&["A3", "A4"]))
        .await
        .unwrap();
    assert!(extended.remaining() > Duration::from_secs(4 * 60));
    assert!(reservations.session(&session.id).is_none());
}

#[tokio::test]
async fn deselect_rejects_seats_outside_the_session() {
    let app = TestApp::new();
    let reservations = &app.state.reservations;

    let session = reservations
        .reserve(SCHEDULE_ID, &seats(&["A1", "A2"]), None)
        .await
        .unwrap();

    let err = reservations
        .deselect(&session.id, &SeatId::from("A5"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::SeatNoLongerHeld { .. }));

    let remaining = reservations
        .deselect(&session.id, &SeatId::from("A1"))
        .await
        .unwrap()
        .expect("one seat left");
    assert_eq!(remaining.seat_ids.len(), 1);
    assert_eq!(status_of(&app, "A1").await, SeatStatus::Available);
}

#[tokio::test]
async fn reservations_are_broadcast_to_subscribers() {
    let app = TestApp::new();
    let mut events = app.state.events.subscribe(SCHEDULE_ID);

    let session = app
        .state
        .reservations
        .reserve(SCHEDULE_ID, &seats(&["B5"]), None)
        .await
        .unwrap();

    match events.recv().await.unwrap() {
        SeatEvent::StatusChanged {
            seat_id,
            status,
            held_by,
            ..
        } => {
            assert_eq!(seat_id, SeatId::from("B5"));
            assert_eq!(status, SeatStatus::Reserved);
            assert_eq!(held_by, Some(session.id));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

/// Хранилище, которое выдаёт места и только потом "долго отвечает".
struct SlowHoldStore {
    inner: InMemorySeatMapStore,
    delay: Duration,
}

#[async_trait]
impl SeatMapStore for SlowHoldStore {
    async fn get_seat_map(&self, schedule_id: ScheduleId) -> BookingResult<SeatMap> {
        self.inner.get_seat_map(schedule_id).await
    }

    async fn get_seat(&self, schedule_id: ScheduleId, seat_id: &SeatId) -> BookingResult<Seat> {
        self.inner.get_seat(schedule_id, seat_id).await
    }

    async fn set_seat_status(
        &self,
        schedule_id: ScheduleId,
        seat_id: &SeatId,
        status: SeatStatus,
    ) -> BookingResult<()> {
        self.inner.set_seat_status(schedule_id, seat_id, status).await
    }

    async fn hold_seats(
        &self,
        schedule_id: ScheduleId,
        seat_ids: &[SeatId],
        session_id: &SessionId,
        prior: Option<&SessionId>,
    ) -> BookingResult<()> {
        self.inner
            .hold_seats(schedule_id, seat_ids, session_id, prior)
            .await?;
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn release_seats(
        &self,
        schedule_id: ScheduleId,
        session_id: &SessionId,
        only: Option<&[SeatId]>,
    ) -> BookingResult<Vec<SeatId>> {
        self.inner.release_seats(schedule_id, session_id, only).await
    }

    async fn sell_seats(
        &self,
        schedule_id: ScheduleId,
        seat_ids: &[SeatId],
        session_id: &SessionId,
    ) -> BookingResult<()> {
        self.inner.sell_seats(schedule_id, seat_ids, session_id).await
    }

    async fn free_sold_seats(
        &self,
        schedule_id: ScheduleId,
        seat_ids: &[SeatId],
    ) -> BookingResult<Vec<SeatId>> {
        self.inner.free_sold_seats(schedule_id, seat_ids).await
    }

    async fn insert_seat_map(&self, map: &SeatMap) -> BookingResult<()> {
        self.inner.insert_seat_map(map).await
    }
}

#[tokio::test(start_paused = true)]
async fn abandoned_reserve_gives_granted_seats_back() {
    let store = Arc::new(SlowHoldStore {
        inner: InMemorySeatMapStore::with_map(seat_map(SCHEDULE_ID)),
        delay: Duration::from_secs(10),
    });
    let manager = ReservationManager::new(
        store.clone(),
        Arc::new(SeatEventBus::new()),
        Arc::new(LogNotificationSink),
        Duration::from_secs(300),
    );

    // Клиент ушёл, пока хранилище ещё отвечало на захват
    let attempt = tokio::time::timeout(
        Duration::from_millis(50),
        manager.reserve(SCHEDULE_ID, &seats(&["A1", "A2"]), None),
    )
    .await;
    assert!(attempt.is_err());
    assert_eq!(
        store.inner.get_seat(SCHEDULE_ID, &SeatId::from("A1")).await.unwrap().status,
        SeatStatus::Reserved
    );

    settle().await;

    for seat in ["A1", "A2"] {
        let seat = store.inner.get_seat(SCHEDULE_ID, &SeatId::from(seat)).await.unwrap();
        assert_eq!(seat.status, SeatStatus::Available);
        assert!(seat.held_by.is_none());
    }
    assert_eq!(manager.active_sessions(), 0);
}
