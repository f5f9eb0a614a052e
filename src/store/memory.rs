use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{can_hold, SeatMapStore};
use crate::error::{BookingError, BookingResult};
use crate::models::{ScheduleId, Seat, SeatId, SeatMap, SeatStatus, SessionId};

/// Хранилище в памяти процесса. Каждая операция выполняется под одной блокировкой
/// записи, поэтому проверка и установка атомарны.
#[derive(Default)]
pub struct InMemorySeatMapStore {
    maps: RwLock<HashMap<ScheduleId, SeatMap>>,
}

impl InMemorySeatMapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_map(map: SeatMap) -> Self {
        let store = Self::new();
        store.put(map);
        store
    }

    pub fn put(&self, map: SeatMap) {
        let mut maps = self.maps.write().unwrap_or_else(|e| e.into_inner());
        maps.insert(map.schedule_id, map);
    }

    fn read<T>(
        &self,
        schedule_id: ScheduleId,
        f: impl FnOnce(&SeatMap) -> BookingResult<T>,
    ) -> BookingResult<T> {
        let maps = self.maps.read().unwrap_or_else(|e| e.into_inner());
        let map = maps
            .get(&schedule_id)
            .ok_or(BookingError::ScheduleNotFound(schedule_id))?;
        f(map)
    }

    fn write<T>(
        &self,
        schedule_id: ScheduleId,
        f: impl FnOnce(&mut SeatMap) -> BookingResult<T>,
    ) -> BookingResult<T> {
        let mut maps = self.maps.write().unwrap_or_else(|e| e.into_inner());
        let map = maps
            .get_mut(&schedule_id)
            .ok_or(BookingError::ScheduleNotFound(schedule_id))?;
        f(map)
    }
}

fn seat_mut<'a>(
    map: &'a mut SeatMap,
    schedule_id: ScheduleId,
    seat_id: &SeatId,
) -> BookingResult<&'a mut Seat> {
    map.find_mut(seat_id).ok_or_else(|| BookingError::SeatNotFound {
        schedule_id,
        seat_id: seat_id.clone(),
    })
}

#[async_trait]
impl SeatMapStore for InMemorySeatMapStore {
    async fn get_seat_map(&self, schedule_id: ScheduleId) -> BookingResult<SeatMap> {
        self.read(schedule_id, |map| Ok(map.clone()))
    }

    async fn get_seat(&self, schedule_id: ScheduleId, seat_id: &SeatId) -> BookingResult<Seat> {
        self.read(schedule_id, |map| {
            map.find(seat_id)
                .cloned()
                .ok_or_else(|| BookingError::SeatNotFound {
                    schedule_id,
                    seat_id: seat_id.clone(),
                })
        })
    }

    async fn set_seat_status(
        &self,
        schedule_id: ScheduleId,
        seat_id: &SeatId,
        status: SeatStatus,
    ) -> BookingResult<()> {
        self.write(schedule_id, |map| {
            let seat = seat_mut(map, schedule_id, seat_id)?;
            seat.status = status;
            if status != SeatStatus::Reserved {
                seat.held_by = None;
            }
            Ok(())
        })
    }

    async fn hold_seats(
        &self,
        schedule_id: ScheduleId,
        seat_ids: &[SeatId],
        session_id: &SessionId,
        prior: Option<&SessionId>,
    ) -> BookingResult<()> {
        self.write(schedule_id, |map| {
            // 1. Проверяем все места, не меняя ничего
            let mut conflicts = Vec::new();
            for seat_id in seat_ids {
                let seat = map.find(seat_id).ok_or_else(|| BookingError::SeatNotFound {
                    schedule_id,
                    seat_id: seat_id.clone(),
                })?;
                if !can_hold(seat, session_id, prior) {
                    conflicts.push(seat_id.clone());
                }
            }
            if !conflicts.is_empty() {
                return Err(BookingError::SeatConflict { seat_ids: conflicts });
            }

            // 2. Захватываем все разом
            for seat_id in seat_ids {
                let seat = seat_mut(map, schedule_id, seat_id)?;
                seat.status = SeatStatus::Reserved;
                seat.held_by = Some(*session_id);
            }
            Ok(())
        })
    }

    async fn release_seats(
        &self,
        schedule_id: ScheduleId,
        session_id: &SessionId,
        only: Option<&[SeatId]>,
    ) -> BookingResult<Vec<SeatId>> {
        self.write(schedule_id, |map| {
            let mut released = Vec::new();
            for seat in map.seats_mut() {
                let wanted = only.map_or(true, |ids| ids.contains(&seat.id));
                if wanted && seat.is_held_by(session_id) {
                    seat.status = SeatStatus::Available;
                    seat.held_by = None;
                    released.push(seat.id.clone());
                }
            }
            Ok(released)
        })
    }

    async fn sell_seats(
        &self,
        schedule_id: ScheduleId,
        seat_ids: &[SeatId],
        session_id: &SessionId,
    ) -> BookingResult<()> {
        self.write(schedule_id, |map| {
            let lost: Vec<SeatId> = seat_ids
                .iter()
                .filter(|id| !map.find(id).is_some_and(|s| s.is_held_by(session_id)))
                .cloned()
                .collect();
            if !lost.is_empty() {
                return Err(BookingError::SeatNoLongerHeld { seat_ids: lost });
            }

            for seat_id in seat_ids {
                let seat = seat_mut(map, schedule_id, seat_id)?;
                seat.status = SeatStatus::Sold;
                seat.held_by = None;
            }
            Ok(())
        })
    }

    async fn free_sold_seats(
        &self,
        schedule_id: ScheduleId,
        seat_ids: &[SeatId],
    ) -> BookingResult<Vec<SeatId>> {
        self.write(schedule_id, |map| {
            let mut freed = Vec::new();
            for seat_id in seat_ids {
                let seat = seat_mut(map, schedule_id, seat_id)?;
                if seat.status == SeatStatus::Sold {
                    seat.status = SeatStatus::Available;
                    freed.push(seat_id.clone());
                }
            }
            Ok(freed)
        })
    }

    async fn insert_seat_map(&self, map: &SeatMap) -> BookingResult<()> {
        self.put(map.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RowLayout, SeatCategory};
    use rust_decimal::Decimal;

    fn store() -> InMemorySeatMapStore {
        InMemorySeatMapStore::with_map(SeatMap::generate(
            1,
            Decimal::new(250, 0),
            3,
            &[RowLayout::new("A", 3, SeatCategory::Standard)],
        ))
    }

    #[tokio::test]
    async fn unknown_schedule_and_seat_are_not_found() {
        let store = store();
        assert!(matches!(
            store.get_seat_map(42).await,
            Err(BookingError::ScheduleNotFound(42))
        ));
        assert!(matches!(
            store.get_seat(1, &SeatId::from("Z9")).await,
            Err(BookingError::SeatNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn hold_is_all_or_nothing() {
        let store = store();
        let first = SessionId::new();
        let second = SessionId::new();
        let a1 = SeatId::from("A1");
        let a2 = SeatId::from("A2");

        store.hold_seats(1, &[a2.clone()], &first, None).await.unwrap();

        let err = store
            .hold_seats(1, &[a1.clone(), a2.clone()], &second, None)
            .await
            .unwrap_err();
        match err {
            BookingError::SeatConflict { seat_ids } => assert_eq!(seat_ids, vec![a2.clone()]),
            other => panic!("unexpected error: {:?}", other),
        }

        // A1 не должен был оказаться захваченным
        let seat = store.get_seat(1, &a1).await.unwrap();
        assert_eq!(seat.status, SeatStatus::Available);
    }

    #[tokio::test]
    async fn release_only_touches_own_seats() {
        let store = store();
        let mine = SessionId::new();
        let theirs = SessionId::new();

        store.hold_seats(1, &[SeatId::from("A1")], &mine, None).await.unwrap();
        store.hold_seats(1, &[SeatId::from("A2")], &theirs, None).await.unwrap();

        let released = store.release_seats(1, &mine, None).await.unwrap();
        assert_eq!(released, vec![SeatId::from("A1")]);
        assert_eq!(
            store.get_seat(1, &SeatId::from("A2")).await.unwrap().status,
            SeatStatus::Reserved
        );
    }

    #[tokio::test]
    async fn sell_fails_when_hold_is_gone() {
        let store = store();
        let session = SessionId::new();
        let a1 = SeatId::from("A1");

        store.hold_seats(1, &[a1.clone()], &session, None).await.unwrap();
        store.release_seats(1, &session, None).await.unwrap();

        assert!(matches!(
            store.sell_seats(1, &[a1], &session).await,
            Err(BookingError::SeatNoLongerHeld { .. })
        ));
    }
}
