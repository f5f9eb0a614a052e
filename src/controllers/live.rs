//! Живая карта мест по WebSocket.
//!
//! 1. Клиент подключается к `/api/schedules/{id}/live?session_id=...`
//! 2. Сразу получает снимок карты, дальше снимок после каждого изменения
//! 3. Места, удерживаемые его сессией, показываются как SELECTED
//!
//! Входящие сообщения клиента игнорируются, кроме Close.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::BookingResult;
use crate::models::{ScheduleId, SeatCounts, SeatId, SessionId};
use crate::services::availability::SeatDisplay;
use crate::services::ClientSeatView;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/schedules/{id}/live", get(live_seat_map))
}

#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Serialize)]
pub struct LiveSeat {
    pub seat_id: SeatId,
    pub display: SeatDisplay,
    pub price: Decimal,
}

#[derive(Debug, Serialize)]
pub struct LiveView {
    pub schedule_id: ScheduleId,
    /// Актуальный токен резерва: после смены набора мест он другой.
    pub session_id: Option<SessionId>,
    pub counts: SeatCounts,
    pub needs_refresh: bool,
    pub stale: bool,
    pub seats: Vec<LiveSeat>,
}

impl From<&ClientSeatView> for LiveView {
    fn from(view: &ClientSeatView) -> Self {
        let map = view.map();
        let seats = map
            .seats()
            .filter_map(|seat| {
                Some(LiveSeat {
                    seat_id: seat.id.clone(),
                    display: view.display(&seat.id)?,
                    price: seat.effective_price(map.base_price),
                })
            })
            .collect();

        Self {
            schedule_id: view.schedule_id(),
            session_id: view.session_id(),
            counts: map.counts(),
            needs_refresh: view.needs_refresh(),
            stale: view.is_stale(),
            seats,
        }
    }
}

// GET /api/schedules/{id}/live
async fn live_seat_map(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<ScheduleId>,
    Query(query): Query<LiveQuery>,
) -> BookingResult<Response> {
    // Карту читаем до апгрейда: несуществующий сеанс отдаёт обычный 404
    let mut view = state
        .synchronizer
        .open_view(schedule_id, query.session_id)
        .await?;

    if let Some(session_id) = view.session_id() {
        let held: Vec<SeatId> = view
            .map()
            .seats()
            .filter(|seat| seat.is_held_by(&session_id))
            .map(|seat| seat.id.clone())
            .collect();
        for seat_id in &held {
            view.select(seat_id);
        }
    }

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, view)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, view: ClientSeatView) {
    let schedule_id = view.schedule_id();
    info!("🎫 Live seat map opened for schedule {}", schedule_id);

    let (mut sender, mut receiver) = socket.split();
    let (publish, mut updates) = watch::channel(view.clone());
    let (stop, shutdown) = watch::channel(false);

    let synchronizer = Arc::clone(&state.synchronizer);
    let sync_task = tokio::spawn(async move {
        synchronizer.run(view, publish, shutdown).await;
    });

    // Первый снимок отправляется сразу
    updates.mark_changed();

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = LiveView::from(&*updates.borrow_and_update());
                let json = match serde_json::to_string(&snapshot) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize live view for schedule {}: {}", schedule_id, e);
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    debug!("Live client for schedule {} went away", schedule_id);
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Live socket error for schedule {}: {}", schedule_id, e);
                    break;
                }
            },
        }
    }

    let _ = stop.send(true);
    let _ = sync_task.await;
    info!("Live seat map closed for schedule {}", schedule_id);
}
