use crate::cache::CacheService;
use crate::models::{ScheduleId, SeatMap};
use redis::AsyncCommands;
use tracing::{debug, warn};

fn seat_map_key(schedule_id: ScheduleId) -> String {
    format!("seats:{}", schedule_id)
}

impl CacheService {
    // Снимок карты мест; None при промахе или битых данных
    pub async fn get_seat_map(&self, schedule_id: ScheduleId) -> Option<SeatMap> {
        let mut conn = self.redis.conn.clone();
        let data: Option<String> = match conn.get(seat_map_key(schedule_id)).await {
            Ok(data) => data,
            Err(e) => {
                warn!("seat map cache read failed for schedule {}: {}", schedule_id, e);
                return None;
            }
        };

        data.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(map) => Some(map),
            Err(e) => {
                warn!("dropping corrupt seat map cache for schedule {}: {}", schedule_id, e);
                None
            }
        })
    }

    pub async fn save_seat_map(&self, map: &SeatMap) -> Result<(), redis::RedisError> {
        let data = serde_json::to_string(map).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error"))
        })?;
        let mut conn = self.redis.conn.clone();
        conn.set_ex(seat_map_key(map.schedule_id), data, self.seat_map_ttl_secs)
            .await
    }

    // Инвалидировать кеш мест после любой записи
    pub async fn invalidate_seats(&self, schedule_id: ScheduleId) {
        let mut conn = self.redis.conn.clone();
        let result: Result<(), _> = conn.del(seat_map_key(schedule_id)).await;
        match result {
            Ok(()) => debug!("Invalidated seats cache for schedule {}", schedule_id),
            Err(e) => warn!("Failed to invalidate seats cache for schedule {}: {}", schedule_id, e),
        }
    }
}
