use crate::redis_client::RedisClient;

pub mod seats;

/// Кеш поверх Redis. Только ускоряет чтение: авторитетные данные всегда в БД.
#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
    seat_map_ttl_secs: u64,
}

impl CacheService {
    pub fn new(redis: RedisClient) -> Self {
        Self {
            redis,
            seat_map_ttl_secs: 60,
        }
    }

    pub fn with_seat_map_ttl(mut self, ttl_secs: u64) -> Self {
        self.seat_map_ttl_secs = ttl_secs;
        self
    }
}
