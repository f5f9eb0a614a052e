use redis::{aio::MultiplexedConnection, AsyncCommands, Client};

use crate::config::RedisConfig;

/// Одно мультиплексированное соединение на процесс: кэш снимков карт мест
/// и публикация уведомлений.
#[derive(Clone)]
pub struct RedisClient {
    pub conn: MultiplexedConnection,
}

impl RedisClient {
    pub async fn connect(config: &RedisConfig) -> redis::RedisResult<Self> {
        let client = Client::open(config.url.as_str())?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(RedisClient { conn })
    }

    /// PUBLISH в канал. Возвращает число подписчиков, получивших сообщение.
    pub async fn publish(&self, channel: &str, payload: String) -> redis::RedisResult<i64> {
        let mut conn = self.conn.clone();
        conn.publish(channel, payload).await
    }

    pub async fn ping(&self) -> redis::RedisResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
