use super::{PriceWindow, ValueCache};
use crate::error::{PipelineError, Result};
use crate::models::PriceObservation;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Duration};

/// Observation as stored inside a sorted-set member
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredObservation {
    price: Decimal,
    observed_at: DateTime<Utc>,
}

/// Redis persistence for recent prices and cached values
///
/// Prices live in a sorted set `prices:{symbol}` scored by observation time in
/// microseconds. Members are prefixed with a zero-padded per-symbol sequence
/// number so that equal scores fall back to insertion order and identical
/// payloads are never collapsed.
#[derive(Clone)]
pub struct RedisPersistence {
    conn: ConnectionManager,
    capacity: usize,
}

fn window_key(symbol: &str) -> String {
    format!("prices:{}", symbol)
}

fn sequence_key(symbol: &str) -> String {
    format!("prices:{}:seq", symbol)
}

fn score(observed_at: DateTime<Utc>) -> f64 {
    observed_at.timestamp_micros() as f64
}

fn encode_member(sequence: u64, observation: &PriceObservation) -> Result<String> {
    let stored = StoredObservation {
        price: observation.price,
        observed_at: observation.observed_at,
    };
    Ok(format!("{:020}|{}", sequence, serde_json::to_string(&stored)?))
}

fn decode_member(symbol: &str, member: &str) -> Result<PriceObservation> {
    let (_, json) = member
        .split_once('|')
        .ok_or_else(|| PipelineError::Corrupt(format!("malformed price member '{}'", member)))?;
    let stored: StoredObservation = serde_json::from_str(json)?;

    Ok(PriceObservation {
        symbol: symbol.to_string(),
        price: stored.price,
        observed_at: stored.observed_at,
    })
}

impl RedisPersistence {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `capacity` - Maximum number of observations kept per symbol
    pub async fn new(redis_url: &str, capacity: usize) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| PipelineError::Timeout {
                operation: "redis.connect",
                timeout: Duration::from_secs(5),
            })??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn, capacity })
    }

    /// Remove all stored prices for a symbol
    pub async fn clear_symbol(&self, symbol: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(vec![window_key(symbol), sequence_key(symbol)]).await?;
        Ok(())
    }
}

#[async_trait]
impl PriceWindow for RedisPersistence {
    async fn push(&self, observation: &PriceObservation) -> Result<()> {
        let key = window_key(&observation.symbol);
        let mut conn = self.conn.clone();

        let sequence: u64 = conn.incr(sequence_key(&observation.symbol), 1).await?;
        let member = encode_member(sequence, observation)?;

        // Insert and trim in one MULTI so readers never see an over-full window
        let keep_from = -(self.capacity as isize) - 1;
        let _: () = redis::pipe()
            .atomic()
            .zadd(&key, member, score(observation.observed_at))
            .ignore()
            .zremrangebyrank(&key, 0, keep_from)
            .ignore()
            .query_async(&mut conn)
            .await?;

        tracing::debug!(
            symbol = %observation.symbol,
            price = %observation.price,
            sequence,
            "Saved price to Redis"
        );

        Ok(())
    }

    async fn recent(&self, symbol: &str, count: usize) -> Result<Vec<PriceObservation>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .zrange(window_key(symbol), -(count as isize), -1)
            .await?;

        members
            .iter()
            .map(|member| decode_member(symbol, member))
            .collect()
    }

    async fn len(&self, symbol: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let count: usize = conn.zcard(window_key(symbol)).await?;
        Ok(count)
    }
}

#[async_trait]
impl ValueCache for RedisPersistence {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => {
                // Millisecond expiry, sub-second TTLs are common
                let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
                let _: () = conn.pset_ex(key, value, millis).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn create_test_observation(symbol: &str, seconds_ago: i64, price: Decimal) -> PriceObservation {
        PriceObservation {
            symbol: symbol.to_string(),
            price,
            observed_at: Utc::now() - chrono::Duration::seconds(seconds_ago),
        }
    }

    #[test]
    fn test_member_encoding_orders_by_sequence() {
        let obs = create_test_observation("BTCUSDT", 0, dec!(100));
        let first = encode_member(9, &obs).unwrap();
        let second = encode_member(10, &obs).unwrap();

        // Lexicographic order of members must follow insertion order
        assert!(first < second);
        assert_eq!(decode_member("BTCUSDT", &second).unwrap(), obs);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_member("BTCUSDT", "not-a-member").is_err());
    }

    #[tokio::test]
    async fn test_connection_timeout() {
        // TEST-NET-1 address, never routable
        let result = RedisPersistence::new("redis://192.0.2.1:6379", 100).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_push_and_read_window() {
        let persistence = RedisPersistence::new("redis://127.0.0.1:6379", 100)
            .await
            .expect("Failed to connect to Redis");
        persistence.clear_symbol("TEST_WINDOW").await.unwrap();

        for (i, price) in [dec!(100), dec!(101), dec!(102)].into_iter().enumerate() {
            let obs = create_test_observation("TEST_WINDOW", 3 - i as i64, price);
            persistence.push(&obs).await.unwrap();
        }

        let recent = persistence.recent("TEST_WINDOW", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].price, dec!(101));
        assert_eq!(recent[1].price, dec!(102));
        assert_eq!(persistence.len("TEST_WINDOW").await.unwrap(), 3);

        persistence.clear_symbol("TEST_WINDOW").await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_equal_timestamps_keep_insertion_order() {
        let persistence = RedisPersistence::new("redis://127.0.0.1:6379", 100)
            .await
            .expect("Failed to connect to Redis");
        persistence.clear_symbol("TEST_TIES").await.unwrap();

        let observed_at = Utc::now();
        for price in [dec!(3), dec!(1), dec!(2)] {
            let obs = PriceObservation {
                symbol: "TEST_TIES".to_string(),
                price,
                observed_at,
            };
            persistence.push(&obs).await.unwrap();
        }

        let recent = persistence.recent("TEST_TIES", 3).await.unwrap();
        let prices: Vec<Decimal> = recent.iter().map(|o| o.price).collect();
        assert_eq!(prices, vec![dec!(3), dec!(1), dec!(2)]);

        persistence.clear_symbol("TEST_TIES").await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_capacity_trims_oldest() {
        let persistence = RedisPersistence::new("redis://127.0.0.1:6379", 3)
            .await
            .expect("Failed to connect to Redis");
        persistence.clear_symbol("TEST_TRIM").await.unwrap();

        for i in 0..5 {
            let obs = create_test_observation("TEST_TRIM", 10 - i, Decimal::from(100 + i));
            persistence.push(&obs).await.unwrap();
        }

        assert_eq!(persistence.len("TEST_TRIM").await.unwrap(), 3);
        let recent = persistence.recent("TEST_TRIM", 10).await.unwrap();
        assert_eq!(recent[0].price, dec!(102));

        persistence.clear_symbol("TEST_TRIM").await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_cache_set_get_delete() {
        let persistence = RedisPersistence::new("redis://127.0.0.1:6379", 100)
            .await
            .expect("Failed to connect to Redis");

        persistence.set("sma:TEST_CACHE:5", "101.25", None).await.unwrap();
        assert_eq!(
            persistence.get("sma:TEST_CACHE:5").await.unwrap().as_deref(),
            Some("101.25")
        );

        persistence.delete("sma:TEST_CACHE:5").await.unwrap();
        assert!(persistence.get("sma:TEST_CACHE:5").await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_cache_subsecond_ttl_expires() {
        let persistence = RedisPersistence::new("redis://127.0.0.1:6379", 100)
            .await
            .expect("Failed to connect to Redis");

        persistence
            .set("sma:TEST_TTL:5", "99.5", Some(Duration::from_millis(200)))
            .await
            .unwrap();
        assert!(persistence.get("sma:TEST_TTL:5").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(persistence.get("sma:TEST_TTL:5").await.unwrap().is_none());
    }
}
