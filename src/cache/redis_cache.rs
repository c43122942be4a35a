use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::OrderCache;
use crate::errors::CacheError;
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

// ============================================================================
// Redis Cache Adapter
// ============================================================================
//
// Every command is bounded by a short timeout and routed through a circuit
// breaker. With the breaker open, calls fail immediately with
// `CacheError::CircuitOpen` and readers fall through to the store without
// paying a timeout each time.
//
// `ConnectionManager` reconnects on its own after the server comes back.
//
// ============================================================================

pub struct RedisCache {
    conn: ConnectionManager,
    guard: CallGuard,
}

impl RedisCache {
    pub async fn connect(
        url: &str,
        op_timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        let cache = Self {
            conn,
            guard: CallGuard::new(op_timeout, metrics),
        };
        cache.ping().await?;

        Ok(cache)
    }

    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        self.guard
            .run(async move {
                redis::cmd("PING")
                    .query_async::<String>(&mut conn)
                    .await
                    .map(|_| ())
            })
            .await
    }
}

#[async_trait]
impl OrderCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn.clone();
        self.guard.run(conn.get::<_, Option<Vec<u8>>>(key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        // SETEX rejects 0
        let seconds = ttl.as_secs().max(1);
        self.guard.run(conn.set_ex::<_, _, ()>(key, value, seconds)).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        self.guard.run(conn.del::<_, ()>(key)).await
    }
}

/// Timeout + circuit breaker wrapper applied to each Redis command.
struct CallGuard {
    op_timeout: Duration,
    breaker: CircuitBreaker,
    metrics: Arc<Metrics>,
}

impl CallGuard {
    fn new(op_timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            op_timeout,
            breaker: CircuitBreaker::new("redis", CircuitBreakerConfig::default()),
            metrics,
        }
    }

    async fn run<T, F>(&self, command: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, redis::RedisError>>,
    {
        let op_timeout = self.op_timeout;
        let result = self
            .breaker
            .call(async move {
                match tokio::time::timeout(op_timeout, command).await {
                    Ok(reply) => reply.map_err(CacheError::from),
                    Err(_) => Err(CacheError::Timeout(op_timeout)),
                }
            })
            .await;

        self.metrics
            .cache_circuit_state
            .set(self.breaker.state().await.as_gauge());

        result.map_err(|e| match e {
            CircuitBreakerError::CircuitOpen => CacheError::CircuitOpen,
            CircuitBreakerError::OperationFailed(e) => e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(op_timeout: Duration) -> (CallGuard, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new().unwrap());
        (CallGuard::new(op_timeout, metrics.clone()), metrics)
    }

    fn refused() -> redis::RedisError {
        redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"))
    }

    #[tokio::test]
    async fn test_guard_passes_replies_through() {
        let (guard, _) = guard(Duration::from_millis(50));
        let reply = guard.run(async { Ok::<_, redis::RedisError>(Some(vec![1u8, 2])) }).await;
        assert_eq!(reply.unwrap(), Some(vec![1, 2]));
    }

    #[tokio::test]
    async fn test_guard_times_out_slow_commands() {
        let (guard, _) = guard(Duration::from_millis(20));
        let reply = guard
            .run(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, redis::RedisError>(())
            })
            .await;
        assert!(matches!(reply, Err(CacheError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_guard_opens_circuit_after_repeated_failures() {
        let (guard, metrics) = guard(Duration::from_millis(50));
        let threshold = CircuitBreakerConfig::default().failure_threshold;

        for _ in 0..threshold {
            let reply = guard.run(async { Err::<(), _>(refused()) }).await;
            assert!(matches!(reply, Err(CacheError::Redis(_))));
        }

        let reply = guard.run(async { Ok::<_, redis::RedisError>(()) }).await;
        assert!(matches!(reply, Err(CacheError::CircuitOpen)));
        assert_eq!(metrics.cache_circuit_state.get(), 1);
    }
}
