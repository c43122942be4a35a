// ============================================================================
// Cache - best-effort key/value tier with expiration
// ============================================================================
//
// Never authoritative: a miss says nothing about whether an order exists.
// `OrderCache` is the narrow capability used by the cache-aside strategy;
// `RedisCache` is the production implementation.
//
// ============================================================================

mod redis_cache;

use async_trait::async_trait;
use std::time::Duration;

use crate::errors::CacheError;

pub use redis_cache::RedisCache;

#[async_trait]
pub trait OrderCache: Send + Sync {
    /// `Ok(None)` is a miss (absent or expired), distinct from `Err`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}
