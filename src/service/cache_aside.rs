use std::sync::Arc;
use std::time::Duration;

use crate::cache::OrderCache;
use crate::errors::CacheError;
use crate::metrics::Metrics;
use crate::models::Order;

// ============================================================================
// Cache-Aside Strategy
// ============================================================================
//
// Owns everything the access service does with the cache:
// - key derivation (the bare order_uid)
// - encoding of the cached snapshot (JSON)
// - the staleness window (TTL)
// - absorbing cache failures: a read error or a corrupt entry is a miss,
//   a write error is logged and dropped
//
// Nothing here ever returns a cache error to the request path, except the
// explicit `invalidate` maintenance call.
//
// ============================================================================

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

pub struct CacheAside {
    cache: Arc<dyn OrderCache>,
    ttl: Duration,
    metrics: Arc<Metrics>,
}

impl CacheAside {
    pub fn new(cache: Arc<dyn OrderCache>, ttl: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            cache,
            ttl,
            metrics,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key(order_uid: &str) -> &str {
        order_uid
    }

    pub fn encode(order: &Order) -> Result<Vec<u8>, CacheError> {
        Ok(serde_json::to_vec(order)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Order, CacheError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// `Some` only for a hit that decodes; every other outcome is a miss.
    pub async fn lookup(&self, order_uid: &str) -> Option<Order> {
        let bytes = match self.cache.get(Self::key(order_uid)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.metrics.record_cache_lookup("miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(
                    order_uid = %order_uid,
                    error = %e,
                    "Cache read failed, falling back to store"
                );
                self.metrics.record_cache_lookup("error");
                return None;
            }
        };

        match Self::decode(&bytes) {
            Ok(order) => {
                self.metrics.record_cache_lookup("hit");
                Some(order)
            }
            Err(e) => {
                tracing::warn!(
                    order_uid = %order_uid,
                    error = %e,
                    "Corrupt cache entry, falling back to store"
                );
                self.metrics.record_cache_lookup("corrupt");
                None
            }
        }
    }

    /// Best-effort write of the order snapshot. Returns whether it landed.
    pub async fn populate(&self, order: &Order) -> bool {
        let result = match Self::encode(order) {
            Ok(bytes) => {
                self.cache
                    .set(Self::key(&order.order_uid), &bytes, self.ttl)
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.metrics.record_cache_write(true);
                true
            }
            Err(e) => {
                tracing::warn!(
                    order_uid = %order.order_uid,
                    error = %e,
                    "Cache write failed, order stays store-only until next backfill"
                );
                self.metrics.record_cache_write(false);
                false
            }
        }
    }

    pub async fn invalidate(&self, order_uid: &str) -> Result<(), CacheError> {
        self.cache.delete(Self::key(order_uid)).await
    }
}
