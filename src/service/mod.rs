// ============================================================================
// Order Access Service
// ============================================================================
//
// Decides, for every read and write, which tier is authoritative:
//
//   fetch:  cache -> [miss] store -> backfill cache (best-effort)
//   create: store (authoritative) -> cache (best-effort)
//
// The store is the only arbiter of existence. Cache failures never fail a
// request; store failures always do. Negative lookups are never cached.
//
// The service holds no mutable state of its own and is shared as
// `Arc<OrderService>` between HTTP workers and ingest workers.
//
// ============================================================================

mod cache_aside;

use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;

use crate::errors::{CacheError, ServiceError, StoreError};
use crate::metrics::Metrics;
use crate::models::Order;
use crate::store::OrderStore;

pub use cache_aside::{CacheAside, DEFAULT_CACHE_TTL};

const DEFAULT_PRELOAD_CONCURRENCY: usize = 16;
pub const DEFAULT_PRELOAD_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreloadReport {
    pub total: usize,
    pub cached: usize,
    pub failed: usize,
}

pub struct OrderService {
    store: Arc<dyn OrderStore>,
    cache: CacheAside,
    metrics: Arc<Metrics>,
    preload_concurrency: usize,
    preload_page_size: usize,
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderStore>, cache: CacheAside, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            cache,
            metrics,
            preload_concurrency: DEFAULT_PRELOAD_CONCURRENCY,
            preload_page_size: DEFAULT_PRELOAD_PAGE_SIZE,
        }
    }

    pub fn with_preload_concurrency(mut self, concurrency: usize) -> Self {
        self.preload_concurrency = concurrency.max(1);
        self
    }

    pub fn with_preload_page_size(mut self, page_size: usize) -> Self {
        self.preload_page_size = page_size.max(1);
        self
    }

    pub async fn fetch(&self, order_uid: &str) -> Result<Order, ServiceError> {
        if let Some(order) = self.cache.lookup(order_uid).await {
            tracing::debug!(order_uid = %order_uid, "Served order from cache");
            return Ok(order);
        }

        let started = Instant::now();
        let result = self.store.fetch(order_uid).await;

        match result {
            Ok(Some(order)) => {
                self.observe_store("fetch", "found", started);
                self.cache.populate(&order).await;
                tracing::debug!(order_uid = %order_uid, "Served order from store, cache backfilled");
                Ok(order)
            }
            Ok(None) => {
                self.observe_store("fetch", "not_found", started);
                tracing::debug!(order_uid = %order_uid, "Order not found");
                Err(ServiceError::NotFound(order_uid.to_string()))
            }
            Err(e) => {
                self.observe_store("fetch", "error", started);
                tracing::error!(order_uid = %order_uid, error = %e, "Store fetch failed");
                Err(e.into())
            }
        }
    }

    pub async fn create(&self, order: &Order) -> Result<(), ServiceError> {
        let started = Instant::now();

        if let Err(e) = self.store.create(order).await {
            let outcome = match &e {
                StoreError::Duplicate(_) => "duplicate",
                _ => "error",
            };
            self.observe_store("create", outcome, started);
            return Err(e.into());
        }
        self.observe_store("create", "ok", started);

        // only after the durable commit
        self.cache.populate(order).await;

        tracing::info!(
            order_uid = %order.order_uid,
            item_count = order.items.len(),
            "Order created"
        );

        Ok(())
    }

    /// Warm the cache from the store. Called once at startup.
    ///
    /// The store is walked in keyset pages of `preload_page_size`, each under
    /// its own store deadline; every page is written to the cache before the
    /// next one is read.
    pub async fn preload(&self) -> Result<PreloadReport, ServiceError> {
        let mut report = PreloadReport::default();
        let mut cursor: Option<String> = None;

        loop {
            let started = Instant::now();
            let page = match self.store.fetch_page(cursor.as_deref(), self.preload_page_size).await {
                Ok(page) => {
                    self.observe_store("fetch_page", "ok", started);
                    page
                }
                Err(e) => {
                    self.observe_store("fetch_page", "error", started);
                    tracing::error!(
                        after = ?cursor,
                        loaded = report.total,
                        error = %e,
                        "Cache preload could not read the store"
                    );
                    return Err(e.into());
                }
            };

            let cached = stream::iter(&page.orders)
                .map(|order| self.cache.populate(order))
                .buffer_unordered(self.preload_concurrency)
                .fold(0usize, |acc, landed| async move { acc + landed as usize })
                .await;

            report.total += page.orders.len();
            report.cached += cached;
            report.failed += page.orders.len() - cached;

            tracing::debug!(
                page_orders = page.orders.len(),
                loaded = report.total,
                "Cache preload page done"
            );

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        self.metrics.preload_cached.inc_by(report.cached as u64);
        self.metrics.preload_failed.inc_by(report.failed as u64);

        if report.failed > 0 {
            tracing::warn!(
                total = report.total,
                cached = report.cached,
                failed = report.failed,
                "Cache preload finished with failures"
            );
        } else {
            tracing::info!(total = report.total, "Cache preload finished");
        }

        Ok(report)
    }

    /// Drop the cached snapshot so the next fetch reloads it from the store.
    pub async fn invalidate(&self, order_uid: &str) -> Result<(), CacheError> {
        self.cache.invalidate(order_uid).await?;
        tracing::info!(order_uid = %order_uid, "Cache entry invalidated");
        Ok(())
    }

    fn observe_store(&self, operation: &str, outcome: &str, started: Instant) {
        self.metrics
            .record_store_operation(operation, outcome, started.elapsed().as_secs_f64());
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
