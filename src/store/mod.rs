// ============================================================================
// Durable Store - the single source of truth for orders
// ============================================================================
//
// `OrderStore` is the narrow capability the access service depends on.
// `PgOrderStore` implements it on PostgreSQL; tests substitute an in-memory
// fake.
//
// ============================================================================

mod postgres;

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::models::Order;

pub use postgres::{PgOrderStore, DEFAULT_OPERATION_TIMEOUT};

/// One keyset page of complete orders, in `order_uid` order.
#[derive(Debug, Default)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    /// Last `order_uid` scanned on this page; `None` once the table is
    /// exhausted. Incomplete orders are skipped but still advance the cursor.
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist the order with its delivery, payment and items as one atomic
    /// unit. Nothing is visible to readers unless everything is.
    async fn create(&self, order: &Order) -> Result<(), StoreError>;

    /// `Ok(None)` means the order does not exist; it is not an error.
    async fn fetch(&self, order_uid: &str) -> Result<Option<Order>, StoreError>;

    /// Up to `limit` complete orders with `order_uid` greater than `after`.
    /// Used by preload to enumerate the store one bounded page at a time.
    async fn fetch_page(&self, after: Option<&str>, limit: usize) -> Result<OrderPage, StoreError>;
}
