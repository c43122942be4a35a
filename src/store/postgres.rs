use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use super::{OrderPage, OrderStore};
use crate::errors::StoreError;
use crate::models::{Delivery, Item, Order, Payment};

// ============================================================================
// PostgreSQL Order Store
// ============================================================================
//
// Schema: migrations/0001_orders.sql
// - orders   (order_uid PK)
// - delivery (order_uid FK, 1:1)
// - payment  (order_uid FK, 1:1)
// - items    (order_uid FK, 1:N, BIGSERIAL id keeps insertion order)
//
// Every operation runs under `operation_timeout`. When the deadline fires the
// in-flight future is dropped; an uncommitted transaction is rolled back by
// sqlx when it is dropped, so a timed-out create never leaves partial rows.
//
// ============================================================================

pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

const ORDER_COLUMNS: &str = "order_uid, track_number, entry, locale, internal_signature, \
     customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard";

const DELIVERY_COLUMNS: &str = "name, phone, zip, city, address, region, email";

const PAYMENT_COLUMNS: &str = "transaction, request_id, currency, provider, amount, \
     payment_dt, bank, delivery_cost, goods_total, custom_fee";

const ITEM_COLUMNS: &str = "chrt_id, track_number, price, rid, name, sale, size, \
     total_price, nm_id, brand, status";

pub struct PgOrderStore {
    pool: PgPool,
    operation_timeout: Duration,
}

impl PgOrderStore {
    pub fn new(pool: PgPool, operation_timeout: Duration) -> Self {
        Self {
            pool,
            operation_timeout,
        }
    }

    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        operation_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(operation_timeout)
            .connect(database_url)
            .await?;

        Ok(Self::new(pool, operation_timeout))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.within_deadline(async {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        })
        .await
    }

    async fn within_deadline<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.operation_timeout, operation)
            .await
            .map_err(|_| StoreError::Timeout(self.operation_timeout))?
    }

    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        if let Err(e) = insert_rows(&mut tx, order).await {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(
                    order_uid = %order.order_uid,
                    error = %rollback_err,
                    "Rollback failed after insert error"
                );
            }
            return Err(classify_write_error(e, &order.order_uid));
        }

        tx.commit()
            .await
            .map_err(|e| classify_write_error(e, &order.order_uid))?;

        tracing::debug!(
            order_uid = %order.order_uid,
            item_count = order.items.len(),
            "Order committed"
        );

        Ok(())
    }

    async fn load_order(&self, order_uid: &str) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;

        let head: Option<OrderRow> =
            sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_uid = $1"))
                .bind(order_uid)
                .fetch_optional(&mut *conn)
                .await?;

        let Some(head) = head else {
            return Ok(None);
        };

        let delivery: Delivery = sqlx::query_as(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM delivery WHERE order_uid = $1"
        ))
        .bind(order_uid)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| incomplete(order_uid, "delivery"))?;

        let payment: Payment = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment WHERE order_uid = $1"
        ))
        .bind(order_uid)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| incomplete(order_uid, "payment"))?;

        let items: Vec<Item> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE order_uid = $1 ORDER BY id"
        ))
        .bind(order_uid)
        .fetch_all(&mut *conn)
        .await?;

        Ok(Some(head.into_order(delivery, payment, items)))
    }

    async fn load_page(&self, after: Option<&str>, limit: usize) -> Result<OrderPage, StoreError> {
        let mut conn = self.pool.acquire().await?;

        let heads: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE ($1::TEXT IS NULL OR order_uid > $1) \
             ORDER BY order_uid LIMIT $2"
        ))
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&mut *conn)
        .await?;

        let next_cursor = match heads.last() {
            Some(last) if heads.len() >= limit => Some(last.order_uid.clone()),
            _ => None,
        };

        if heads.is_empty() {
            return Ok(OrderPage::default());
        }

        let uids: Vec<String> = heads.iter().map(|h| h.order_uid.clone()).collect();

        let deliveries: Vec<DeliveryRow> = sqlx::query_as(&format!(
            "SELECT order_uid, {DELIVERY_COLUMNS} FROM delivery WHERE order_uid = ANY($1)"
        ))
        .bind(&uids)
        .fetch_all(&mut *conn)
        .await?;

        let payments: Vec<PaymentRow> = sqlx::query_as(&format!(
            "SELECT order_uid, {PAYMENT_COLUMNS} FROM payment WHERE order_uid = ANY($1)"
        ))
        .bind(&uids)
        .fetch_all(&mut *conn)
        .await?;

        let items: Vec<ItemRow> = sqlx::query_as(&format!(
            "SELECT order_uid, {ITEM_COLUMNS} FROM items WHERE order_uid = ANY($1) ORDER BY order_uid, id"
        ))
        .bind(&uids)
        .fetch_all(&mut *conn)
        .await?;

        Ok(OrderPage {
            orders: assemble_orders(heads, deliveries, payments, items),
            next_cursor,
        })
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create(&self, order: &Order) -> Result<(), StoreError> {
        self.within_deadline(self.insert_order(order)).await
    }

    async fn fetch(&self, order_uid: &str) -> Result<Option<Order>, StoreError> {
        self.within_deadline(self.load_order(order_uid)).await
    }

    async fn fetch_page(&self, after: Option<&str>, limit: usize) -> Result<OrderPage, StoreError> {
        self.within_deadline(self.load_page(after, limit)).await
    }
}

async fn insert_rows(tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO orders (order_uid, track_number, entry, locale, internal_signature, \
         customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(&order.order_uid)
    .bind(&order.track_number)
    .bind(&order.entry)
    .bind(&order.locale)
    .bind(&order.internal_signature)
    .bind(&order.customer_id)
    .bind(&order.delivery_service)
    .bind(&order.shardkey)
    .bind(order.sm_id)
    .bind(order.date_created)
    .bind(&order.oof_shard)
    .execute(&mut **tx)
    .await?;

    let delivery = &order.delivery;
    sqlx::query(
        "INSERT INTO delivery (order_uid, name, phone, zip, city, address, region, email) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(&order.order_uid)
    .bind(&delivery.name)
    .bind(&delivery.phone)
    .bind(&delivery.zip)
    .bind(&delivery.city)
    .bind(&delivery.address)
    .bind(&delivery.region)
    .bind(&delivery.email)
    .execute(&mut **tx)
    .await?;

    let payment = &order.payment;
    sqlx::query(
        "INSERT INTO payment (order_uid, transaction, request_id, currency, provider, amount, \
         payment_dt, bank, delivery_cost, goods_total, custom_fee) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(&order.order_uid)
    .bind(&payment.transaction)
    .bind(&payment.request_id)
    .bind(&payment.currency)
    .bind(&payment.provider)
    .bind(payment.amount)
    .bind(payment.payment_dt)
    .bind(&payment.bank)
    .bind(payment.delivery_cost)
    .bind(payment.goods_total)
    .bind(payment.custom_fee)
    .execute(&mut **tx)
    .await?;

    for item in &order.items {
        sqlx::query(
            "INSERT INTO items (order_uid, chrt_id, track_number, price, rid, name, sale, size, \
             total_price, nm_id, brand, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&order.order_uid)
        .bind(item.chrt_id)
        .bind(&item.track_number)
        .bind(item.price)
        .bind(&item.rid)
        .bind(&item.name)
        .bind(item.sale)
        .bind(&item.size)
        .bind(item.total_price)
        .bind(item.nm_id)
        .bind(&item.brand)
        .bind(item.status)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

fn classify_write_error(err: sqlx::Error, order_uid: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StoreError::Duplicate(order_uid.to_string())
        }
        _ => StoreError::Database(err),
    }
}

fn incomplete(order_uid: &str, missing: &'static str) -> StoreError {
    StoreError::Incomplete {
        order_uid: order_uid.to_string(),
        missing,
    }
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(sqlx::FromRow, Debug, Clone)]
struct OrderRow {
    order_uid: String,
    track_number: String,
    entry: String,
    locale: String,
    internal_signature: String,
    customer_id: String,
    delivery_service: String,
    shardkey: String,
    sm_id: i64,
    date_created: DateTime<Utc>,
    oof_shard: String,
}

impl OrderRow {
    fn into_order(self, delivery: Delivery, payment: Payment, items: Vec<Item>) -> Order {
        Order {
            order_uid: self.order_uid,
            track_number: self.track_number,
            entry: self.entry,
            delivery,
            payment,
            items,
            locale: self.locale,
            internal_signature: self.internal_signature,
            customer_id: self.customer_id,
            delivery_service: self.delivery_service,
            shardkey: self.shardkey,
            sm_id: self.sm_id,
            date_created: self.date_created,
            oof_shard: self.oof_shard,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    order_uid: String,
    #[sqlx(flatten)]
    delivery: Delivery,
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    order_uid: String,
    #[sqlx(flatten)]
    payment: Payment,
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    order_uid: String,
    #[sqlx(flatten)]
    item: Item,
}

/// Join one page of bulk-loaded rows into aggregates. Orders missing their delivery
/// or payment row are logged and left out rather than returned half-built.
fn assemble_orders(
    heads: Vec<OrderRow>,
    deliveries: Vec<DeliveryRow>,
    payments: Vec<PaymentRow>,
    items: Vec<ItemRow>,
) -> Vec<Order> {
    let mut deliveries: HashMap<String, Delivery> = deliveries
        .into_iter()
        .map(|row| (row.order_uid, row.delivery))
        .collect();

    let mut payments: HashMap<String, Payment> = payments
        .into_iter()
        .map(|row| (row.order_uid, row.payment))
        .collect();

    // rows arrive ordered by (order_uid, id), so push order is insertion order
    let mut items_by_order: HashMap<String, Vec<Item>> = HashMap::new();
    for row in items {
        items_by_order.entry(row.order_uid).or_default().push(row.item);
    }

    let mut orders = Vec::with_capacity(heads.len());

    for head in heads {
        let uid = head.order_uid.clone();

        let Some(delivery) = deliveries.remove(&uid) else {
            tracing::error!(error = %incomplete(&uid, "delivery"), "Skipping incomplete order");
            continue;
        };

        let Some(payment) = payments.remove(&uid) else {
            tracing::error!(error = %incomplete(&uid, "payment"), "Skipping incomplete order");
            continue;
        };

        let items = items_by_order.remove(&uid).unwrap_or_default();
        orders.push(head.into_order(delivery, payment, items));
    }

    orders
}

// ============================================================================
// Unit Tests
// ============================================================================
//
// Queries themselves need a live PostgreSQL; these cover the pure parts.
//
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_order;

    fn split(order: &Order) -> (OrderRow, DeliveryRow, PaymentRow, Vec<ItemRow>) {
        let head = OrderRow {
            order_uid: order.order_uid.clone(),
            track_number: order.track_number.clone(),
            entry: order.entry.clone(),
            locale: order.locale.clone(),
            internal_signature: order.internal_signature.clone(),
            customer_id: order.customer_id.clone(),
            delivery_service: order.delivery_service.clone(),
            shardkey: order.shardkey.clone(),
            sm_id: order.sm_id,
            date_created: order.date_created,
            oof_shard: order.oof_shard.clone(),
        };
        let delivery = DeliveryRow {
            order_uid: order.order_uid.clone(),
            delivery: order.delivery.clone(),
        };
        let payment = PaymentRow {
            order_uid: order.order_uid.clone(),
            payment: order.payment.clone(),
        };
        let items = order
            .items
            .iter()
            .map(|item| ItemRow {
                order_uid: order.order_uid.clone(),
                item: item.clone(),
            })
            .collect();
        (head, delivery, payment, items)
    }

    #[test]
    fn test_assemble_round_trips_aggregate() {
        let mut order = sample_order("assembled");
        let mut second = order.items[0].clone();
        second.chrt_id = 42;
        order.items.push(second);

        let (head, delivery, payment, items) = split(&order);
        let orders = assemble_orders(vec![head], vec![delivery], vec![payment], items);

        assert_eq!(orders, vec![order]);
    }

    #[test]
    fn test_assemble_keeps_orders_apart() {
        let a = sample_order("order-a");
        let b = sample_order("order-b");
        let (ha, da, pa, ia) = split(&a);
        let (hb, db, pb, ib) = split(&b);

        let items = ia.into_iter().chain(ib).collect();
        let orders = assemble_orders(vec![ha, hb], vec![db, da], vec![pb, pa], items);

        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0], a);
        assert_eq!(orders[1], b);
    }

    #[test]
    fn test_assemble_skips_order_without_payment() {
        let complete = sample_order("complete");
        let broken = sample_order("broken");
        let (hc, dc, pc, ic) = split(&complete);
        let (hb, db, _missing_payment, ib) = split(&broken);

        let items = ic.into_iter().chain(ib).collect();
        let orders = assemble_orders(vec![hb, hc], vec![dc, db], vec![pc], items);

        assert_eq!(orders, vec![complete]);
    }

    #[test]
    fn test_incomplete_error_names_missing_record() {
        let err = incomplete("abc", "delivery");
        assert_eq!(err.to_string(), "order abc is missing its delivery record");
    }

    // ------------------------------------------------------------------------
    // Deadline
    // ------------------------------------------------------------------------

    fn lazy_store(operation_timeout: Duration) -> PgOrderStore {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://orders@127.0.0.1:1/orders")
            .unwrap();
        PgOrderStore::new(pool, operation_timeout)
    }

    #[tokio::test]
    async fn test_operation_past_deadline_times_out() {
        let store = lazy_store(Duration::from_millis(20));

        let result = store
            .within_deadline(async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<_, StoreError>(())
            })
            .await;

        assert!(matches!(result, Err(StoreError::Timeout(d)) if d == Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_operation_within_deadline_passes_result_through() {
        let store = lazy_store(Duration::from_millis(200));

        let result = store.within_deadline(async { Ok::<_, StoreError>(7) }).await;

        assert_eq!(result.unwrap(), 7);
    }

    // ------------------------------------------------------------------------
    // Live database (run with DATABASE_URL set and `--ignored`)
    // ------------------------------------------------------------------------

    async fn live_store() -> PgOrderStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a scratch database");
        let store = PgOrderStore::connect(&url, 2, DEFAULT_OPERATION_TIMEOUT).await.unwrap();
        sqlx::raw_sql(include_str!("../../migrations/0001_orders.sql"))
            .execute(store.pool())
            .await
            .unwrap();
        store
    }

    fn unique_uid(tag: &str) -> String {
        format!("it-{tag}-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn test_live_create_fetch_and_duplicate() {
        let store = live_store().await;
        let mut order = sample_order(&unique_uid("dup"));
        let mut second = order.items[0].clone();
        second.chrt_id = 1;
        order.items.push(second);

        store.create(&order).await.unwrap();
        assert_eq!(store.fetch(&order.order_uid).await.unwrap(), Some(order.clone()));

        let err = store.create(&order).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(ref uid) if *uid == order.order_uid));
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn test_live_failed_item_insert_rolls_back_whole_order() {
        let store = live_store().await;
        let mut order = sample_order(&unique_uid("rollback"));
        // PostgreSQL rejects NUL in text, after orders/delivery/payment rows
        // are already written in this transaction
        order.items[0].name = "bad\0name".into();

        let err = store.create(&order).await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));

        assert_eq!(store.fetch(&order.order_uid).await.unwrap(), None);
        let (delivery_rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM delivery WHERE order_uid = $1")
            .bind(&order.order_uid)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(delivery_rows, 0);
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn test_live_fetch_page_follows_cursor() {
        let store = live_store().await;
        let prefix = unique_uid("page");
        let uids: Vec<String> = (1..=3).map(|i| format!("{prefix}-{i}")).collect();
        for uid in &uids {
            store.create(&sample_order(uid)).await.unwrap();
        }

        let page = store.fetch_page(Some(&prefix), 2).await.unwrap();
        let got: Vec<&str> = page.orders.iter().map(|o| o.order_uid.as_str()).collect();
        assert_eq!(got, vec![uids[0].as_str(), uids[1].as_str()]);
        assert_eq!(page.next_cursor.as_deref(), Some(uids[1].as_str()));

        let page = store.fetch_page(page.next_cursor.as_deref(), 2).await.unwrap();
        assert_eq!(page.orders[0].order_uid, uids[2]);
    }
}
