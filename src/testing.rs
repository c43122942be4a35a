// ============================================================================
// Test Doubles
// ============================================================================
//
// In-memory stand-ins for the store and cache capabilities, with call
// counters and failure switches, plus a canonical order fixture.
//
// ============================================================================

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::cache::OrderCache;
use crate::errors::{CacheError, StoreError};
use crate::models::{Delivery, Item, Order, Payment};
use crate::store::{OrderPage, OrderStore};

pub fn sample_order(order_uid: &str) -> Order {
    Order {
        order_uid: order_uid.to_string(),
        track_number: "WBILMTESTTRACK".into(),
        entry: "WBIL".into(),
        delivery: Delivery {
            name: "Test Testov".into(),
            phone: "+9720000000".into(),
            zip: "2639809".into(),
            city: "Kiryat Mozkin".into(),
            address: "Ploshad Mira 15".into(),
            region: "Kraiot".into(),
            email: "test@gmail.com".into(),
        },
        payment: Payment {
            transaction: order_uid.to_string(),
            request_id: "".into(),
            currency: "USD".into(),
            provider: "wbpay".into(),
            amount: 1817,
            payment_dt: 1637907727,
            bank: "alpha".into(),
            delivery_cost: 1500,
            goods_total: 317,
            custom_fee: 0,
        },
        items: vec![Item {
            chrt_id: 9934930,
            track_number: "WBILMTESTTRACK".into(),
            price: 453,
            rid: "ab4219087a764ae0btest".into(),
            name: "Mascaras".into(),
            sale: 30,
            size: "0".into(),
            total_price: 317,
            nm_id: 2389212,
            brand: "Vivienne Sabo".into(),
            status: 202,
        }],
        locale: "en".into(),
        internal_signature: "".into(),
        customer_id: "test".into(),
        delivery_service: "meest".into(),
        shardkey: "9".into(),
        sm_id: 99,
        date_created: Utc.with_ymd_and_hms(2021, 11, 26, 6, 22, 19).unwrap(),
        oof_shard: "1".into(),
    }
}

fn simulated_outage() -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::IoError, "simulated outage"))
}

// ============================================================================
// InMemoryStore
// ============================================================================

#[derive(Default)]
pub struct InMemoryStore {
    orders: Mutex<Vec<Order>>,
    failing: AtomicBool,
    transient_failures: AtomicU32,
    fetch_calls: AtomicUsize,
    create_calls: AtomicUsize,
    page_calls: AtomicUsize,
    create_gate: Option<Arc<Semaphore>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `create` waits for a permit from `gate` before writing.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            create_gate: Some(gate),
            ..Self::default()
        }
    }

    /// Seed an order without going through `create`.
    pub fn insert(&self, order: Order) {
        self.orders.lock().unwrap().push(order);
    }

    pub fn contains(&self, order_uid: &str) -> bool {
        self.orders.lock().unwrap().iter().any(|o| o.order_uid == order_uid)
    }

    pub fn len(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The next `count` creates fail with a timeout.
    pub fn fail_next_creates(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn create(&self, order: &Order) -> Result<(), StoreError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.create_gate {
            gate.acquire().await.unwrap().forget();
        }

        self.check_available()?;

        let pending = self.transient_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_failures.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Timeout(Duration::from_secs(5)));
        }

        let mut orders = self.orders.lock().unwrap();
        if orders.iter().any(|o| o.order_uid == order.order_uid) {
            return Err(StoreError::Duplicate(order.order_uid.clone()));
        }
        orders.push(order.clone());
        Ok(())
    }

    async fn fetch(&self, order_uid: &str) -> Result<Option<Order>, StoreError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let orders = self.orders.lock().unwrap();
        Ok(orders.iter().find(|o| o.order_uid == order_uid).cloned())
    }

    async fn fetch_page(&self, after: Option<&str>, limit: usize) -> Result<OrderPage, StoreError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut orders: Vec<Order> = self
            .orders
            .lock()
            .unwrap()
            .iter()
            .filter(|o| after.map_or(true, |after| o.order_uid.as_str() > after))
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.order_uid.cmp(&b.order_uid));
        orders.truncate(limit);

        let next_cursor = match orders.last() {
            Some(last) if orders.len() >= limit => Some(last.order_uid.clone()),
            _ => None,
        };
        Ok(OrderPage { orders, next_cursor })
    }
}

// ============================================================================
// InMemoryCache
// ============================================================================

struct Entry {
    bytes: Vec<u8>,
    ttl: Duration,
    expires_at: Instant,
}

#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    failing: AtomicBool,
    failing_keys: Mutex<HashSet<String>>,
    set_calls: AtomicUsize,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make every operation on `key` fail while other keys keep working.
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }

    /// Stored bytes regardless of failure switches; `None` if absent or expired.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.bytes.clone())
    }

    pub fn put_raw(&self, key: &str, bytes: Vec<u8>) {
        let ttl = Duration::from_secs(3600);
        self.entries.lock().unwrap().insert(
            key.to_string(),
            Entry {
                bytes,
                ttl,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn last_ttl(&self, key: &str) -> Option<Duration> {
        self.entries.lock().unwrap().get(key).map(|e| e.ttl)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self, key: &str) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) || self.failing_keys.lock().unwrap().contains(key) {
            return Err(CacheError::Redis(simulated_outage()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check_available(key)?;
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available(key)?;

        self.entries.lock().unwrap().insert(
            key.to_string(),
            Entry {
                bytes: value.to_vec(),
                ttl,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check_available(key)?;
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}
