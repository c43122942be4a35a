use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::errors::{ServiceError, StoreError, ValidationError};
use crate::metrics::Metrics;
use crate::models::Order;
use crate::service::OrderService;
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};

// ============================================================================
// Ingest Pipeline - message-to-call adapter with a bounded work queue
// ============================================================================
//
//   consumer --submit_or_shutdown()--> [ bounded mpsc queue ] --> worker 1..N --> create()
//
// - Submitting decodes and validates first; invalid payloads never reach the
//   queue.
// - Submitting waits for queue capacity. A slow store therefore stalls the
//   consumer loop instead of growing an in-memory buffer.
// - Workers retry transient store failures; duplicates are logged and
//   dropped (orders are created exactly once, there is no update path).
// - Dropping every `IngestPipeline` handle closes the queue; workers drain
//   what is left and exit.
// - Flipping the shutdown signal stops everything promptly instead: a
//   waiting `submit_or_shutdown` returns, in-flight creates (and their
//   retries) are dropped, which rolls back any open transaction, and orders
//   still queued are logged and counted as abandoned.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub queue_capacity: usize,
    pub workers: usize,
    pub retry: RetryConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            workers: 4,
            retry: RetryConfig::for_ingest(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("ingest queue is closed")]
    QueueClosed,

    #[error("ingest is shutting down")]
    ShuttingDown,
}

#[derive(Clone)]
pub struct IngestPipeline {
    tx: mpsc::Sender<Order>,
    metrics: Arc<Metrics>,
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

/// Spawn the workers and return the submitting half of the queue.
pub fn start_workers(
    service: Arc<OrderService>,
    config: IngestConfig,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
) -> (IngestPipeline, WorkerPool) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let rx = Arc::new(Mutex::new(rx));

    let handles = (0..config.workers.max(1))
        .map(|worker_id| {
            tokio::spawn(run_worker(
                worker_id,
                rx.clone(),
                service.clone(),
                config.retry.clone(),
                metrics.clone(),
                shutdown.clone(),
            ))
        })
        .collect();

    tracing::info!(
        workers = config.workers.max(1),
        queue_capacity = config.queue_capacity.max(1),
        "Ingest workers started"
    );

    (IngestPipeline { tx, metrics }, WorkerPool { handles })
}

impl IngestPipeline {
    /// Decode, validate and queue one payload. Waits for queue capacity
    /// until `shutdown` flips.
    pub async fn submit_or_shutdown(
        &self,
        payload: &[u8],
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), IngestError> {
        let order = self.decode(payload)?;

        tokio::select! {
            biased;
            _ = shutdown_requested(shutdown) => Err(IngestError::ShuttingDown),
            queued = self.enqueue(order) => queued,
        }
    }

    fn decode(&self, payload: &[u8]) -> Result<Order, IngestError> {
        Order::from_payload(payload).map_err(|e| {
            self.metrics.record_ingest("invalid");
            e.into()
        })
    }

    async fn enqueue(&self, order: Order) -> Result<(), IngestError> {
        let order_uid = order.order_uid.clone();

        // reserve first: the gauge goes up before a worker can take the order,
        // and a cancelled wait leaves it untouched
        let permit = self.tx.reserve().await.map_err(|_| IngestError::QueueClosed)?;
        self.metrics.ingest_queue_depth.inc();
        permit.send(order);

        tracing::debug!(order_uid = %order_uid, "Order queued for ingestion");
        Ok(())
    }
}

/// Resolves once the signal reads `true`. A dropped sender never resolves.
pub(super) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let sender_gone = shutdown.wait_for(|stop| *stop).await.is_err();
    if sender_gone {
        std::future::pending::<()>().await;
    }
}

impl WorkerPool {
    /// Wait for every worker to finish. Returns once the queue is closed and
    /// drained, or once shutdown is signalled and the leftovers abandoned.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Ingest worker panicked");
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Order>>>,
    service: Arc<OrderService>,
    retry: RetryConfig,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        // lock only while waiting; processing happens outside
        let next = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            next = async { rx.lock().await.recv().await } => next,
        };
        let Some(order) = next else {
            tracing::debug!(worker_id = worker_id, "Ingest worker stopped");
            return;
        };
        metrics.ingest_queue_depth.dec();

        let outcome = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => {
                abandon(&order, &metrics);
                break;
            }
            outcome = process_order(&service, &order, &retry) => outcome,
        };
        metrics.record_ingest(outcome);
    }

    // shutdown: whatever is still queued will not be written
    loop {
        let next = rx.lock().await.try_recv();
        let Ok(order) = next else {
            break;
        };
        metrics.ingest_queue_depth.dec();
        abandon(&order, &metrics);
    }

    tracing::debug!(worker_id = worker_id, "Ingest worker stopped on shutdown");
}

fn abandon(order: &Order, metrics: &Metrics) {
    tracing::warn!(order_uid = %order.order_uid, "Order abandoned at shutdown");
    metrics.record_ingest("abandoned");
}

async fn process_order(service: &OrderService, order: &Order, retry: &RetryConfig) -> &'static str {
    let result = retry_on_transient("create_order", retry, move |_attempt| service.create(order)).await;

    match result {
        RetryResult::Success(()) => "stored",
        RetryResult::PermanentFailure(ServiceError::Store(StoreError::Duplicate(uid))) => {
            tracing::warn!(order_uid = %uid, "Duplicate order ignored");
            "duplicate"
        }
        RetryResult::Failed(e) | RetryResult::PermanentFailure(e) => {
            tracing::error!(
                order_uid = %order.order_uid,
                error = %e,
                "Failed to store ingested order"
            );
            "failed"
        }
    }
}
