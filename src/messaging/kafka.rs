use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::Message;
use std::time::Duration;
use tokio::sync::watch;

use super::pipeline::{shutdown_requested, IngestError, IngestPipeline};
use crate::config::KafkaConfig;

// ============================================================================
// Kafka Order Consumer
// ============================================================================
//
// Reads order payloads from the configured topic and hands them to the ingest
// pipeline. Offsets are auto-committed by librdkafka; redelivery and
// rebalancing are left to the client library.
//
// ============================================================================

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct OrderConsumer {
    consumer: StreamConsumer,
    topic: String,
}

impl OrderConsumer {
    pub fn new(config: &KafkaConfig) -> KafkaResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .create()?;

        consumer.subscribe(&[config.topic.as_str()])?;

        tracing::info!(
            brokers = %config.brokers,
            topic = %config.topic,
            group_id = %config.group_id,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }

    /// Consume until `shutdown` flips or the pipeline closes. Shutdown wins
    /// over a ready message and interrupts a submit blocked on a full queue.
    /// The pipeline handle is dropped on return.
    pub async fn run(self, pipeline: IngestPipeline, mut shutdown: watch::Receiver<bool>) {
        loop {
            let (payload, partition, offset) = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                received = self.consumer.recv() => match received {
                    Ok(message) => (
                        message.payload().map(|p| p.to_vec()),
                        message.partition(),
                        message.offset(),
                    ),
                    Err(e) => {
                        tracing::warn!(topic = %self.topic, error = %e, "Kafka receive error");
                        tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                        continue;
                    }
                },
            };

            let Some(payload) = payload else {
                tracing::warn!(partition = partition, offset = offset, "Skipping message without payload");
                continue;
            };

            match pipeline.submit_or_shutdown(&payload, &mut shutdown).await {
                Ok(()) => {}
                Err(IngestError::Invalid(e)) => {
                    tracing::warn!(
                        partition = partition,
                        offset = offset,
                        error = %e,
                        "Skipping invalid order message"
                    );
                }
                Err(IngestError::QueueClosed) => {
                    tracing::error!("Ingest queue closed, stopping consumer");
                    break;
                }
                Err(IngestError::ShuttingDown) => {
                    tracing::warn!(
                        partition = partition,
                        offset = offset,
                        "Shutdown while waiting for queue capacity, message dropped"
                    );
                    break;
                }
            }
        }

        tracing::info!(topic = %self.topic, "Kafka consumer stopped");
    }
}
