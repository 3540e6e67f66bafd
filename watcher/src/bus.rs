use plate_watch_common::config::KafkaConfig;
use rdkafka::error::KafkaError;
use rdkafka::producer::{BaseProducer, BaseRecord, Producer};
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Destination for every recognition result, valid or not.
pub trait PlateBus {
    /// Hand `text` to the bus. Returning `Ok` only means the message was
    /// queued; delivery is not awaited.
    fn publish(&mut self, text: &str) -> Result<(), BusError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to create Kafka producer: {0}")]
    Create(KafkaError),
    #[error("Kafka brokers {0} unreachable: {1}")]
    Connect(String, KafkaError),
    #[error("failed to publish to {0}: {1}")]
    Publish(String, KafkaError),
}

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Synchronous Kafka producer publishing raw recognized text to one topic.
pub struct KafkaBus {
    producer: BaseProducer,
    topic: String,
}

impl KafkaBus {
    /// Create the producer and make sure the brokers answer a metadata
    /// request before the capture loop starts.
    pub fn connect(config: &KafkaConfig) -> Result<Self, BusError> {
        let producer: BaseProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("message.max.bytes", "1048576")
            .set("queue.buffering.max.messages", "1000")
            .set("request.timeout.ms", "5000")
            .create()
            .map_err(BusError::Create)?;

        producer
            .client()
            .fetch_metadata(
                Some(&config.topic),
                Duration::from_millis(config.connect_timeout_ms),
            )
            .map_err(|e| BusError::Connect(config.brokers.clone(), e))?;

        info!(
            brokers = config.brokers,
            topic = config.topic,
            "connected to Kafka"
        );
        Ok(Self {
            producer,
            topic: config.topic.clone(),
        })
    }

    /// Flush queued messages and drop the connection.
    pub fn disconnect(self) {
        match self.producer.flush(FLUSH_TIMEOUT) {
            Ok(()) => info!(topic = self.topic, "Kafka producer flushed"),
            Err(e) => warn!(error = %e, topic = self.topic, "failed to flush Kafka producer"),
        }
    }
}

impl PlateBus for KafkaBus {
    fn publish(&mut self, text: &str) -> Result<(), BusError> {
        let record = BaseRecord::<(), str>::to(&self.topic).payload(text);
        let result = self
            .producer
            .send(record)
            .map_err(|(e, _)| BusError::Publish(self.topic.clone(), e));
        // Serve delivery callbacks without blocking.
        self.producer.poll(Duration::ZERO);
        if result.is_ok() {
            debug!(topic = self.topic, bytes = text.len(), "queued recognition");
        }
        result
    }
}
