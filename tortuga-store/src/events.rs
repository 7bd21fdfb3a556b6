use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde::Serialize;
use std::time::Duration;
use tortuga_core::notify::{NotifyError, TicketNotifier};
use tortuga_shared::models::events::{
    AgencyDeadlineLapsedEvent, AgencyPaymentReceivedEvent, TicketIssuedEvent,
};
use tracing::{error, info};

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!(
                    "Sent message to {}/{}: partition {} offset {}",
                    topic, key, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a T,
}

/// Publishes ticket and agency notifications to a topic consumed by the mailer.
#[derive(Clone)]
pub struct KafkaNotifier {
    producer: EventProducer,
    topic: String,
}

impl KafkaNotifier {
    pub fn new(producer: EventProducer, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }

    async fn send<T: Serialize + Sync>(&self, kind: &str, key: &str, data: &T) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(&Envelope { kind, data })
            .map_err(|e| NotifyError(e.to_string()))?;
        self.producer
            .publish(&self.topic, key, &payload)
            .await
            .map_err(|e| NotifyError(e.to_string()))
    }
}

#[async_trait]
impl TicketNotifier for KafkaNotifier {
    async fn ticket_issued(&self, event: &TicketIssuedEvent) -> Result<(), NotifyError> {
        self.send("ticket_issued", &event.reservation_id.to_string(), event)
            .await
    }

    async fn agency_payment_received(&self, event: &AgencyPaymentReceivedEvent) -> Result<(), NotifyError> {
        self.send("agency_payment_received", &event.reservation_id.to_string(), event)
            .await
    }

    async fn agency_deadline_lapsed(&self, event: &AgencyDeadlineLapsedEvent) -> Result<(), NotifyError> {
        self.send("agency_deadline_lapsed", &event.reservation_id.to_string(), event)
            .await
    }
}
