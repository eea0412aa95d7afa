use crate::config::AppConfig;
use crate::processor::ingestion::IngestionService;
use crate::processor::message_processor;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Consumes tracker location reports with SASL authentication and a circuit
/// breaker on broker errors.
pub async fn start_kafka_consumer(config: &AppConfig, ingestion: Arc<IngestionService>) -> anyhow::Result<()> {
    info!("Initializing Kafka consumer for topic: {}", config.kafka_topic);

    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_bootstrap_servers)
        .set("group.id", &config.kafka_group_id)
        .set("auto.offset.reset", &config.kafka_auto_offset_reset)
        .set("security.protocol", &config.kafka_security_protocol)
        .set("sasl.mechanism", &config.kafka_sasl_mechanism)
        .set("sasl.username", &config.kafka_username)
        .set("sasl.password", &config.kafka_password);

    let consumer: StreamConsumer = client_config.create()?;

    consumer.subscribe(&[&config.kafka_topic])?;
    info!("Subscribed to topic: {}", config.kafka_topic);

    let mut consecutive_failures = 0;
    let max_retries = config.kafka_max_retries;
    let cooldown_duration = Duration::from_secs(config.kafka_circuit_breaker_cooldown);

    loop {
        if consecutive_failures >= max_retries {
            warn!(
                "Circuit breaker tripped ({} consecutive failures)! Sleeping for {} seconds...",
                consecutive_failures, config.kafka_circuit_breaker_cooldown
            );
            tokio::time::sleep(cooldown_duration).await;
            consecutive_failures = 0;
            info!("Circuit breaker reset. Resuming consumption.");
        }

        match consumer.recv().await {
            Ok(m) => {
                consecutive_failures = 0;

                let Some(payload) = m.payload() else {
                    warn!("Received empty payload from Kafka");
                    continue;
                };

                // Handled inline: per-device ordering follows partition order, which
                // the staleness check depends on.
                if let Err(e) = message_processor::process_message(&ingestion, payload).await {
                    error!(
                        partition = m.partition(),
                        offset = m.offset(),
                        "Error processing location report: {}",
                        e
                    );
                }
            }
            Err(e) => {
                error!(
                    "Kafka error: {}. Incrementing failure count ({} / {})",
                    e,
                    consecutive_failures + 1,
                    max_retries
                );
                consecutive_failures += 1;
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
}
