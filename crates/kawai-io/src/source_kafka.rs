//! Kafka consumer construction.
//!
//! One `StreamConsumer` per topic. Recognized options map to their
//! librdkafka names; everything in `properties` is forwarded verbatim
//! and may override the defaults set here.

use kawai_core::EngineOptions;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::ClientConfig;

pub fn build_consumer(options: &EngineOptions, topic: &str) -> Result<StreamConsumer, KafkaError> {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", &options.bootstrap_servers)
        .set("group.id", &options.group_id)
        .set("enable.partition.eof", "false")
        .set("session.timeout.ms", "6000")
        .set("enable.auto.commit", "true")
        // A query tool wants the whole topic, not just the tail.
        .set("auto.offset.reset", "earliest");
    for (key, value) in &options.properties {
        config.set(key, value);
    }

    let consumer: StreamConsumer = config.create()?;
    consumer.subscribe(&[topic])?;
    Ok(consumer)
}
