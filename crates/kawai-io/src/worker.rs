//! Per-topic ingest.
//!
//! Each topic gets one worker task that consumes records in offset
//! order and drives resolve → decode → shape → insert against that
//! topic's table. Decode and shape failures skip the record and bump a
//! counter; sink failures stop the worker and mark the topic degraded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use duckdb::Connection;
use kawai_core::{BadSchema, Column, Role, SchemaFamily, SinkError};
use kawai_tx::decode::{decode_body, decode_primitive, split_envelope};
use kawai_tx::shape::shape_row;
use kawai_tx::{to_column, Datum, ResolvedSchema};
use rdkafka::consumer::StreamConsumer;
use rdkafka::Message;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::resolver::SchemaResolver;
use crate::sink_duckdb::TopicTable;

/// Shared, externally visible state of one topic's ingest.
#[derive(Default)]
pub struct TopicState {
    degraded: AtomicBool,
    decode_errors: AtomicU64,
    offsets: Mutex<HashMap<i32, i64>>,
}

impl TopicState {
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub fn mark_degraded(&self) {
        self.degraded.store(true, Ordering::Release);
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    pub fn count_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// The latest processed offset per partition.
    pub fn offsets(&self) -> HashMap<i32, i64> {
        self.offsets.lock().expect("offset map poisoned").clone()
    }

    pub fn record_progress(&self, partition: i32, offset: i64) {
        let mut offsets = self.offsets.lock().expect("offset map poisoned");
        offsets.insert(partition, offset);
    }
}

/// A worker-fatal ingest failure; the topic is degraded afterwards.
#[derive(Debug, thiserror::Error)]
pub enum IngestFatal {
    #[error(transparent)]
    Schema(#[from] BadSchema),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// The lazily created, immutable binding between a topic and its table.
struct TopicBinding {
    key_schema: Arc<ResolvedSchema>,
    value_schema: Arc<ResolvedSchema>,
    key_column: Column,
    value_column: Column,
    table: TopicTable,
}

/// The record-processing core of one worker, separated from the Kafka
/// consumption loop so it can be driven directly with raw payloads.
pub struct IngestPipeline {
    topic: String,
    conn: Connection,
    resolver: Arc<SchemaResolver>,
    state: Arc<TopicState>,
    binding: Option<TopicBinding>,
}

impl IngestPipeline {
    pub fn new(
        topic: impl Into<String>,
        conn: Connection,
        resolver: Arc<SchemaResolver>,
        state: Arc<TopicState>,
    ) -> IngestPipeline {
        IngestPipeline {
            topic: topic.into(),
            conn,
            resolver,
            state,
            binding: None,
        }
    }

    pub fn state(&self) -> &Arc<TopicState> {
        &self.state
    }

    /// Process one record. Returns whether a row was inserted; decode
    /// and shape problems are absorbed here (logged and counted), sink
    /// and schema problems are fatal to the worker.
    pub async fn handle_record(
        &mut self,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
    ) -> Result<bool, IngestFatal> {
        self.ensure_binding().await?;
        let binding = self.binding.as_ref().expect("binding just ensured");

        let key_datum = match key {
            None | Some([]) => Datum::Null,
            Some(bytes) => {
                match decode_role(&binding.key_schema, bytes, &self.resolver).await {
                    Ok(datum) => datum,
                    Err(error) => {
                        warn!(topic = %self.topic, %error, "key decode failed, skipping record");
                        self.state.count_decode_error();
                        return Ok(false);
                    }
                }
            }
        };

        let value_datum = match value {
            None => Datum::Null,
            Some(bytes) => {
                match decode_role(&binding.value_schema, bytes, &self.resolver).await {
                    Ok(datum) => datum,
                    Err(error) => {
                        warn!(topic = %self.topic, %error, "value decode failed, skipping record");
                        self.state.count_decode_error();
                        return Ok(false);
                    }
                }
            }
        };

        let row = match shape_row(
            &key_datum,
            &binding.key_column,
            &value_datum,
            &binding.value_column,
        ) {
            Ok(row) => row,
            Err(error) => {
                warn!(topic = %self.topic, %error, "row shaping failed, skipping record");
                self.state.count_decode_error();
                return Ok(false);
            }
        };

        binding.table.insert(&self.conn, &row)?;
        Ok(true)
    }

    /// Resolve schemas, translate columns, and create the table on the
    /// topic's first record. The binding is immutable afterwards.
    async fn ensure_binding(&mut self) -> Result<(), IngestFatal> {
        if self.binding.is_some() {
            return Ok(());
        }
        let key_schema = self.resolver.resolve(&self.topic, Role::Key).await;
        let value_schema = self.resolver.resolve(&self.topic, Role::Value).await;

        // Keys may be absent regardless of what their schema says.
        let key_column = to_column(&key_schema, true)?.nullable();
        let value_column = to_column(&value_schema, false)?;
        let table = TopicTable::create(&self.conn, &self.topic, &key_column, &value_column)?;

        self.binding = Some(TopicBinding {
            key_schema,
            value_schema,
            key_column,
            value_column,
            table,
        });
        Ok(())
    }
}

/// Decode one role's payload against its resolved binding.
async fn decode_role(
    resolved: &Arc<ResolvedSchema>,
    payload: &[u8],
    resolver: &SchemaResolver,
) -> Result<Datum, kawai_core::DecodeError> {
    match resolved.as_ref() {
        ResolvedSchema::Primitive(serde) => decode_primitive(*serde, payload),
        ResolvedSchema::Parsed { id, schema } => {
            let envelope = split_envelope(payload)?;
            // Avro decodes against the writer's schema; fetch it when the
            // payload names a different registration than the binding.
            if schema.family() == SchemaFamily::Avro && envelope.schema_id != *id {
                if let Some(writer) = resolver.schema_for_id(envelope.schema_id).await {
                    return decode_body(&writer, envelope.body);
                }
            }
            decode_body(schema, envelope.body)
        }
    }
}

/// Consume a topic until cancelled or a fatal failure degrades it.
pub async fn run_worker(
    mut pipeline: IngestPipeline,
    consumer: Arc<StreamConsumer>,
    cancel: CancellationToken,
) {
    let topic = pipeline.topic.clone();
    info!(topic = %topic, "ingest worker started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = consumer.recv() => match received {
                Err(error) => {
                    warn!(topic = %topic, %error, "consumer error");
                }
                Ok(message) => {
                    let partition = message.partition();
                    let offset = message.offset();
                    match pipeline.handle_record(message.key(), message.payload()).await {
                        Ok(_) => pipeline.state.record_progress(partition, offset),
                        Err(error) => {
                            error!(topic = %topic, %error, "ingest failed, topic degraded");
                            pipeline.state.mark_degraded();
                            break;
                        }
                    }
                }
            }
        }
    }
    info!(topic = %topic, "ingest worker stopped");
}
