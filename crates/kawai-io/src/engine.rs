//! Engine facade and process-wide lifecycle.
//!
//! One `Engine` owns the DuckDB handle, the schema resolver, and a
//! worker per declared topic. Its state machine is strict:
//! `Uninitialized → Configured → Running → Closed`, and every long-lived
//! resource is an explicit field of the running state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use duckdb::Connection;
use kawai_core::{ConfigError, EngineOptions, LifecycleError};
use rdkafka::consumer::{Consumer, StreamConsumer};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::mock_reset;
use crate::resolver::SchemaResolver;
use crate::worker::{run_worker, IngestPipeline, TopicState};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("analytic engine: {0}")]
    Db(String),
    #[error("log source: {0}")]
    Source(String),
    #[error("query failed: {0}")]
    Query(String),
}

/// A point-in-time view of one topic's ingest.
#[derive(Debug, Clone, Serialize)]
pub struct TopicStatus {
    pub topic: String,
    pub degraded: bool,
    pub decode_errors: u64,
    /// Latest processed offset per partition.
    pub offsets: HashMap<i32, i64>,
}

struct WorkerHandle {
    topic: String,
    consumer: Arc<StreamConsumer>,
    state: Arc<TopicState>,
    join: JoinHandle<()>,
}

struct Running {
    conn: Connection,
    resolver: Arc<SchemaResolver>,
    workers: Vec<WorkerHandle>,
    cancel: CancellationToken,
    mock_scope: Option<String>,
}

enum State {
    Uninitialized,
    Configured(EngineOptions),
    Running(Running),
    Closed,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Uninitialized => "uninitialized",
            State::Configured(_) => "configured",
            State::Running(_) => "running",
            State::Closed => "closed",
        }
    }
}

pub struct Engine {
    state: Mutex<State>,
}

impl Engine {
    pub fn new() -> Engine {
        Engine {
            state: Mutex::new(State::Uninitialized),
        }
    }

    /// Install options. Permitted before `init()` and idempotent: a
    /// second call overwrites the first.
    pub async fn configure(&self, options: EngineOptions) -> Result<(), LifecycleError> {
        let mut state = self.state.lock().await;
        match &*state {
            State::Uninitialized | State::Configured(_) => {
                *state = State::Configured(options);
                Ok(())
            }
            other => Err(LifecycleError {
                op: "configure",
                expected: "uninitialized or configured",
                actual: other.name(),
            }),
        }
    }

    /// Open the analytic engine, build the resolver, and start one
    /// worker per declared topic. Fails if called twice.
    pub async fn init(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        let options = match &*state {
            State::Configured(options) => options.clone(),
            other => {
                return Err(LifecycleError {
                    op: "init",
                    expected: "configured",
                    actual: other.name(),
                }
                .into())
            }
        };
        options.validate()?;

        let conn = match options.db_path.as_deref() {
            None | Some(":memory:") => Connection::open_in_memory(),
            Some(path) => Connection::open(path),
        }
        .map_err(|e| EngineError::Db(e.to_string()))?;

        let mock_scope = options.mock_registry_scope().map(str::to_string);
        let resolver = Arc::new(SchemaResolver::new(options.clone()));
        let cancel = CancellationToken::new();

        let mut workers = Vec::with_capacity(options.topics.len());
        for topic in &options.topics {
            let consumer = Arc::new(
                crate::source_kafka::build_consumer(&options, topic)
                    .map_err(|e| EngineError::Source(e.to_string()))?,
            );
            let worker_conn = conn
                .try_clone()
                .map_err(|e| EngineError::Db(e.to_string()))?;
            let topic_state = Arc::new(TopicState::default());
            let pipeline = IngestPipeline::new(
                topic.clone(),
                worker_conn,
                Arc::clone(&resolver),
                Arc::clone(&topic_state),
            );
            let join = tokio::spawn(run_worker(
                pipeline,
                Arc::clone(&consumer),
                cancel.child_token(),
            ));
            workers.push(WorkerHandle {
                topic: topic.clone(),
                consumer,
                state: topic_state,
                join,
            });
        }

        info!(topics = workers.len(), "engine running");
        *state = State::Running(Running {
            conn,
            resolver,
            workers,
            cancel,
            mock_scope,
        });
        Ok(())
    }

    /// Block until every worker has caught up to the high-water marks
    /// observed at entry. Degraded topics and unreachable partitions are
    /// skipped so the barrier always terminates.
    pub async fn sync(&self) -> Result<(), EngineError> {
        let state = self.state.lock().await;
        let running = match &*state {
            State::Running(running) => running,
            other => {
                return Err(LifecycleError {
                    op: "sync",
                    expected: "running",
                    actual: other.name(),
                }
                .into())
            }
        };

        // Snapshot the high-water marks as of now.
        let mut targets: Vec<(usize, i32, i64)> = Vec::new();
        for (position, worker) in running.workers.iter().enumerate() {
            let consumer = Arc::clone(&worker.consumer);
            let topic = worker.topic.clone();
            let marks = tokio::task::spawn_blocking(move || watermarks(&consumer, &topic))
                .await
                .map_err(|e| EngineError::Source(e.to_string()))?;
            match marks {
                Ok(marks) => {
                    for (partition, low, high) in marks {
                        if high > low {
                            targets.push((position, partition, high));
                        }
                    }
                }
                Err(error) => {
                    warn!(topic = %worker.topic, %error, "watermarks unavailable, skipping topic in sync");
                }
            }
        }

        loop {
            let caught_up = targets.iter().all(|(position, partition, high)| {
                let worker = &running.workers[*position];
                worker.state.is_degraded()
                    || worker
                        .state
                        .offsets()
                        .get(partition)
                        .map(|offset| offset + 1 >= *high)
                        .unwrap_or(false)
            });
            if caught_up {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Run a read-only query against the ingested tables and return one
    /// JSON object per row.
    pub async fn query(&self, sql: &str) -> Result<Vec<serde_json::Value>, EngineError> {
        let state = self.state.lock().await;
        let running = match &*state {
            State::Running(running) => running,
            other => {
                return Err(LifecycleError {
                    op: "query",
                    expected: "running",
                    actual: other.name(),
                }
                .into())
            }
        };

        let mut statement = running
            .conn
            .prepare(sql)
            .map_err(|e| EngineError::Query(e.to_string()))?;
        let mut rows = statement
            .query([])
            .map_err(|e| EngineError::Query(e.to_string()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| EngineError::Query(e.to_string()))? {
            let statement = row.as_ref();
            let mut object = serde_json::Map::new();
            for index in 0..statement.column_count() {
                let name = statement
                    .column_name(index)
                    .map_err(|e| EngineError::Query(e.to_string()))?
                    .to_string();
                let value: duckdb::types::Value = row
                    .get(index)
                    .map_err(|e| EngineError::Query(e.to_string()))?;
                object.insert(name, db_value_to_json(value));
            }
            out.push(serde_json::Value::Object(object));
        }
        Ok(out)
    }

    /// Per-topic ingest status.
    pub async fn status(&self) -> Result<Vec<TopicStatus>, EngineError> {
        let state = self.state.lock().await;
        let running = match &*state {
            State::Running(running) => running,
            other => {
                return Err(LifecycleError {
                    op: "status",
                    expected: "running",
                    actual: other.name(),
                }
                .into())
            }
        };
        Ok(running
            .workers
            .iter()
            .map(|worker| TopicStatus {
                topic: worker.topic.clone(),
                degraded: worker.state.is_degraded(),
                decode_errors: worker.state.decode_errors(),
                offsets: worker.state.offsets(),
            })
            .collect())
    }

    /// Stop workers, drain them, and release every held resource.
    /// Individual teardown failures are logged, never propagated, and
    /// never stop the rest of the shutdown.
    pub async fn close(&self) -> Result<(), LifecycleError> {
        let mut state = self.state.lock().await;
        let running = match std::mem::replace(&mut *state, State::Closed) {
            State::Running(running) => running,
            other => {
                let error = LifecycleError {
                    op: "close",
                    expected: "running",
                    actual: other.name(),
                };
                *state = other;
                return Err(error);
            }
        };

        running.cancel.cancel();
        for worker in running.workers {
            if let Err(error) = worker.join.await {
                warn!(topic = %worker.topic, %error, "worker did not stop cleanly");
            }
            drop(worker.consumer);
        }
        drop(running.resolver);
        drop(running.conn);
        if let Some(scope) = running.mock_scope {
            mock_reset(&scope);
        }
        info!("engine closed");
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

fn watermarks(
    consumer: &StreamConsumer,
    topic: &str,
) -> Result<Vec<(i32, i64, i64)>, rdkafka::error::KafkaError> {
    let timeout = Duration::from_secs(5);
    let metadata = consumer.fetch_metadata(Some(topic), timeout)?;
    let mut out = Vec::new();
    for meta_topic in metadata.topics() {
        for partition in meta_topic.partitions() {
            let (low, high) = consumer.fetch_watermarks(topic, partition.id(), timeout)?;
            out.push((partition.id(), low, high));
        }
    }
    Ok(out)
}

fn db_value_to_json(value: duckdb::types::Value) -> serde_json::Value {
    use duckdb::types::Value;
    use serde_json::json;
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(v) => json!(v),
        Value::TinyInt(v) => json!(v),
        Value::SmallInt(v) => json!(v),
        Value::Int(v) => json!(v),
        Value::BigInt(v) => json!(v),
        Value::HugeInt(v) => json!(v.to_string()),
        Value::UTinyInt(v) => json!(v),
        Value::USmallInt(v) => json!(v),
        Value::UInt(v) => json!(v),
        Value::UBigInt(v) => json!(v),
        Value::Float(v) => json!(v),
        Value::Double(v) => json!(v),
        Value::Decimal(v) => json!(v.to_string()),
        Value::Text(v) => json!(v),
        Value::Blob(v) => json!(base64::encode(v)),
        Value::Date32(days) => {
            let date = chrono::NaiveDate::from_ymd_opt(1970, 1, 1)
                .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(i64::from(days))));
            match date {
                Some(date) => json!(date.format("%Y-%m-%d").to_string()),
                None => json!(days),
            }
        }
        Value::Timestamp(unit, raw) => {
            let micros = match unit {
                duckdb::types::TimeUnit::Second => raw.checked_mul(1_000_000),
                duckdb::types::TimeUnit::Millisecond => raw.checked_mul(1_000),
                duckdb::types::TimeUnit::Microsecond => Some(raw),
                duckdb::types::TimeUnit::Nanosecond => Some(raw / 1_000),
            };
            match micros.and_then(chrono::DateTime::from_timestamp_micros) {
                Some(ts) => json!(ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
                None => json!(raw),
            }
        }
        Value::List(items) | Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(db_value_to_json).collect())
        }
        Value::Enum(symbol) => json!(symbol),
        Value::Struct(fields) => {
            let mut object = serde_json::Map::new();
            for (name, field) in fields.iter() {
                object.insert(name.clone(), db_value_to_json(field.clone()));
            }
            serde_json::Value::Object(object)
        }
        Value::Map(entries) => {
            let mut object = serde_json::Map::new();
            for (key, entry) in entries.iter() {
                let key = match key {
                    Value::Text(text) => text.clone(),
                    other => format!("{other:?}"),
                };
                object.insert(key, db_value_to_json(entry.clone()));
            }
            serde_json::Value::Object(object)
        }
        Value::Union(inner) => db_value_to_json(*inner),
        other => json!(format!("{other:?}")),
    }
}

// ---- process-wide singleton ---------------------------------------------

static INSTANCE: StdMutex<Option<Arc<Engine>>> = StdMutex::new(None);

/// The process-wide engine, constructed lazily.
pub fn instance() -> Arc<Engine> {
    let mut instance = INSTANCE.lock().expect("engine singleton poisoned");
    instance
        .get_or_insert_with(|| Arc::new(Engine::new()))
        .clone()
}

/// Close and drop the process-wide engine. A later `instance()` call
/// starts from a fresh uninitialized engine.
pub async fn close_instance() -> Result<(), LifecycleError> {
    let taken = INSTANCE
        .lock()
        .expect("engine singleton poisoned")
        .take();
    match taken {
        Some(engine) => engine.close().await,
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> EngineOptions {
        let mut options = EngineOptions::default();
        options.bootstrap_servers = "localhost:19092".to_string();
        options.topics = vec!["lifecycle-topic".to_string()];
        options
            .key_serdes
            .insert("lifecycle-topic".to_string(), "binary".to_string());
        options
            .value_serdes
            .insert("lifecycle-topic".to_string(), "binary".to_string());
        options
    }

    #[tokio::test]
    async fn init_requires_configuration() {
        let engine = Engine::new();
        assert!(matches!(engine.init().await, Err(EngineError::Lifecycle(_))));
    }

    #[tokio::test]
    async fn sync_and_query_require_running() {
        let engine = Engine::new();
        assert!(matches!(engine.sync().await, Err(EngineError::Lifecycle(_))));
        assert!(matches!(
            engine.query("SELECT 1").await,
            Err(EngineError::Lifecycle(_))
        ));
    }

    #[tokio::test]
    async fn configure_is_idempotent_until_running() {
        let engine = Engine::new();
        engine.configure(options()).await.unwrap();
        engine.configure(options()).await.unwrap();
    }

    #[tokio::test]
    async fn missing_options_fail_at_init() {
        let engine = Engine::new();
        engine.configure(EngineOptions::default()).await.unwrap();
        assert!(matches!(engine.init().await, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn full_lifecycle_with_unreachable_broker() {
        // Consumer construction is lazy, so the lifecycle runs even
        // against a broker that is not there; the worker just idles.
        let engine = Engine::new();
        engine.configure(options()).await.unwrap();
        engine.init().await.unwrap();

        assert!(matches!(engine.init().await, Err(EngineError::Lifecycle(_))));

        let rows = engine.query("SELECT 41 + 1 AS answer").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["answer"], serde_json::json!(42));

        let status = engine.status().await.unwrap();
        assert_eq!(status.len(), 1);
        assert!(!status[0].degraded);

        engine.close().await.unwrap();
        assert!(matches!(engine.close().await, Err(LifecycleError { .. })));
    }

    #[tokio::test]
    async fn file_backed_database_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kawai.db");
        let mut file_options = options();
        file_options.db_path = Some(path.to_string_lossy().to_string());

        let engine = Engine::new();
        engine.configure(file_options).await.unwrap();
        engine.init().await.unwrap();
        engine.query("SELECT 1").await.unwrap();
        engine.close().await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn singleton_resets_after_close_instance() {
        let first = instance();
        first.configure(options()).await.unwrap();
        close_instance().await.ok();
        let second = instance();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
