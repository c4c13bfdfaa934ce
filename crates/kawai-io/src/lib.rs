//! # kawai-io
//!
//! The runtime half of the kawai bridge: the schema registry client and
//! resolver cache, the DuckDB table manager, the per-topic Kafka ingest
//! workers, and the engine facade that owns their lifecycle.

#![allow(clippy::result_large_err)]

pub mod engine;
pub mod registry;
pub mod resolver;
pub mod sink_duckdb;
pub mod source_kafka;
pub mod worker;

pub use engine::{close_instance, instance, Engine, EngineError};
pub use resolver::SchemaResolver;
pub use worker::{IngestPipeline, TopicState};
