//! # kawai CLI
//!
//! Points the ingest engine at one or more Kafka topics and either
//! answers a one-shot SQL query over the materialized tables or keeps
//! ingesting until interrupted.
//!
//! ```bash
//! # Follow topics declared in the config until Ctrl-C
//! kawai-cli --config kawai.yml
//!
//! # Catch up, answer a query, and exit
//! kawai-cli --config kawai.yml --query 'SELECT count(*) FROM "orders"'
//!
//! # Add a topic on top of the config file
//! RUST_LOG=info kawai-cli --config kawai.yml --topic clicks
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use kawai_core::EngineOptions;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for the kawai ingest bridge
#[derive(Parser, Debug)]
#[command(name = "kawai-cli")]
#[command(about = "Queryable DuckDB tables over schema-tagged Kafka topics")]
struct Args {
    /// Path to the YAML engine configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Additional topics to ingest, on top of the config's list
    #[arg(short, long)]
    topic: Vec<String>,

    /// One-shot SQL query: catch up to the topics' current offsets,
    /// print one JSON object per row, and exit
    #[arg(short, long)]
    query: Option<String>,

    /// Override the DuckDB database path from the config
    #[arg(long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut options: EngineOptions = {
        let text = std::fs::read_to_string(&args.config)
            .with_context(|| format!("reading {}", args.config.display()))?;
        EngineOptions::from_yaml(&text)?
    };
    for topic in &args.topic {
        if !options.topics.contains(topic) {
            options.topics.push(topic.clone());
        }
    }
    if let Some(db) = args.db {
        options.db_path = Some(db);
    }

    let engine = kawai_io::instance();
    engine.configure(options).await?;
    engine.init().await?;

    let outcome = run(&engine, args.query.as_deref()).await;
    kawai_io::close_instance().await?;
    outcome
}

async fn run(engine: &kawai_io::Engine, query: Option<&str>) -> Result<()> {
    match query {
        Some(sql) => {
            engine.sync().await?;
            for row in engine.query(sql).await? {
                println!("{}", serde_json::to_string(&row)?);
            }
        }
        None => {
            info!("ingesting; press Ctrl-C to stop");
            signal::ctrl_c().await?;
            println!("\nReceived Ctrl-C, shutting down...");
        }
    }
    Ok(())
}
