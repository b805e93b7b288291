//! pairsync CLI
//!
//! Loads documents into an in-memory server, checks out one draft/published
//! pair and runs a script of operations against it, printing each result and
//! the final edit state.
//!
//! # Usage
//!
//! ```bash
//! # Run the script from a config file
//! pairsync --config pairsync.toml
//!
//! # Seed documents and inspect a pair without running anything
//! pairsync --seed movies.json --document movie --type movie
//!
//! # Override the config from the command line
//! pairsync -c pairsync.toml --live-edit settings --log-level debug
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use pairsync_store::{DocumentStore, OperationResult, Operations, PairLease};
use pairsync_transport::MemoryTransport;

use crate::config::{load_seed, CliConfig, Step};

/// pairsync - optimistic draft/published document editing
#[derive(Parser, Debug)]
#[command(name = "pairsync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "PAIRSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// JSON file with an array of documents to load
    #[arg(long, env = "PAIRSYNC_SEED")]
    seed: Option<PathBuf>,

    /// Document id to check out
    #[arg(short, long, env = "PAIRSYNC_DOCUMENT")]
    document: Option<String>,

    /// Schema type of the document
    #[arg(short = 't', long = "type", env = "PAIRSYNC_TYPE")]
    type_name: Option<String>,

    /// Treat this type as live-edit (repeatable)
    #[arg(long)]
    live_edit: Vec<String>,

    /// Capacity of per-version event channels
    #[arg(long, env = "PAIRSYNC_EVENT_BUFFER")]
    event_buffer: Option<usize>,

    /// Seconds to wait for each operation
    #[arg(long, env = "PAIRSYNC_TIMEOUT", default_value = "5")]
    timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "PAIRSYNC_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            CliConfig::load(path)?
        }
        None => CliConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if let Some(document) = args.document {
        config.document = Some(document);
    }
    if let Some(type_name) = args.type_name {
        config.type_name = Some(type_name);
    }
    if let Some(capacity) = args.event_buffer {
        config.store.event_buffer = capacity;
    }
    config.store.live_edit_types.extend(args.live_edit);

    let document = config
        .document
        .clone()
        .context("No document to check out; pass --document or set `document` in the config")?;
    let wait = Duration::from_secs(args.timeout.max(1));

    let transport = Arc::new(MemoryTransport::new());
    if let Some(path) = &config.seed {
        let docs = load_seed(path)?;
        info!(path = %path.display(), documents = docs.len(), "Seeding server");
        for doc in docs {
            transport.seed(doc)?;
        }
    }

    let store = DocumentStore::builder(transport.clone())
        .with_config(config.store.clone())
        .build();
    let pair = store.checkout_pair(&document)?;
    tokio::time::timeout(wait, pair.ready())
        .await
        .context("Timed out waiting for document snapshots")??;

    let type_name = match &config.type_name {
        Some(type_name) => type_name.clone(),
        None => infer_type(&pair).context("Cannot infer the document type; pass --type")?,
    };
    info!(id = %pair.id_pair(), type_name = %type_name, steps = config.script.len(), "Running script");

    let operations = store.operations(&document, &type_name)?;
    let mut results = store.operation_results();
    for (index, step) in config.script.iter().enumerate() {
        run_step(index + 1, step, &pair, &operations, &mut results, &transport, wait).await?;
    }

    let mut edit_state = store.edit_state(&document, &type_name)?;
    let state = tokio::time::timeout(wait, edit_state.wait_for(|s| s.ready && !s.validation.is_validating))
        .await
        .context("Timed out waiting for edit state")??;

    let availability: serde_json::Map<String, serde_json::Value> = operations
        .all()
        .into_iter()
        .map(|(name, availability)| {
            let value = match availability.reason() {
                None => json!(true),
                Some(reason) => json!(reason),
            };
            (name.to_string(), value)
        })
        .collect();

    let output = json!({
        "id": state.id,
        "type": state.type_name,
        "liveEdit": state.live_edit,
        "draft": state.draft,
        "published": state.published,
        "validation": state.validation,
        "operations": availability,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_step(
    number: usize,
    step: &Step,
    pair: &PairLease,
    operations: &Operations,
    results: &mut broadcast::Receiver<OperationResult>,
    transport: &MemoryTransport,
    wait: Duration,
) -> Result<()> {
    let call = step.to_call(&pair.id_pair().published_id);
    let name = call.name();

    if let Err(e) = operations.execute(call) {
        println!("{number:>3}. {name}: skipped ({e})");
        return Ok(());
    }

    let result = tokio::time::timeout(wait, async {
        loop {
            match results.recv().await {
                Ok(result) if result.id_pair() == pair.id_pair() && result.operation() == name => {
                    return Ok(result);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed operation results");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(anyhow::anyhow!("Operation pipeline closed"));
                }
            }
        }
    })
    .await
    .with_context(|| format!("Timed out waiting for {name}"))??;

    match &result {
        OperationResult::Success { .. } => println!("{number:>3}. {name}: ok"),
        OperationResult::Error { error, .. } => println!("{number:>3}. {name}: failed ({error})"),
    }

    if result.is_success() && !matches!(step, Step::Patch { .. }) {
        settle(pair, transport, wait).await;
    }
    Ok(())
}

/// Wait until the local pair reflects the server, so the next guard sees the outcome
async fn settle(pair: &PairLease, transport: &MemoryTransport, wait: Duration) {
    let id_pair = pair.id_pair().clone();
    let mut state = pair.watch_state();
    let synced = tokio::time::timeout(
        wait,
        state.wait_for(|s| {
            s.draft.document == transport.document(&id_pair.draft_id)
                && s.published.document == transport.document(&id_pair.published_id)
        }),
    )
    .await;
    if !matches!(synced, Ok(Ok(_))) {
        warn!(id = %id_pair, "Local state did not catch up with the server");
    }
}

fn infer_type(pair: &PairLease) -> Option<String> {
    let state = pair.state();
    state
        .draft
        .document
        .as_ref()
        .or(state.published.document.as_ref())
        .and_then(|doc| doc.type_name())
        .map(str::to_string)
}
