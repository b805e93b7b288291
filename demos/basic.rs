//! Basic pairsync Example
//!
//! Edits a document optimistically, watches the pair become consistent and
//! publishes it, all against the in-memory server.
//!
//! Run with: cargo run --example basic

use std::sync::Arc;

use pairsync_core::{Document, Patch};
use pairsync_store::{
    DocumentStore, OperationCall, OperationName, Schema, SchemaType, TaggedEvent, VersionEvent,
};
use pairsync_transport::MemoryTransport;
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("pairsync Basic Example\n");

    let transport = Arc::new(MemoryTransport::new());
    let mut movie = Document::new("movie-1", "movie");
    movie.insert("title", json!("Alien"));
    transport.seed(movie)?;

    let store = DocumentStore::builder(transport.clone())
        .with_schema(Schema::new().with_type(SchemaType::new("movie").required("title")))
        .build();

    // Check out the pair; a second checkout shares the same subscription
    let pair = store.checkout_pair("movie-1")?;
    let _again = store.checkout_pair("drafts.movie-1")?;
    pair.ready().await?;
    println!("Checked out {} ({} listen call)", pair.id_pair(), transport.listen_count());

    let mut events = pair.draft().events();
    let mut consistency = store.consistency_status("movie-1")?;
    let operations = store.operations("movie-1", "movie")?;
    let mut results = store.operation_results();

    println!("\n=== Optimistic edit ===\n");
    operations.execute(OperationCall::Patch {
        patches: vec![Patch::new("movie-1").set("year", 1979)],
        initial: None,
    })?;
    let result = results.recv().await?;
    println!("patch: {:?}", result.is_success());

    if let Ok(TaggedEvent {
        version,
        event: VersionEvent::Document(event),
    }) = events.recv().await
    {
        println!("{version} event: {event:?}");
    }
    println!("Draft now: {}", json!(pair.draft().document()));
    println!("Consistent: {}", consistency.is_consistent());

    println!("\n=== Publish ===\n");
    for (name, availability) in operations.all() {
        println!("  {name:<15} {availability:?}");
    }

    // Publish flushes the pending edit first
    operations.execute(OperationCall::Publish)?;
    let result = results.recv().await?;
    println!("{}: {:?}", OperationName::Publish, result);
    consistency.wait_consistent().await?;

    println!("Server published: {}", json!(transport.document("movie-1")));
    println!("Server draft:     {}", json!(transport.document("drafts.movie-1")));

    let mut edit_state = store.edit_state("movie-1", "movie")?;
    let state = edit_state
        .wait_for(|s| s.draft.is_none() && !s.validation.is_validating)
        .await?;
    println!("\nEdit state: draft={:?} validation={:?}", state.draft, state.validation);

    Ok(())
}
