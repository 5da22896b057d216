//! Drive one client lifecycle against the in-memory backend.

use anyhow::{Context, Result};
use keel_client::{ClientRegistry, MemoryBackend, Outbox, PendingAction};
use keel_core::PartialConfig;
use serde_json::json;

/// Run the run command.
pub async fn run(partial: PartialConfig, offline: bool, enqueue: u32) -> Result<()> {
    let backend = MemoryBackend::new();
    backend.set_online(!offline);
    let registry = ClientRegistry::new(backend.clone());

    let client = registry
        .get_client(Some(partial))
        .await
        .context("Failed to initialize client")?;

    println!("=== keel run ===");
    println!();
    println!("Client:");
    println!("  State:  {}", client.state());
    println!("  Store:  {}", client.config().store.name);
    println!("  Online: {}", client.is_online());
    match client.sync_manager().handle() {
        Some(sync) => println!("  Sync:   {}", sync.target().url),
        None => println!("  Sync:   disabled"),
    }
    println!();

    let outbox = client.outbox()?;
    for seq in 0..enqueue {
        outbox
            .enqueue(PendingAction::new("demo", json!({ "seq": seq })))
            .await
            .context("Failed to queue demo write")?;
    }
    println!("Queued {} write(s)", enqueue);

    match client.sync_now().await {
        Ok(true) => println!("Sync pass completed"),
        Ok(false) => println!("Sync pass skipped (no synchronizer)"),
        Err(e) => println!("Sync pass failed: {}", e),
    }
    println!("Pending: {}", outbox.pending().await?.len());
    println!();

    registry
        .reset_client()
        .await
        .context("Failed to reset client")?;

    println!("Lifecycle:");
    for event in backend.events() {
        println!("  - {}", event);
    }

    Ok(())
}
