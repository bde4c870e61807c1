//! Example: Quorum locking over in-memory instances
//!
//! Run with: `cargo run --example memory_lock`
//!
//! Three in-process stores stand in for independent servers. One of them is
//! taken offline to show that a majority is enough.

use flow_lock::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    let stores: Vec<Arc<MemoryStore>> = (0..3)
        .map(|_| Arc::new(MemoryStore::with_latency(Duration::from_millis(2))))
        .collect();
    let manager = LockManager::<MemoryStore>::builder()
        .stores(stores.iter().cloned())
        .default_lease(Duration::from_secs(2))
        .tries(5)
        .build()?;

    stores[2].set_available(false);

    let ctx = LockContext::background();
    let handle = manager
        .acquire(&ctx, "reports:nightly", Duration::ZERO)
        .await?;
    info!(holders = ?handle.holders(), "locked with one instance down");

    // Another process retries until the lease is released
    let contender = manager.clone();
    let waiter = tokio::spawn(async move {
        let ctx = LockContext::background().with_timeout(Duration::from_secs(3));
        contender
            .acquire(&ctx, "reports:nightly", Duration::ZERO)
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.release(&ctx).await?;
    info!("first holder released");

    match waiter.await? {
        Ok(second) => {
            info!(token = %second.token(), "contender acquired after release");
            second.release(&ctx).await?;
        }
        Err(e) => warn!(error = %e, "contender gave up"),
    }

    Ok(())
}
