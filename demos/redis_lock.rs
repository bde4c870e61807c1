//! Example: Locking flows across Redis servers
//!
//! Run with: `cargo run --example redis_lock`
//!
//! Requires Redis. Set REDIS_URLS to a comma-separated list of independent
//! servers, or REDIS_URL for a single one. RUST_LOG controls log output.

use flow_lock::prelude::*;
use flow_lock::{RedisFlowLocker, RedisLockerConfig};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addresses: Vec<String> = std::env::var("REDIS_URLS")
        .or_else(|_| std::env::var("REDIS_URL"))
        .unwrap_or_else(|_| "redis://localhost:6379".to_string())
        .split(',')
        .map(str::to_string)
        .collect();

    let config = RedisLockerConfig {
        addresses,
        expiry_ms: 10_000,
        tries: 3,
        ..RedisLockerConfig::default()
    };
    let locker = RedisFlowLocker::from_config(&config).await?;
    info!(servers = locker.manager().stores().len(), "locker ready");

    let flow_id = Uuid::new_v4();
    let ctx = LockContext::background().with_timeout(Duration::from_secs(5));

    let handle = locker.lock(&ctx, flow_id).await?;
    info!(resource = %handle.resource(), "flow locked");

    // A second worker cannot take the same flow while we hold it
    match locker.lock(&LockContext::background(), flow_id).await {
        Err(LockError::AcquisitionFailed { acquired, required, .. }) => {
            info!(acquired, required, "second worker was turned away");
        }
        Ok(other) => {
            other.release(&LockContext::background()).await?;
            return Err("flow was locked twice".into());
        }
        Err(e) => return Err(e.into()),
    }

    // Work on the flow, staying inside the validity window
    tokio::time::sleep(Duration::from_millis(500)).await;
    info!(expired = handle.is_expired(), "work completed");

    match handle.release(&LockContext::background()).await {
        Ok(()) => info!("flow released"),
        Err(e @ LockError::ReleaseUncertain { .. }) => {
            // The lease still expires on its own
            info!(error = %e, "release unconfirmed");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
