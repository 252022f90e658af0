//! Startup gate on durable store availability.

use crate::durable::DurableStore;
use crate::error::StoreUnavailableAtStartup;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Ping the durable store until it answers.
///
/// Retries forever at a fixed `delay`; only `shutdown` ends the wait with an
/// error.
pub async fn wait_for_store(
    durable: &dyn DurableStore,
    delay: Duration,
    shutdown: &CancellationToken,
) -> Result<(), StoreUnavailableAtStartup> {
    let mut attempts = 0u64;
    loop {
        attempts += 1;
        let last_error = match durable.ping().await {
            Ok(()) => {
                info!(attempts, "durable store is available");
                return Ok(());
            }
            Err(e) => e.to_string(),
        };
        warn!(attempts, error = %last_error, "durable store unavailable, retrying in {:?}", delay);

        tokio::select! {
            _ = shutdown.cancelled() => {
                return Err(StoreUnavailableAtStartup { attempts, last_error });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
