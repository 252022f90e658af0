//! Non-queuing mutual exclusion for periodic passes.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// At most one holder; contenders are turned away instead of waiting.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    busy: Arc<Mutex<()>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flight, or `None` if a pass is already running.
    pub fn try_begin(&self) -> Option<OwnedMutexGuard<()>> {
        self.busy.clone().try_lock_owned().ok()
    }

    /// Wait until no pass is running.
    pub async fn idle(&self) {
        let _guard = self.busy.lock().await;
    }

    pub fn is_busy(&self) -> bool {
        self.busy.try_lock().is_err()
    }
}
