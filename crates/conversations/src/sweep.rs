//! Periodic closing of conversations whose reply window has lapsed.

use std::{sync::Arc, time::Duration};

use {
    parley_common::{Result, now_ms, periodic::PeriodicTask},
    parley_store::Store,
    tracing::{error, info},
};

/// Close every conversation whose window expired strictly before `now`.
///
/// The expiry predicate is evaluated by the store in the same statement that
/// closes the row, so an inbound message that reopened the conversation first
/// always wins.
pub async fn sweep_once(store: &dyn Store, now: i64) -> Result<u64> {
    let closed = store.close_expired_conversations(now).await?;
    if closed > 0 {
        info!(closed, "closed conversations with expired windows");
    }
    Ok(closed)
}

/// Background task running [`sweep_once`] on an interval.
pub struct WindowSweeper {
    task: PeriodicTask,
}

impl WindowSweeper {
    pub fn start(store: Arc<dyn Store>, every: Duration) -> Self {
        let task = PeriodicTask::spawn("window-sweep", every, move || {
            let store = Arc::clone(&store);
            async move {
                if let Err(e) = sweep_once(store.as_ref(), now_ms()).await {
                    error!(error = %e, "window sweep failed");
                }
            }
        });
        Self { task }
    }

    pub async fn stop(self) {
        self.task.stop().await;
    }
}
