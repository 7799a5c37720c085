//! Background loop that runs a job on a fixed interval until stopped.

use std::{future::Future, time::Duration};

use {
    tokio::{task::JoinHandle, time::MissedTickBehavior},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

/// Handle to a running periodic task.
pub struct PeriodicTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `job` every `every`. The first run happens immediately so that
    /// work left over from a previous process is picked up at startup.
    ///
    /// A run that takes longer than `every` delays the next tick instead of
    /// causing a burst of catch-up runs.
    pub fn spawn<F, Fut>(name: &'static str, every: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        debug!(task = name, "periodic tick");
                        job().await;
                    },
                }
            }
        });
        info!(task = name, every_ms = every.as_millis() as u64, "periodic task started");
        Self {
            name,
            cancel,
            handle,
        }
    }

    /// Signal the loop to stop and wait for the in-flight run to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
        info!(task = self.name, "periodic task stopped");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[tokio::test]
    async fn runs_immediately_and_stops() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let task = PeriodicTask::spawn("test", Duration::from_secs(3600), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        task.stop().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ticks_repeatedly() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let task = PeriodicTask::spawn("fast", Duration::from_millis(10), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        task.stop().await;
        assert!(counter.load(Ordering::SeqCst) >= 3);
    }
}
