use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::job::SchedulableJob;
use crate::scheduler::CapacityScheduler;

/// Background task that periodically promotes initialized jobs from a
/// queue's waiting list onto its runnable list.
///
/// Runs on its own tokio task and touches scheduler state only through
/// the shared lock, so it serializes with heartbeats and lifecycle
/// calls. Stopped through a `CancellationToken`, the same way the rest
/// of the system drains.
pub struct InitializationPoller {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

impl InitializationPoller {
    pub fn spawn<J>(scheduler: Arc<RwLock<CapacityScheduler<J>>>, interval: Duration) -> Self
    where
        J: SchedulableJob + Send + Sync + 'static,
    {
        let token = CancellationToken::new();
        let poll_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = poll_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let mut scheduler = scheduler.write().await;
                        if !scheduler.started() {
                            continue;
                        }
                        let promoted = scheduler.promote_runnable_jobs();
                        if promoted > 0 {
                            tracing::debug!(promoted, "Promoted initialized jobs");
                        }
                    }
                }
            }
            tracing::debug!("Initialization poller stopped");
        });
        Self { handle, token }
    }

    /// Stop the poller and wait for its task to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}
