use crate::core::{EntitlementError, Result};
use crate::store::EntitlementStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Anything that can apply a pending monthly reset.
#[async_trait]
pub trait ResetTarget: Send + Sync {
    async fn check_reset(&self) -> Result<bool>;
}

#[async_trait]
impl ResetTarget for EntitlementStore {
    async fn check_reset(&self) -> Result<bool> {
        EntitlementStore::check_reset(self).await
    }
}

/// Background worker for periodic reset checks.
pub struct ResetWorker {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl ResetWorker {
    /// Spawns a worker that calls `check_reset` every `interval`.
    ///
    /// Intervals below 10ms are raised to 10ms.
    ///
    /// Failures are logged and retried on the next tick. The worker exits on
    /// its own once the target reports `StoreClosed`.
    pub fn spawn<T>(target: Arc<T>, interval: Duration) -> Self
    where
        T: ResetTarget + ?Sized + 'static,
    {
        let interval = interval.max(Duration::from_millis(10));
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let join_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        break;
                    }
                    _ = sleep(interval) => {
                        match target.check_reset().await {
                            Ok(true) => debug!("reset worker applied monthly reset"),
                            Ok(false) => {}
                            Err(EntitlementError::StoreClosed) => break,
                            Err(err) => warn!(error = %err, "reset check failed, retrying next tick"),
                        }
                    }
                }
            }
        });

        Self {
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
    }

    /// Signals the worker to stop and waits for it to finish.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(join_handle) = self.join_handle.take() {
            join_handle
                .await
                .map_err(|err| EntitlementError::Task(format!("reset worker join: {}", err)))?;
        }
        Ok(())
    }
}

impl Drop for ResetWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}
