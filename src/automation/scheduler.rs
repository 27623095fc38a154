//! Periodic automation task.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// A running periodic task, stopped by [`Scheduler::stop`] or on drop.
///
/// The first tick fires one period after start. Each tick runs on the
/// blocking pool and completes before the next is scheduled; stop takes
/// effect before the next one.
pub struct Scheduler {
    shutdown_tx: broadcast::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn a task calling `tick` every `period`.
    ///
    /// Fails outside a tokio runtime.
    pub fn start<F>(period: Duration, tick: F) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("automation needs a tokio runtime: {e}")))?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut shutdown_rx = shutdown_tx.subscribe();
        let tick = Arc::new(tick);

        info!("Starting automation loop ({:?})", period);
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let tick = tick.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || tick()).await {
                            warn!("Automation tick panicked: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Automation loop stopped");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            shutdown_tx,
            handle: Some(handle),
        })
    }

    /// Signal the task to stop after any tick in progress.
    ///
    /// The returned handle resolves once the task has exited.
    pub fn stop(mut self) -> Option<JoinHandle<()>> {
        let _ = self.shutdown_tx.send(());
        info!("Stopping automation loop");
        self.handle.take()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}
