//! Runs the regeneration action once per change batch, off the watch loop.

use std::any::Any;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info};

use crate::error::{Result, WatcherError};
use crate::event::ChangeBatch;

/// The side effect triggered by a change batch.
///
/// Implemented for every `Fn() -> anyhow::Result<()>` closure. Actions run on
/// tokio's blocking pool and may be invoked concurrently with themselves.
pub trait Action: Send + Sync + 'static {
    fn run(&self) -> anyhow::Result<()>;
}

impl<F> Action for F
where
    F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn run(&self) -> anyhow::Result<()> {
        self()
    }
}

/// Hands change batches to the action.
#[derive(Clone)]
pub struct Dispatcher {
    action: Arc<dyn Action>,
    limiter: Option<Arc<Semaphore>>,
}

impl Dispatcher {
    /// Create a dispatcher. With `max_in_flight` set, at most that many
    /// invocations run at once; further ones queue on the worker side.
    pub fn new(action: Arc<dyn Action>, max_in_flight: Option<usize>) -> Self {
        Self {
            action,
            limiter: max_in_flight.map(|max| Arc::new(Semaphore::new(max))),
        }
    }

    pub fn action(&self) -> &Arc<dyn Action> {
        &self.action
    }

    /// Invoke the action once for `batch` and return immediately.
    ///
    /// An invocation that has not started by the time `cancel` fires is
    /// skipped; one that has started runs to completion. The returned handle
    /// resolves to the invocation's outcome, which has already been logged.
    /// Callers are free to drop it.
    pub fn dispatch(
        &self,
        batch: &ChangeBatch,
        cancel: &CancellationToken,
    ) -> JoinHandle<Result<()>> {
        info!("Files changed: {} files", batch.len());
        for event in batch {
            debug!("  {}: {}", event.kind, event.path.display());
        }

        let action = Arc::clone(&self.action);
        let limiter = self.limiter.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            // Held until the blocking call returns.
            let _permit = match limiter {
                Some(limiter) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = limiter.acquire_owned() => permit.ok(),
                },
                None => None,
            };
            if cancel.is_cancelled() {
                debug!("Watcher stopped; skipping queued regeneration");
                return Ok(());
            }

            let outcome = match tokio::task::spawn_blocking(move || action.run()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(WatcherError::Action(err)),
                Err(join_err) if join_err.is_panic() => Err(WatcherError::ActionPanicked(
                    panic_message(join_err.into_panic()),
                )),
                Err(join_err) => Err(WatcherError::ActionPanicked(join_err.to_string())),
            };

            if let Err(err) = &outcome {
                error!("Error in regeneration action: {err}");
            }
            outcome
        }
        .in_current_span())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
