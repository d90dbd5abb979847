//! Start/stop control over the watch loop.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{WatchSet, WatcherConfig, check_max_in_flight};
use crate::dispatcher::{Action, Dispatcher};
use crate::error::Result;
use crate::watcher::{BatchStream, ChangeSource, PathWatcher};

/// Whether a watch loop is currently active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Stopped,
    Running,
}

/// One execution of the watch loop.
struct WatcherTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl WatcherTask {
    fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Binds a watch loop's lifetime to its host.
///
/// The controller owns the only handle to the running loop; `start` and
/// `stop` take `&mut self`, so no lock is needed around it. Dropping the
/// controller cancels the loop.
pub struct LifecycleController {
    watch_set: WatchSet,
    source: Arc<dyn ChangeSource>,
    dispatcher: Dispatcher,
    task: Option<WatcherTask>,
}

impl LifecycleController {
    /// Watch `watch_set` with the platform watcher and default settings.
    pub fn new(watch_set: WatchSet, action: impl Action) -> Self {
        Self::with_source(watch_set, PathWatcher::default(), action)
    }

    /// Watch `watch_set` with the platform watcher and `config`.
    pub fn with_config(
        watch_set: WatchSet,
        config: WatcherConfig,
        action: impl Action,
    ) -> Result<Self> {
        let max_in_flight = config.max_in_flight;
        Ok(Self::from_parts(
            watch_set,
            Arc::new(PathWatcher::new(config)?),
            Dispatcher::new(Arc::new(action), max_in_flight),
        ))
    }

    /// Take batches from an arbitrary change source.
    pub fn with_source(
        watch_set: WatchSet,
        source: impl ChangeSource,
        action: impl Action,
    ) -> Self {
        Self::from_parts(
            watch_set,
            Arc::new(source),
            Dispatcher::new(Arc::new(action), None),
        )
    }

    fn from_parts(
        watch_set: WatchSet,
        source: Arc<dyn ChangeSource>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            watch_set,
            source,
            dispatcher,
            task: None,
        }
    }

    /// Bound the number of concurrently running actions. Zero is rejected.
    pub fn with_max_in_flight(mut self, max: usize) -> Result<Self> {
        check_max_in_flight(max)?;
        self.dispatcher = Dispatcher::new(Arc::clone(self.dispatcher.action()), Some(max));
        Ok(self)
    }

    pub fn watch_set(&self) -> &WatchSet {
        &self.watch_set
    }

    pub fn state(&self) -> WatcherState {
        match &self.task {
            Some(task) if task.is_active() => WatcherState::Running,
            _ => WatcherState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == WatcherState::Running
    }

    /// Run the action once on the calling thread and return its result.
    ///
    /// Hosts call this before `start` to produce the initial artifact.
    pub fn run_baseline(&self) -> anyhow::Result<()> {
        debug!("Running baseline regeneration");
        self.dispatcher.action().run()
    }

    /// Start the watch loop unless one is already active.
    ///
    /// Must be called from within a tokio runtime. Fails only when the change
    /// source cannot be created at all; the controller then stays stopped.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            debug!("File watcher already running");
            return Ok(());
        }

        let stream = self.source.subscribe(&self.watch_set).map_err(|err| {
            error!("Failed to start file watcher: {err}");
            err
        })?;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(watch_loop(stream, self.dispatcher.clone(), cancel.clone()));
        self.task = Some(WatcherTask { handle, cancel });

        info!("Watching for changes in: {}", self.watch_set.display());
        Ok(())
    }

    /// Request cancellation of the active watch loop, if any.
    ///
    /// Returns without waiting. Actions already running are left to finish.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            if task.is_active() {
                task.cancel.cancel();
                info!("File watcher stopped");
            }
        }
    }

    /// Stop and wait for the watch loop to exit. In-flight actions are not
    /// awaited.
    pub async fn shutdown(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        task.cancel.cancel();
        if let Err(err) = task.handle.await {
            warn!("Watch loop ended abnormally: {err}");
        }
        info!("File watcher shut down");
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel.cancel();
        }
    }
}

/// The watch loop. Its only suspension point is the wait for the next batch.
async fn watch_loop(mut stream: BatchStream, dispatcher: Dispatcher, cancel: CancellationToken) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(batch)) => {
                if cancel.is_cancelled() {
                    break;
                }
                let _in_flight = dispatcher.dispatch(&batch, &cancel);
            }
            Some(Err(err)) if err.is_fatal() => {
                error!("Watch loop terminated: {err}");
                break;
            }
            Some(Err(err)) => warn!("Change source reported: {err}"),
            None => {
                debug!("Change source closed");
                break;
            }
        }
    }
    debug!("Watch loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatcherError;
    use crate::event::ChangeEvent;
    use crate::watcher::ManualSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct BrokenSource;

    impl ChangeSource for BrokenSource {
        fn subscribe(&self, _watch_set: &WatchSet) -> Result<BatchStream> {
            Err(WatcherError::Facility(notify::Error::generic("no inotify")))
        }
    }

    fn noop() -> anyhow::Result<()> {
        Ok(())
    }

    #[tokio::test]
    async fn test_initial_state_is_stopped() {
        let controller =
            LifecycleController::with_source(WatchSet::new(["src/"]), ManualSource::new(), noop);
        assert_eq!(controller.state(), WatcherState::Stopped);
        assert_eq!(controller.watch_set().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let mut controller =
            LifecycleController::with_source(WatchSet::new(["src/"]), ManualSource::new(), noop);
        controller.stop();
        controller.stop();
        controller.shutdown().await;
        assert_eq!(controller.state(), WatcherState::Stopped);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let source = ManualSource::new();
        let mut controller =
            LifecycleController::with_source(WatchSet::new(["src/"]), source.clone(), noop);

        controller.start().unwrap();
        controller.start().unwrap();

        assert_eq!(source.subscriptions(), 1);
        assert!(controller.is_running());
    }

    #[tokio::test]
    async fn test_failed_subscription_leaves_controller_stopped() {
        let mut controller =
            LifecycleController::with_source(WatchSet::new(["src/"]), BrokenSource, noop);

        let err = controller.start().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(controller.state(), WatcherState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_loop_exit() {
        let source = ManualSource::new();
        let mut controller =
            LifecycleController::with_source(WatchSet::new(["src/"]), source.clone(), noop);

        controller.start().unwrap();
        controller.shutdown().await;

        assert_eq!(controller.state(), WatcherState::Stopped);
        assert!(!source.is_subscribed());
    }

    #[tokio::test]
    async fn test_drop_cancels_loop() {
        let source = ManualSource::new();
        let mut controller =
            LifecycleController::with_source(WatchSet::new(["src/"]), source.clone(), noop);
        controller.start().unwrap();
        drop(controller);

        for _ in 0..100 {
            if !source.is_subscribed() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("watch loop outlived its controller");
    }

    #[tokio::test]
    async fn test_run_baseline_invokes_action_inline() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let controller = LifecycleController::with_source(
            WatchSet::new(["src/"]),
            ManualSource::new(),
            move || -> anyhow::Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );

        controller.run_baseline().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(controller.state(), WatcherState::Stopped);
    }

    #[tokio::test]
    async fn test_with_config_rejects_invalid_config() {
        let config = WatcherConfig::new().with_max_in_flight(0);
        assert!(LifecycleController::with_config(WatchSet::new(["src/"]), config, noop).is_err());

        let config = WatcherConfig::new().with_channel_capacity(0);
        assert!(matches!(
            LifecycleController::with_config(WatchSet::new(["src/"]), config, noop),
            Err(WatcherError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_max_in_flight_is_rejected_like_config() {
        let controller =
            LifecycleController::with_source(WatchSet::new(["src/"]), ManualSource::new(), noop);
        assert!(matches!(
            controller.with_max_in_flight(0),
            Err(WatcherError::Config(_))
        ));

        let controller =
            LifecycleController::with_source(WatchSet::new(["src/"]), ManualSource::new(), noop);
        assert!(controller.with_max_in_flight(2).is_ok());
    }

    #[tokio::test]
    async fn test_loop_ignores_batches_after_cancellation() {
        let source = ManualSource::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let mut controller = LifecycleController::with_source(
            WatchSet::new(["src/"]),
            source.clone(),
            move || -> anyhow::Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );

        controller.start().unwrap();
        controller.stop();
        // The loop has not been polled since stop; the batch is still queued.
        source.emit_events(vec![ChangeEvent::modified("src/a.py")]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
