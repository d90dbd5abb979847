//! Change sources: the `notify`-backed path watcher and an in-memory source.

use std::any::Any;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use notify::{PollWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use tracing::{debug, error, info, warn};

use crate::config::{WatchSet, WatcherConfig};
use crate::error::{Result, WatcherError, is_soft_notify_error};
use crate::event::{BatchBuilder, ChangeBatch, ChangeEvent};
use crate::filter::EventFilter;

/// Something that turns a [`WatchSet`] into a stream of change batches.
///
/// Every call to `subscribe` starts a fresh stream. Dropping the stream
/// releases whatever the source allocated for it. Must be called from within
/// a tokio runtime.
pub trait ChangeSource: Send + Sync + 'static {
    fn subscribe(&self, watch_set: &WatchSet) -> Result<BatchStream>;
}

/// Receiving end of a change source.
///
/// Yields `Ok` batches until the source is exhausted. A fatal facility error
/// is yielded once as `Err`, after which the stream ends.
pub struct BatchStream {
    rx: mpsc::Receiver<Result<ChangeBatch>>,
    _guard: Option<Box<dyn Any + Send>>,
}

impl BatchStream {
    pub fn new(rx: mpsc::Receiver<Result<ChangeBatch>>) -> Self {
        Self { rx, _guard: None }
    }

    /// Keep `guard` alive for as long as the stream is.
    pub fn with_guard(rx: mpsc::Receiver<Result<ChangeBatch>>, guard: impl Any + Send) -> Self {
        Self {
            rx,
            _guard: Some(Box::new(guard)),
        }
    }

    /// Wait for the next batch. `None` once the source has closed.
    pub async fn next(&mut self) -> Option<Result<ChangeBatch>> {
        self.rx.recv().await
    }
}

/// Watches directories through the platform notification facility.
#[derive(Debug, Clone)]
pub struct PathWatcher {
    config: WatcherConfig,
    filter: EventFilter,
}

impl PathWatcher {
    /// Create a watcher, rejecting a config it cannot run with.
    pub fn new(config: WatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    fn from_valid(config: WatcherConfig) -> Self {
        let filter = EventFilter::new(&config.filter);
        Self { config, filter }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    fn create_backend<F>(&self, handler: F) -> Result<Box<dyn Watcher + Send>>
    where
        F: notify::EventHandler,
    {
        let backend: Box<dyn Watcher + Send> = match self.config.poll_interval() {
            Some(interval) => {
                debug!("Using polling backend every {interval:?}");
                let config = notify::Config::default().with_poll_interval(interval);
                Box::new(PollWatcher::new(handler, config)?)
            }
            None => Box::new(notify::recommended_watcher(handler)?),
        };
        Ok(backend)
    }
}

impl Default for PathWatcher {
    fn default() -> Self {
        Self::from_valid(WatcherConfig::default())
    }
}

impl ChangeSource for PathWatcher {
    fn subscribe(&self, watch_set: &WatchSet) -> Result<BatchStream> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();
        let mut backend = self.create_backend(move |res: notify::Result<notify::Event>| {
            // The receiver only goes away once the stream is dropped.
            let _ = raw_tx.send(res);
        })?;

        let mode = if self.config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        let mut watched = 0usize;
        for path in watch_set {
            match watch_root(backend.as_mut(), path, mode) {
                Ok(()) => watched += 1,
                Err(err) => warn!("{err}; continuing without it"),
            }
        }
        info!(
            "Watching {watched} of {} paths for changes: {}",
            watch_set.len(),
            watch_set.display()
        );

        let (batch_tx, batch_rx) = mpsc::channel(self.config.channel_capacity);
        tokio::spawn(collect_batches(
            raw_rx,
            batch_tx,
            self.filter.clone(),
            self.config.step(),
            self.config.debounce(),
        ));

        Ok(BatchStream::with_guard(batch_rx, backend))
    }
}

fn watch_root(backend: &mut dyn Watcher, path: &Path, mode: RecursiveMode) -> Result<()> {
    if !path.exists() {
        return Err(WatcherError::Setup {
            path: path.to_path_buf(),
            source: notify::Error::path_not_found(),
        });
    }
    backend
        .watch(path, mode)
        .map_err(|source| WatcherError::Setup {
            path: path.to_path_buf(),
            source,
        })?;
    debug!("Started watching: {}", path.display());
    Ok(())
}

/// Group raw notifications into batches, one per notification cycle.
///
/// A cycle opens with the first event and closes once no event has arrived
/// for `step`, or `debounce` after it opened, whichever comes first.
async fn collect_batches(
    mut raw_rx: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    batch_tx: mpsc::Sender<Result<ChangeBatch>>,
    filter: EventFilter,
    step: Duration,
    debounce: Duration,
) {
    let mut builder = BatchBuilder::new();

    loop {
        let first = tokio::select! {
            _ = batch_tx.closed() => return,
            raw = raw_rx.recv() => raw,
        };
        let Some(first) = first else {
            return;
        };

        let mut fatal = absorb(first, &mut builder, &filter).err();
        let mut source_closed = false;
        let deadline = Instant::now() + debounce;

        while fatal.is_none() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match timeout(step.min(deadline - now), raw_rx.recv()).await {
                Ok(Some(raw)) => fatal = absorb(raw, &mut builder, &filter).err(),
                Ok(None) => {
                    source_closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        if let Some(batch) = builder.finish() {
            if batch_tx.send(Ok(batch)).await.is_err() {
                return;
            }
        }
        if let Some(err) = fatal {
            error!("File watcher failed: {err}");
            let _ = batch_tx.send(Err(WatcherError::Facility(err))).await;
            return;
        }
        if source_closed {
            return;
        }
    }
}

fn absorb(
    raw: notify::Result<notify::Event>,
    builder: &mut BatchBuilder,
    filter: &EventFilter,
) -> std::result::Result<(), notify::Error> {
    match raw {
        Ok(event) => {
            for change in ChangeEvent::from_notify(&event) {
                if filter.accepts(&change.path) {
                    builder.push(change);
                }
            }
            Ok(())
        }
        Err(err) if is_soft_notify_error(&err) => {
            debug!("Ignoring watch error for unavailable path: {err}");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// A change source fed by hand.
///
/// Useful for hosts that produce change notifications themselves, and for
/// exercising the watch loop without touching the filesystem. Each
/// subscription replaces the previous one.
#[derive(Clone, Default)]
pub struct ManualSource {
    state: Arc<Mutex<ManualState>>,
}

#[derive(Default)]
struct ManualState {
    sender: Option<mpsc::Sender<Result<ChangeBatch>>>,
    subscriptions: usize,
}

impl ManualSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_sender(&self) -> Option<mpsc::Sender<Result<ChangeBatch>>> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.sender.as_ref().filter(|tx| !tx.is_closed()).cloned()
    }

    /// Deliver a batch to the current subscriber. Returns false if nobody is
    /// listening or the subscriber is backed up.
    pub fn emit(&self, batch: ChangeBatch) -> bool {
        self.live_sender()
            .is_some_and(|tx| tx.try_send(Ok(batch)).is_ok())
    }

    /// Deliver `events` as one batch. Returns false for an empty list.
    pub fn emit_events(&self, events: Vec<ChangeEvent>) -> bool {
        match ChangeBatch::new(events) {
            Some(batch) => self.emit(batch),
            None => false,
        }
    }

    /// Simulate an unrecoverable facility failure and close the stream.
    pub fn fail(&self, err: notify::Error) -> bool {
        let sender = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.sender.take()
        };
        sender.is_some_and(|tx| tx.try_send(Err(WatcherError::Facility(err))).is_ok())
    }

    /// Whether a live stream is attached.
    pub fn is_subscribed(&self) -> bool {
        self.live_sender().is_some()
    }

    /// How many streams have been handed out so far.
    pub fn subscriptions(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscriptions
    }
}

impl ChangeSource for ManualSource {
    fn subscribe(&self, _watch_set: &WatchSet) -> Result<BatchStream> {
        let (tx, rx) = mpsc::channel(64);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.sender = Some(tx);
        state.subscriptions += 1;
        Ok(BatchStream::new(rx))
    }
}
