//! # Regeneration Watcher
//!
//! This crate watches source directories and re-runs a regeneration action
//! (for example, re-exporting an API schema document) whenever files change,
//! without ever stalling the host's async runtime.
//!
//! ## Features
//!
//! - **Batched Notifications**: Changes arriving within one notification cycle
//!   trigger a single action run
//! - **Off-loop Actions**: Actions run on the blocking pool, so a slow action
//!   never delays change detection
//! - **Idempotent Lifecycle**: `start`/`stop` can be tied directly to host
//!   startup and shutdown
//! - **Path Filtering**: VCS directories, caches and editor swap files are
//!   ignored by default
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Regeneration Watcher                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  WatchSet ──► PathWatcher ──► ChangeBatch ──► Dispatcher        │
//! │                    │                              │             │
//! │                    ▼                              ▼             │
//! │              EventFilter                       Action           │
//! │                                                                 │
//! │  LifecycleController owns the watch loop (start / stop)         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use regen_watcher::{LifecycleController, WatchSet};
//!
//! # async fn host() -> anyhow::Result<()> {
//! let mut watcher = LifecycleController::new(WatchSet::new(["src/"]), || -> anyhow::Result<()> {
//!     // Rewrite docs/openapi.yaml here.
//!     Ok(())
//! });
//!
//! watcher.run_baseline()?;
//! watcher.start()?;
//! // ... serve requests ...
//! watcher.stop();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod filter;
pub mod watcher;

pub use config::{FilterConfig, WatchSet, WatcherConfig};
pub use controller::{LifecycleController, WatcherState};
pub use dispatcher::{Action, Dispatcher};
pub use error::{Result, WatcherError};
pub use event::{BatchBuilder, ChangeBatch, ChangeEvent, ChangeKind};
pub use filter::EventFilter;
pub use watcher::{BatchStream, ChangeSource, ManualSource, PathWatcher};
