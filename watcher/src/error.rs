//! Error types for the regeneration watcher.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur in the regeneration watcher.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// A configured root could not be registered with the notification
    /// facility. Never fatal: the root is skipped.
    #[error("cannot watch {path}: {source}")]
    Setup {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// The notification facility failed in a way the watch loop cannot
    /// recover from.
    #[error("notification facility failed: {0}")]
    Facility(#[from] notify::Error),

    /// The regeneration action returned an error.
    #[error("action failed: {0:#}")]
    Action(anyhow::Error),

    /// The regeneration action panicked.
    #[error("action panicked: {0}")]
    ActionPanicked(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatcherError {
    /// Whether this error ends the watch loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Facility(_))
    }
}

/// Whether a `notify` error only concerns a single path that vanished or
/// became unreadable. Such errors are soft: the path simply stops reporting.
pub(crate) fn is_soft_notify_error(err: &notify::Error) -> bool {
    use std::io::ErrorKind;

    match &err.kind {
        notify::ErrorKind::PathNotFound | notify::ErrorKind::WatchNotFound => true,
        notify::ErrorKind::Io(io) => matches!(
            io.kind(),
            ErrorKind::NotFound | ErrorKind::PermissionDenied
        ),
        _ => false,
    }
}
