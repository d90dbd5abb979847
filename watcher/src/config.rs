//! Configuration types for the regeneration watcher.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, WatcherError};

/// The ordered set of root paths a watcher observes.
///
/// Immutable once built. Paths need not exist yet; missing roots are skipped
/// when watching starts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WatchSet {
    paths: Vec<PathBuf>,
}

impl WatchSet {
    /// Create a watch set, dropping repeated paths but keeping first-seen order.
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut unique: Vec<PathBuf> = Vec::new();
        for path in paths {
            let path = path.into();
            if !unique.contains(&path) {
                unique.push(path);
            }
        }
        Self { paths: unique }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PathBuf> {
        self.paths.iter()
    }

    /// Comma-separated list used in log lines.
    pub fn display(&self) -> String {
        self.paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl<P: Into<PathBuf>> FromIterator<P> for WatchSet {
    fn from_iter<T: IntoIterator<Item = P>>(iter: T) -> Self {
        Self::new(iter)
    }
}

impl<'a> IntoIterator for &'a WatchSet {
    type Item = &'a PathBuf;
    type IntoIter = std::slice::Iter<'a, PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}

/// Tunables for the watcher. All durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Upper bound on how long one notification cycle may keep collecting.
    pub debounce_ms: u64,

    /// Quiet period that closes a notification cycle.
    pub step_ms: u64,

    /// Whether roots are watched recursively.
    pub recursive: bool,

    /// Use the polling backend with this interval instead of native events.
    pub poll_interval_ms: Option<u64>,

    /// Cap on concurrently running actions (None = unbounded).
    pub max_in_flight: Option<usize>,

    /// Capacity of the batch channel between the watcher and the loop.
    pub channel_capacity: usize,

    /// Path filtering.
    pub filter: FilterConfig,
}

impl WatcherConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Set the cycle upper bound.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = millis(debounce);
        self
    }

    /// Set the quiet period that closes a cycle.
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step_ms = millis(step);
        self
    }

    /// Only watch the roots themselves, not their subdirectories.
    pub fn non_recursive(mut self) -> Self {
        self.recursive = false;
        self
    }

    /// Use the polling backend.
    pub fn with_polling(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = Some(millis(interval));
        self
    }

    /// Bound the number of concurrently running actions.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = Some(max);
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }

    /// Reject values the watcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.step_ms == 0 {
            return Err(WatcherError::Config("step_ms must be positive".to_string()));
        }
        if self.debounce_ms < self.step_ms {
            return Err(WatcherError::Config(format!(
                "debounce_ms ({}) must not be shorter than step_ms ({})",
                self.debounce_ms, self.step_ms
            )));
        }
        if self.channel_capacity == 0 {
            return Err(WatcherError::Config(
                "channel_capacity must be positive".to_string(),
            ));
        }
        if let Some(max) = self.max_in_flight {
            check_max_in_flight(max)?;
        }
        if self.poll_interval_ms == Some(0) {
            return Err(WatcherError::Config(
                "poll_interval_ms must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1600,
            step_ms: 50,
            recursive: true,
            poll_interval_ms: None,
            max_in_flight: None,
            channel_capacity: 64,
            filter: FilterConfig::default(),
        }
    }
}

/// Whole milliseconds in `duration`, rounding a partial millisecond up so a
/// non-zero duration never becomes zero.
fn millis(duration: Duration) -> u64 {
    let whole = duration.as_millis();
    let rounded = if duration.subsec_nanos() % 1_000_000 == 0 {
        whole
    } else {
        whole + 1
    };
    u64::try_from(rounded).unwrap_or(u64::MAX)
}

/// Reject a concurrency cap of zero.
pub(crate) fn check_max_in_flight(max: usize) -> Result<()> {
    if max == 0 {
        return Err(WatcherError::Config(
            "max_in_flight must be positive when set".to_string(),
        ));
    }
    Ok(())
}

/// Which changed paths are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Whether filtering is applied at all.
    pub enabled: bool,

    /// Include the built-in ignore lists.
    pub use_defaults: bool,

    /// Extra directory names to ignore anywhere in a path.
    pub ignore_dirs: Vec<String>,

    /// Extra file name patterns (`*` and `?` wildcards).
    pub ignore_patterns: Vec<String>,
}

impl FilterConfig {
    pub fn ignore_dir(mut self, name: impl Into<String>) -> Self {
        self.ignore_dirs.push(name.into());
        self
    }

    pub fn ignore_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.ignore_patterns.push(pattern.into());
        self
    }

    /// Drop the built-in ignore lists, keeping only explicit entries.
    pub fn without_defaults(mut self) -> Self {
        self.use_defaults = false;
        self
    }

    /// Report every path.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            use_defaults: true,
            ignore_dirs: Vec::new(),
            ignore_patterns: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_watch_set_keeps_first_seen_order() {
        let set = WatchSet::new(["src/", "docs/", "src/"]);

        assert_eq!(set.len(), 2);
        assert_eq!(set.paths(), &[PathBuf::from("src/"), PathBuf::from("docs/")]);
        assert_eq!(set.display(), "src/, docs/");
    }

    #[test]
    fn test_config_defaults() {
        let config = WatcherConfig::default();

        assert_eq!(config.debounce(), Duration::from_millis(1600));
        assert_eq!(config.step(), Duration::from_millis(50));
        assert!(config.recursive);
        assert_eq!(config.max_in_flight, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let config = WatcherConfig::from_toml_str(
            r#"
            debounce_ms = 500
            step_ms = 20
            max_in_flight = 1

            [filter]
            ignore_patterns = ["*.tmp"]
            "#,
        )
        .unwrap();

        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert_eq!(config.step(), Duration::from_millis(20));
        assert_eq!(config.max_in_flight, Some(1));
        assert_eq!(config.channel_capacity, 64);
        assert!(config.filter.use_defaults);
        assert_eq!(config.filter.ignore_patterns, vec!["*.tmp".to_string()]);
    }

    #[test]
    fn test_config_validation() {
        assert!(WatcherConfig::new().with_step(Duration::ZERO).validate().is_err());
        assert!(
            WatcherConfig::new()
                .with_debounce(Duration::from_millis(10))
                .with_step(Duration::from_millis(20))
                .validate()
                .is_err()
        );
        assert!(WatcherConfig::new().with_max_in_flight(0).validate().is_err());
        assert!(WatcherConfig::new().with_channel_capacity(0).validate().is_err());
        assert!(WatcherConfig::from_toml_str("step_ms = 0").is_err());
    }

    #[test]
    fn test_sub_millisecond_durations_round_up() {
        let config = WatcherConfig::new()
            .with_step(Duration::from_micros(300))
            .with_debounce(Duration::from_micros(1500))
            .with_polling(Duration::from_nanos(1));

        assert_eq!(config.step_ms, 1);
        assert_eq!(config.debounce_ms, 2);
        assert_eq!(config.poll_interval_ms, Some(1));
        assert!(config.validate().is_ok());

        let exact = WatcherConfig::new().with_step(Duration::from_millis(20));
        assert_eq!(exact.step_ms, 20);
        assert_eq!(WatcherConfig::new().with_step(Duration::ZERO).step_ms, 0);
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("watcher.toml");
        std::fs::write(&path, "recursive = false\npoll_interval_ms = 250\n").unwrap();

        let config = WatcherConfig::from_file(&path).unwrap();
        assert!(!config.recursive);
        assert_eq!(config.poll_interval(), Some(Duration::from_millis(250)));
    }
}
