//! Path filtering for change events.

use std::path::Path;

use wildmatch::WildMatch;

use crate::config::FilterConfig;

/// Directory names whose contents never trigger a regeneration.
pub const DEFAULT_IGNORED_DIRS: &[&str] = &[
    "__pycache__",
    ".git",
    ".hg",
    ".svn",
    ".tox",
    ".venv",
    ".idea",
    "node_modules",
    ".mypy_cache",
    ".pytest_cache",
    ".hypothesis",
];

/// File name patterns for editor droppings and compiled artifacts.
pub const DEFAULT_IGNORED_PATTERNS: &[&str] = &[
    "*.pyc",
    "*.pyo",
    "*.pyd",
    "*.___jb_*___",
    "*.sw?",
    "*~",
    ".#*",
    ".DS_Store",
    "flycheck_*",
];

/// Decides which paths are worth reporting.
#[derive(Debug, Clone)]
pub struct EventFilter {
    enabled: bool,
    ignored_dirs: Vec<String>,
    ignored_patterns: Vec<WildMatch>,
}

impl EventFilter {
    /// Build a filter from configuration.
    pub fn new(config: &FilterConfig) -> Self {
        let mut ignored_dirs: Vec<String> = Vec::new();
        let mut patterns: Vec<&str> = Vec::new();

        if config.use_defaults {
            ignored_dirs.extend(DEFAULT_IGNORED_DIRS.iter().map(|d| (*d).to_string()));
            patterns.extend(DEFAULT_IGNORED_PATTERNS);
        }
        ignored_dirs.extend(config.ignore_dirs.iter().cloned());
        patterns.extend(config.ignore_patterns.iter().map(String::as_str));

        Self {
            enabled: config.enabled,
            ignored_dirs,
            ignored_patterns: patterns.into_iter().map(WildMatch::new).collect(),
        }
    }

    /// A filter that accepts everything.
    pub fn allow_all() -> Self {
        Self {
            enabled: false,
            ignored_dirs: Vec::new(),
            ignored_patterns: Vec::new(),
        }
    }

    /// Check if a changed path should be reported.
    pub fn accepts(&self, path: &Path) -> bool {
        if !self.enabled {
            return true;
        }

        let in_ignored_dir = path.components().any(|component| {
            let name = component.as_os_str().to_string_lossy();
            self.ignored_dirs.iter().any(|dir| *dir == name)
        });
        if in_ignored_dir {
            return false;
        }

        match path.file_name() {
            Some(name) => {
                let name = name.to_string_lossy();
                !self.ignored_patterns.iter().any(|p| p.matches(&name))
            }
            None => true,
        }
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}
