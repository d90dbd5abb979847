//! Change events and the batches they are delivered in.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Kind of change observed for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Path was created, or renamed into place.
    Added,

    /// Contents or metadata changed.
    Modified,

    /// Path was deleted, or renamed away.
    Removed,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observed change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeEvent {
    /// The kind of change.
    pub kind: ChangeKind,

    /// Path to the affected file or directory.
    pub path: PathBuf,
}

impl ChangeEvent {
    /// Create a new change event.
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn added(path: impl Into<PathBuf>) -> Self {
        Self::new(ChangeKind::Added, path)
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(ChangeKind::Modified, path)
    }

    pub fn removed(path: impl Into<PathBuf>) -> Self {
        Self::new(ChangeKind::Removed, path)
    }

    /// Translate a raw `notify` event into zero or more change events.
    ///
    /// Access notifications carry no change and produce nothing. A rename
    /// reported with both endpoints yields the removal of the old path
    /// followed by the addition of the new one.
    pub fn from_notify(event: &notify::Event) -> Vec<Self> {
        use notify::EventKind;
        use notify::event::{ModifyKind, RenameMode};

        let kind = match event.kind {
            EventKind::Access(_) => return Vec::new(),
            EventKind::Create(_) => ChangeKind::Added,
            EventKind::Remove(_) => ChangeKind::Removed,
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => ChangeKind::Removed,
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => ChangeKind::Added,
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
                return vec![
                    Self::removed(event.paths[0].clone()),
                    Self::added(event.paths[1].clone()),
                ];
            }
            EventKind::Modify(_) | EventKind::Any | EventKind::Other => ChangeKind::Modified,
        };

        event
            .paths
            .iter()
            .map(|path| Self::new(kind, path.clone()))
            .collect()
    }
}

/// A non-empty, ordered group of changes from one notification cycle.
///
/// Batches are only built through [`ChangeBatch::new`] or
/// [`BatchBuilder::finish`], both of which refuse to produce an empty batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    events: Vec<ChangeEvent>,
}

impl ChangeBatch {
    /// Wrap `events` into a batch, or `None` if there are none.
    pub fn new(events: Vec<ChangeEvent>) -> Option<Self> {
        if events.is_empty() {
            return None;
        }
        Some(Self { events })
    }

    /// Events in emission order.
    pub fn events(&self) -> &[ChangeEvent] {
        &self.events
    }

    /// Changed paths in emission order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.events.iter().map(|event| event.path.as_path())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_events(self) -> Vec<ChangeEvent> {
        self.events
    }
}

impl IntoIterator for ChangeBatch {
    type Item = ChangeEvent;
    type IntoIter = std::vec::IntoIter<ChangeEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

impl<'a> IntoIterator for &'a ChangeBatch {
    type Item = &'a ChangeEvent;
    type IntoIter = std::slice::Iter<'a, ChangeEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// Accumulates the events of one notification cycle.
///
/// Exact duplicates (same kind and path) are kept only once, at the position
/// of their first occurrence.
#[derive(Debug, Default)]
pub struct BatchBuilder {
    events: Vec<ChangeEvent>,
    seen: HashSet<ChangeEvent>,
}

impl BatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event to the pending cycle.
    pub fn push(&mut self, event: ChangeEvent) {
        if self.seen.insert(event.clone()) {
            self.events.push(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Close the cycle, leaving the builder empty.
    pub fn finish(&mut self) -> Option<ChangeBatch> {
        self.seen.clear();
        ChangeBatch::new(std::mem::take(&mut self.events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, ModifyKind, RemoveKind, RenameMode};
    use notify::{Event, EventKind};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_batch_is_rejected() {
        assert!(ChangeBatch::new(Vec::new()).is_none());
        assert!(BatchBuilder::new().finish().is_none());
    }

    #[test]
    fn test_batch_preserves_order() {
        let batch = ChangeBatch::new(vec![
            ChangeEvent::modified("/src/b.rs"),
            ChangeEvent::added("/src/a.rs"),
        ])
        .unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.events()[0].path, Path::new("/src/b.rs"));
        assert_eq!(batch.events()[1].kind, ChangeKind::Added);
    }

    #[test]
    fn test_builder_collapses_exact_duplicates() {
        let mut builder = BatchBuilder::new();
        builder.push(ChangeEvent::modified("/src/a.rs"));
        builder.push(ChangeEvent::modified("/src/b.rs"));
        builder.push(ChangeEvent::modified("/src/a.rs"));
        builder.push(ChangeEvent::removed("/src/a.rs"));

        let batch = builder.finish().unwrap();
        assert_eq!(
            batch.into_events(),
            vec![
                ChangeEvent::modified("/src/a.rs"),
                ChangeEvent::modified("/src/b.rs"),
                ChangeEvent::removed("/src/a.rs"),
            ]
        );
        assert!(builder.is_empty());
    }

    #[test]
    fn test_notify_kind_mapping() {
        let create = Event::new(EventKind::Create(CreateKind::File)).add_path("/a".into());
        assert_eq!(
            ChangeEvent::from_notify(&create),
            vec![ChangeEvent::added("/a")]
        );

        let write = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path("/a".into());
        assert_eq!(
            ChangeEvent::from_notify(&write),
            vec![ChangeEvent::modified("/a")]
        );

        let remove = Event::new(EventKind::Remove(RemoveKind::File)).add_path("/a".into());
        assert_eq!(
            ChangeEvent::from_notify(&remove),
            vec![ChangeEvent::removed("/a")]
        );

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path("/a".into());
        assert!(ChangeEvent::from_notify(&access).is_empty());
    }

    #[test]
    fn test_rename_both_splits_into_remove_and_add() {
        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/old".into())
            .add_path("/new".into());

        assert_eq!(
            ChangeEvent::from_notify(&rename),
            vec![ChangeEvent::removed("/old"), ChangeEvent::added("/new")]
        );
    }
}
