//! Change fan-out shared by the store backends.

use std::collections::HashMap;
use tokio::sync::watch;

use sharednotes_common::Note;

/// Pushes store changes to per-name and full-list watchers.
///
/// Not synchronized on its own: each backend keeps it behind the same lock as
/// its data, so a watcher can never observe a value older than what the
/// store already holds.
pub struct ChangeNotifier {
    watchers: HashMap<String, watch::Sender<Option<Note>>>,
    all: watch::Sender<Vec<Note>>,
}

impl ChangeNotifier {
    /// Create a notifier with no watchers.
    pub fn new() -> Self {
        let (all, _) = watch::channel(Vec::new());
        Self {
            watchers: HashMap::new(),
            all,
        }
    }

    /// Subscribe to a name, seeding a fresh channel with `current`.
    pub fn watch(&mut self, name: &str, current: Option<Note>) -> watch::Receiver<Option<Note>> {
        self.watchers
            .entry(name.to_string())
            .or_insert_with(|| watch::channel(current).0)
            .subscribe()
    }

    /// Subscribe to the full list, refreshing it to `current` first.
    pub fn watch_all(&mut self, current: Vec<Note>) -> watch::Receiver<Vec<Note>> {
        self.all.send_if_modified(|list| {
            if *list == current {
                false
            } else {
                *list = current;
                true
            }
        });
        self.all.subscribe()
    }

    /// Whether anyone is watching the full list.
    pub fn has_list_watchers(&self) -> bool {
        self.all.receiver_count() > 0
    }

    /// Publish the new value of `name`.
    pub fn notify(&mut self, name: &str, value: Option<Note>) {
        let closed = match self.watchers.get(name) {
            Some(sender) => {
                sender.send_replace(value);
                sender.is_closed()
            }
            None => false,
        };
        if closed {
            self.watchers.remove(name);
        }
    }

    /// Publish the new full list.
    pub fn notify_all(&mut self, list: Vec<Note>) {
        self.all.send_replace(list);
    }

    /// Number of names with a live channel.
    pub fn watched_names(&self) -> usize {
        self.watchers.len()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_starts_at_current() {
        let mut notifier = ChangeNotifier::new();
        let rx = notifier.watch("foo", Some(Note::with_version("foo", "a", 1)));
        assert_eq!(rx.borrow().as_ref().map(|n| n.version), Some(1));
    }

    #[tokio::test]
    async fn test_notify_reaches_watcher() {
        let mut notifier = ChangeNotifier::new();
        let mut rx = notifier.watch("foo", None);

        notifier.notify("foo", Some(Note::with_version("foo", "b", 2)));

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().unwrap().content, "b");
    }

    #[test]
    fn test_closed_channel_is_pruned() {
        let mut notifier = ChangeNotifier::new();
        let rx = notifier.watch("foo", None);
        assert_eq!(notifier.watched_names(), 1);

        drop(rx);
        notifier.notify("foo", None);
        assert_eq!(notifier.watched_names(), 0);
    }

    #[test]
    fn test_watch_all_refreshes_list() {
        let mut notifier = ChangeNotifier::new();
        assert!(!notifier.has_list_watchers());

        let rx = notifier.watch_all(vec![Note::new("a", "")]);
        assert!(notifier.has_list_watchers());
        assert_eq!(rx.borrow().len(), 1);
    }
}
