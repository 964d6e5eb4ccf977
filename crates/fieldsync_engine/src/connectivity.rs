//! Host connectivity signal.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Tracks whether the host currently reports network connectivity.
///
/// The host adapter calls [`NetworkMonitor::set_online`] from its own
/// online/offline events. Listeners get a `watch` receiver; a transition
/// from offline to online is the "connectivity restored" signal.
///
/// Cloning is cheap and all clones share one state.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    /// Creates a monitor with the given initial state.
    pub fn new(online: bool) -> Self {
        Self {
            tx: Arc::new(watch::channel(online).0),
        }
    }

    /// Returns true if the host reports connectivity.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Updates the connectivity state. Returns true if it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "connectivity changed");
        }
        changed
    }

    /// Subscribes to connectivity changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_online_reports_changes_only() {
        let monitor = NetworkMonitor::new(false);
        assert!(!monitor.is_online());
        assert!(monitor.set_online(true));
        assert!(!monitor.set_online(true));
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let monitor = NetworkMonitor::new(false);
        let mut rx = monitor.subscribe();
        let clone = monitor.clone();

        clone.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(monitor.is_online());
    }
}
