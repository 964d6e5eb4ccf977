//! Wake bridge: turns host signals into flush attempts.
//!
//! The bridge listens to two sources and never touches queue contents:
//!
//! - the connectivity monitor, where a change that leaves the host online
//!   means "connectivity restored". The monitor only publishes real
//!   changes, and the channel keeps just the latest value, so an
//!   offline-then-online flap seen late still reads as one "online"
//! - the background channel, where a [`WakeMessage::SyncRequested`] from
//!   the background context means "flush now"

use crate::background::BackgroundChannel;
use crate::connectivity::NetworkMonitor;
use async_trait::async_trait;
use fieldsync_protocol::WakeMessage;
use std::sync::Weak;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Something that can flush pending queues on request.
#[async_trait]
pub trait FlushTarget: Send + Sync {
    /// Attempts to flush every pending queue this target owns.
    async fn flush_pending(&self);
}

/// Why the bridge asked for a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The host went from offline to online.
    ConnectivityRestored,
    /// The background context asked for a flush.
    BackgroundWake,
}

/// Multiplexes connectivity and background-wake signals into triggers.
#[derive(Debug)]
pub struct WakeBridge {
    network: watch::Receiver<bool>,
    messages: broadcast::Receiver<WakeMessage>,
    network_open: bool,
    messages_open: bool,
}

impl WakeBridge {
    /// Subscribes to both sources. Signals sent before this call are not
    /// seen.
    pub fn new(network: &NetworkMonitor, channel: &BackgroundChannel) -> Self {
        Self {
            network: network.subscribe(),
            messages: channel.subscribe(),
            network_open: true,
            messages_open: true,
        }
    }

    /// Waits for the next trigger. Returns `None` once both sources are
    /// closed.
    pub async fn next_trigger(&mut self) -> Option<Trigger> {
        loop {
            tokio::select! {
                biased;

                changed = self.network.changed(), if self.network_open => match changed {
                    Ok(()) => {
                        if *self.network.borrow_and_update() {
                            return Some(Trigger::ConnectivityRestored);
                        }
                    }
                    Err(_) => self.network_open = false,
                },
                message = self.messages.recv(), if self.messages_open => match message {
                    Ok(WakeMessage::SyncRequested) => return Some(Trigger::BackgroundWake),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "wake messages coalesced");
                        return Some(Trigger::BackgroundWake);
                    }
                    Err(RecvError::Closed) => self.messages_open = false,
                },
                else => return None,
            }
        }
    }

    /// Runs the bridge on a new task, flushing `target` on every trigger.
    ///
    /// The task stops when `target` is dropped or both sources close.
    pub fn spawn<T>(mut self, target: Weak<T>) -> JoinHandle<()>
    where
        T: FlushTarget + ?Sized + 'static,
    {
        tokio::spawn(async move {
            while let Some(trigger) = self.next_trigger().await {
                let Some(target) = target.upgrade() else {
                    break;
                };
                debug!(?trigger, "flush triggered");
                target.flush_pending().await;
            }
            debug!("wake bridge stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn offline_to_online_is_restored() {
        let network = NetworkMonitor::new(false);
        let channel = BackgroundChannel::new();
        let mut bridge = WakeBridge::new(&network, &channel);

        network.set_online(true);
        assert_eq!(
            bridge.next_trigger().await,
            Some(Trigger::ConnectivityRestored)
        );
    }

    #[tokio::test]
    async fn going_offline_is_not_a_trigger() {
        let network = NetworkMonitor::new(true);
        let channel = BackgroundChannel::new();
        let mut bridge = WakeBridge::new(&network, &channel);

        network.set_online(false);
        channel.post(WakeMessage::SyncRequested);
        assert_eq!(bridge.next_trigger().await, Some(Trigger::BackgroundWake));
    }

    #[tokio::test]
    async fn unobserved_flap_is_restored() {
        let network = NetworkMonitor::new(true);
        let channel = BackgroundChannel::new();
        let mut bridge = WakeBridge::new(&network, &channel);

        network.set_online(false);
        network.set_online(true);
        let trigger = tokio::time::timeout(Duration::from_millis(200), bridge.next_trigger()).await;
        assert_eq!(trigger.unwrap(), Some(Trigger::ConnectivityRestored));
    }

    #[tokio::test]
    async fn closed_sources_end_the_stream() {
        let network = NetworkMonitor::new(false);
        let channel = BackgroundChannel::new();
        let mut bridge = WakeBridge::new(&network, &channel);
        drop(network);
        drop(channel);
        assert_eq!(bridge.next_trigger().await, None);
    }

    struct Counter(AtomicUsize);

    #[async_trait]
    impl FlushTarget for Counter {
        async fn flush_pending(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn spawned_bridge_flushes_target() {
        let network = NetworkMonitor::new(false);
        let channel = BackgroundChannel::new();
        let target = Arc::new(Counter(AtomicUsize::new(0)));
        let handle = WakeBridge::new(&network, &channel).spawn(Arc::downgrade(&target));

        channel.post(WakeMessage::SyncRequested);
        while target.0.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        drop(target);
        network.set_online(true);
        handle.await.unwrap();
    }
}
