//! Live dashboard sync
//!
//! Listens to the inventory event bus and pushes a fresh summary plus the
//! recent-activity list to every session subscribed to the changed
//! subscription. Sessions move through
//! `Connected -> Subscribed(subscription) -> Disconnected`; nothing is pushed
//! before `Subscribed`. A session whose channel is closed is dropped without
//! affecting the others.

use crate::error::{Result, SnapshotError};
use crate::inventory::InventoryIndex;
use crate::metrics::SnapshotMetrics;
use crate::summary::{summarize, TimeWindow};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use snapshot_shared::{DashboardUpdate, InventoryEvent, ServerMessage};
use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberState {
    Connected,
    Subscribed(String),
    Disconnected,
}

#[derive(Debug)]
struct Subscriber {
    state: SubscriberState,
    sender: mpsc::UnboundedSender<ServerMessage>,
    /// Sequence of the last update delivered; never goes backwards
    last_sequence: Option<u64>,
    connected_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct LiveSyncPublisher {
    index: Arc<InventoryIndex>,
    subscribers: Arc<DashMap<String, Subscriber>>,
    metrics: SnapshotMetrics,
}

impl LiveSyncPublisher {
    pub fn new(index: Arc<InventoryIndex>, metrics: SnapshotMetrics) -> Self {
        Self {
            index,
            subscribers: Arc::new(DashMap::new()),
            metrics,
        }
    }

    /// Register a session. The receiver yields everything pushed to it.
    pub fn connect(&self) -> (String, mpsc::UnboundedReceiver<ServerMessage>) {
        let subscriber_id = Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(ServerMessage::Connected {
            subscriber_id: subscriber_id.clone(),
        });
        self.subscribers.insert(
            subscriber_id.clone(),
            Subscriber {
                state: SubscriberState::Connected,
                sender,
                last_sequence: None,
                connected_at: Utc::now(),
            },
        );
        self.metrics.set_live_subscribers(self.subscribers.len());
        info!(subscriber_id = %subscriber_id, "Live subscriber connected");
        (subscriber_id, receiver)
    }

    /// Start following a subscription and receive its current state at once
    pub fn subscribe(&self, subscriber_id: &str, subscription_id: &str) -> Result<()> {
        if self.index.subscription(subscription_id).is_none() {
            return Err(SnapshotError::not_found(format!("subscription {}", subscription_id)));
        }
        {
            let mut subscriber = self
                .subscribers
                .get_mut(subscriber_id)
                .ok_or_else(|| SnapshotError::not_found(format!("subscriber {}", subscriber_id)))?;
            subscriber.state = SubscriberState::Subscribed(subscription_id.to_string());
            subscriber.last_sequence = None;
        }
        debug!(subscriber_id, subscription_id, "Live subscriber subscribed");

        let update = self.build_update(subscription_id);
        self.deliver(&update);
        Ok(())
    }

    pub fn unsubscribe(&self, subscriber_id: &str) -> Result<()> {
        let mut subscriber = self
            .subscribers
            .get_mut(subscriber_id)
            .ok_or_else(|| SnapshotError::not_found(format!("subscriber {}", subscriber_id)))?;
        subscriber.state = SubscriberState::Connected;
        subscriber.last_sequence = None;
        Ok(())
    }

    /// Terminal; the session is forgotten
    pub fn disconnect(&self, subscriber_id: &str) {
        if let Some((_, subscriber)) = self.subscribers.remove(subscriber_id) {
            let connected_for = Utc::now() - subscriber.connected_at;
            info!(
                subscriber_id,
                seconds = connected_for.num_seconds(),
                "Live subscriber disconnected"
            );
        }
        self.metrics.set_live_subscribers(self.subscribers.len());
    }

    /// `Disconnected` for sessions that are gone
    pub fn state(&self, subscriber_id: &str) -> SubscriberState {
        self.subscribers
            .get(subscriber_id)
            .map(|s| s.state.clone())
            .unwrap_or(SubscriberState::Disconnected)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Direct reply to one session (pong, errors)
    pub fn send_to(&self, subscriber_id: &str, message: ServerMessage) -> bool {
        let delivered = self
            .subscribers
            .get(subscriber_id)
            .map(|s| s.sender.send(message).is_ok())
            .unwrap_or(false);
        if !delivered {
            self.disconnect(subscriber_id);
        }
        delivered
    }

    pub fn build_update(&self, subscription_id: &str) -> DashboardUpdate {
        let view = self.index.view(subscription_id);
        DashboardUpdate {
            subscription_id: subscription_id.to_string(),
            sequence: view.sequence,
            summary: summarize(subscription_id, &view.snapshots, TimeWindow::default(), view.as_of),
            recent_activity: view.recent_activity,
        }
    }

    /// Push to every matching session; returns how many received it
    pub fn deliver(&self, update: &DashboardUpdate) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for mut entry in self.subscribers.iter_mut() {
            let subscriber = entry.value_mut();
            let matches = matches!(
                &subscriber.state,
                SubscriberState::Subscribed(sub) if sub == &update.subscription_id
            );
            if !matches || subscriber.last_sequence.map_or(false, |s| s >= update.sequence) {
                continue;
            }
            if subscriber
                .sender
                .send(ServerMessage::DashboardUpdate(update.clone()))
                .is_ok()
            {
                subscriber.last_sequence = Some(update.sequence);
                delivered += 1;
            } else {
                dead.push(entry.key().clone());
            }
        }

        for subscriber_id in dead {
            warn!(subscriber_id = %subscriber_id, "Dropping unreachable live subscriber");
            self.disconnect(&subscriber_id);
        }
        delivered
    }

    /// Recompute once per affected subscription, in order of first appearance
    pub fn publish_batch(&self, events: &[InventoryEvent]) -> usize {
        let mut affected: Vec<&str> = Vec::new();
        for event in events {
            if !affected.contains(&event.subscription_id.as_str()) {
                affected.push(&event.subscription_id);
            }
        }
        affected
            .into_iter()
            .map(|subscription_id| {
                let update = self.build_update(subscription_id);
                self.deliver(&update)
            })
            .sum()
    }

    fn resync_all(&self) {
        let mut subscriptions: Vec<String> = self
            .subscribers
            .iter()
            .filter_map(|s| match &s.state {
                SubscriberState::Subscribed(sub) => Some(sub.clone()),
                _ => None,
            })
            .collect();
        subscriptions.sort();
        subscriptions.dedup();
        for subscription_id in subscriptions {
            let update = self.build_update(&subscription_id);
            self.deliver(&update);
        }
    }

    /// Follow the event bus until cancelled. The bus is joined before this returns.
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let mut events = self.index.subscribe();
        let publisher = self.clone();

        tokio::spawn(async move {
            info!("Live sync publisher started");
            loop {
                let first = tokio::select! {
                    received = events.recv() => received,
                    _ = cancel.cancelled() => break,
                };

                match first {
                    Ok(event) => {
                        let mut batch = vec![event];
                        let mut lagged = false;
                        loop {
                            match events.try_recv() {
                                Ok(event) => batch.push(event),
                                Err(TryRecvError::Lagged(_)) => lagged = true,
                                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                            }
                        }
                        if lagged {
                            publisher.resync_all();
                        } else {
                            publisher.publish_batch(&batch);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Live sync fell behind the event bus, resyncing");
                        publisher.resync_all();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            info!("Live sync publisher stopped");
        })
    }
}
