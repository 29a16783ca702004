use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, ItemId};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed events, per item and catalog-wide.
///
/// Presentation code subscribes here to know when its rendered projection is stale.
pub struct NotifyHub {
    channels: DashMap<ItemId, broadcast::Sender<Event>>,
    catalog: broadcast::Sender<Event>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            catalog: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to one item. Creates the channel if needed.
    pub fn subscribe(&self, item_id: ItemId) -> broadcast::Receiver<Event> {
        self.channels
            .entry(item_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Subscribe to every committed event.
    pub fn subscribe_catalog(&self) -> broadcast::Receiver<Event> {
        self.catalog.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        let item_id = event.item_id();
        if let Some(sender) = self.channels.get(&item_id) {
            let _ = sender.send(event.clone());
        }
        let _ = self.catalog.send(event.clone());
        if matches!(event, Event::ItemDeleted { .. }) {
            self.channels.remove(&item_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn item_subscriber_sees_only_its_item() {
        let hub = NotifyHub::new();
        let watched = Ulid::new();
        let mut rx = hub.subscribe(watched);

        hub.send(&Event::ReservationsCleared { item_id: Ulid::new() });
        let event = Event::ReservationsCleared { item_id: watched };
        hub.send(&event);

        assert_eq!(rx.recv().await.unwrap(), event);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn catalog_subscriber_sees_everything() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe_catalog();
        let a = Event::ItemDeleted { id: Ulid::new() };
        let b = Event::ItemDeleted { id: Ulid::new() };
        hub.send(&a);
        hub.send(&b);
        assert_eq!(rx.recv().await.unwrap(), a);
        assert_eq!(rx.recv().await.unwrap(), b);
    }

    #[tokio::test]
    async fn delete_closes_item_channel() {
        let hub = NotifyHub::new();
        let id = Ulid::new();
        let mut rx = hub.subscribe(id);
        hub.send(&Event::ItemDeleted { id });
        assert_eq!(rx.recv().await.unwrap(), Event::ItemDeleted { id });
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Closed)));
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(&Event::ItemDeleted { id: Ulid::new() });
    }
}
