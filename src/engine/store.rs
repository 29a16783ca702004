use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::model::*;

pub type SharedItemState = Arc<RwLock<ItemState>>;

/// Items and their reservations.
///
/// Reservations live inside their owning `ItemState`, so dropping an item drops
/// its reservations with it.
pub struct ItemStore {
    items: DashMap<ItemId, SharedItemState>,
}

impl Default for ItemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemStore {
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
        }
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn get_item(&self, id: &ItemId) -> Option<SharedItemState> {
        self.items.get(id).map(|e| e.value().clone())
    }

    pub fn insert_item(&self, state: ItemState) -> SharedItemState {
        let id = state.id;
        let shared = Arc::new(RwLock::new(state));
        self.items.insert(id, shared.clone());
        shared
    }

    pub fn item_handles(&self) -> Vec<SharedItemState> {
        self.items.iter().map(|e| e.value().clone()).collect()
    }

    /// Total reservations over items not currently write-locked. Exact when
    /// nothing is committing, as at startup.
    pub fn reservation_count(&self) -> usize {
        self.item_handles()
            .iter()
            .filter_map(|shared| shared.try_read().ok().map(|g| g.reserved_count()))
            .sum()
    }

    /// Apply an event to an item the caller has locked for writing.
    ///
    /// `ItemCreated` never reaches here; creation goes through `insert_item`.
    pub fn apply_event(&self, item: &mut ItemState, event: &Event) {
        match event {
            Event::ItemUpdated { spec, updated_at, .. } => {
                item.spec = spec.clone();
                item.updated_at = *updated_at;
            }
            Event::ItemDeleted { id } => {
                item.reservations.clear();
                item.deleted = true;
                self.items.remove(id);
            }
            Event::ReservationPlaced {
                id,
                item_id,
                caller,
                display_name,
                created_at,
            } => {
                item.insert_reservation(Reservation {
                    id: *id,
                    item_id: *item_id,
                    caller: caller.clone(),
                    display_name: display_name.clone(),
                    created_at: *created_at,
                });
            }
            Event::ReservationCancelled { id, .. } => {
                item.remove_reservation(*id);
            }
            Event::ReservationsCleared { .. } => {
                item.reservations.clear();
            }
            Event::ItemCreated { .. } => {}
        }
    }

    /// Rebuild state from a replayed log. The store is not yet shared, so every
    /// lock is uncontended.
    ///
    /// A reservation that would overfill a bounded item is dropped: the log
    /// can never legitimately hold one, and replay must not overbook.
    pub fn replay(&self, events: &[Event]) {
        for event in events {
            match event {
                Event::ItemCreated {
                    id,
                    spec,
                    ephemeral,
                    created_at,
                } => {
                    self.insert_item(ItemState::new(*id, spec.clone(), *ephemeral, *created_at));
                }
                other => {
                    let Some(shared) = self.get_item(&other.item_id()) else {
                        tracing::warn!("replay: event for unknown item {}", other.item_id());
                        continue;
                    };
                    let Ok(mut guard) = shared.try_write() else {
                        tracing::warn!("replay: item {} unexpectedly locked", other.item_id());
                        continue;
                    };
                    if let Event::ReservationPlaced { id, .. } = other
                        && !guard.spec.capacity.admits(guard.reserved_count())
                    {
                        tracing::warn!(
                            item = %guard.id,
                            reservation = %id,
                            "replay: reservation beyond capacity skipped"
                        );
                        continue;
                    }
                    self.apply_event(&mut guard, other);
                }
            }
        }
    }
}
