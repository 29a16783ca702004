//! Catalog administration: the thin write path the admin collaborator drives.

use crate::model::*;

use super::capacity::validate_spec;
use super::{Engine, EngineError};

impl Engine {
    pub async fn create_item(&self, spec: ItemSpec) -> Result<ItemId, EngineError> {
        validate_spec(&spec)?;
        let id = self.insert_new_item(spec, false).await?;
        tracing::info!(item = %id, "item created");
        Ok(id)
    }

    /// Replace an item's spec. A bounded capacity below the current
    /// reservation count is refused rather than leaving the item overbooked.
    pub async fn update_item(&self, id: ItemId, spec: ItemSpec) -> Result<(), EngineError> {
        validate_spec(&spec)?;
        let (_permit, mut guard) = self.lock_item_for_commit(id).await?;
        if let Some(limit) = spec.capacity.limit()
            && (limit as usize) < guard.reserved_count()
        {
            return Err(EngineError::CapacityBelowReserved {
                item_id: id,
                capacity: limit,
                reserved: guard.reserved_count(),
            });
        }
        let event = Event::ItemUpdated {
            id,
            spec,
            updated_at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn set_item_active(&self, id: ItemId, active: bool) -> Result<(), EngineError> {
        let (_permit, mut guard) = self.lock_item_for_commit(id).await?;
        if guard.spec.active == active {
            return Ok(());
        }
        let mut spec = guard.spec.clone();
        spec.active = active;
        let event = Event::ItemUpdated {
            id,
            spec,
            updated_at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Delete an item and every reservation on it.
    pub async fn delete_item(&self, id: ItemId) -> Result<(), EngineError> {
        let (_permit, mut guard) = self.lock_item_for_commit(id).await?;
        let dropped = guard.reserved_count();
        self.persist_and_apply(&mut guard, &Event::ItemDeleted { id })
            .await?;
        tracing::info!(item = %id, reservations = dropped, "item deleted");
        Ok(())
    }

    /// Remove every reservation on an item, keeping the item. Returns how many were removed.
    pub async fn clear_reservations(&self, id: ItemId) -> Result<usize, EngineError> {
        let (_permit, mut guard) = self.lock_item_for_commit(id).await?;
        let cleared = guard.reserved_count();
        if cleared == 0 {
            return Ok(0);
        }
        self.persist_and_apply(&mut guard, &Event::ReservationsCleared { item_id: id })
            .await?;
        tracing::info!(item = %id, cleared, "reservations cleared");
        Ok(cleared)
    }
}
