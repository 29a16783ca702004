use ulid::Ulid;

use crate::limits::MAX_ITEMS;
use crate::model::*;

use super::capacity::{validate_adhoc_description, validate_display_name};
use super::{Engine, EngineError};

impl Engine {
    /// Durably create an item and publish it. Shared by the ad-hoc factory and administration.
    pub(super) async fn insert_new_item(
        &self,
        spec: ItemSpec,
        ephemeral: bool,
    ) -> Result<ItemId, EngineError> {
        if self.store.item_count() >= MAX_ITEMS {
            return Err(EngineError::LimitExceeded("too many items"));
        }
        let _permit = self.commit_gate.read().await;
        let id = Ulid::new();
        let created_at = now_ms();
        let event = Event::ItemCreated {
            id,
            spec: spec.clone(),
            ephemeral,
            created_at,
        };
        self.wal_append(&event).await?;
        self.store
            .insert_item(ItemState::new(id, spec, ephemeral, created_at));
        self.notify.send(&event);
        Ok(id)
    }

    /// Materialise a single-capacity, active, ephemeral item named after `description`.
    ///
    /// No reservation is placed; the caller reserves the returned item itself.
    pub async fn create_adhoc_item(
        &self,
        description: &str,
        display_name: &str,
    ) -> Result<ItemId, EngineError> {
        let name = validate_adhoc_description(description)?;
        let reserved_by = validate_display_name(display_name)?;
        let spec = ItemSpec {
            name,
            description: Some(format!("Ad-hoc item reserved by {reserved_by}")),
            url: None,
            category: None,
            recipient: None,
            priority: 0,
            capacity: Capacity::SINGLE,
            active: true,
        };
        let id = self.insert_new_item(spec, true).await?;
        metrics::counter!(crate::observability::ADHOC_ITEMS_CREATED_TOTAL).increment(1);
        tracing::debug!(item = %id, "ad-hoc item created");
        Ok(id)
    }
}
