use futures::future::try_join_all;
use tokio::sync::RwLockReadGuard;

use crate::model::*;

use super::{Engine, EngineError, SharedItemState};

impl Engine {
    async fn read_item<'a>(
        &self,
        shared: &'a SharedItemState,
    ) -> Result<RwLockReadGuard<'a, ItemState>, EngineError> {
        tokio::time::timeout(self.options.read_timeout, shared.read())
            .await
            .map_err(|_| EngineError::ReadFailed("timed out waiting for item lock".into()))
    }

    async fn collect_views(
        &self,
        caller: Option<&CallerId>,
        include_inactive: bool,
    ) -> Result<Vec<ItemView>, EngineError> {
        let handles = self.store.item_handles();
        let reads = handles.iter().map(|shared| async move {
            let guard = self.read_item(shared).await?;
            let visible = !guard.deleted && (include_inactive || guard.spec.active);
            Ok::<_, EngineError>(visible.then(|| ItemView::build(&guard, caller)))
        });
        let mut views: Vec<ItemView> = try_join_all(reads).await?.into_iter().flatten().collect();
        views.sort_by_key(|v| (v.priority, v.created_at, v.id));
        Ok(views)
    }

    /// Caller-facing catalog: active items ordered by priority, then age.
    pub async fn project(&self, caller: Option<&CallerId>) -> Result<Vec<ItemView>, EngineError> {
        self.collect_views(caller, false).await
    }

    /// Administrative catalog, inactive items included.
    pub async fn project_all(&self) -> Result<Vec<ItemView>, EngineError> {
        self.collect_views(None, true).await
    }

    /// One item as `caller` would see it. Inactive items are only visible here
    /// when `include_inactive` is set.
    pub async fn item_view(
        &self,
        id: ItemId,
        caller: Option<&CallerId>,
        include_inactive: bool,
    ) -> Result<Option<ItemView>, EngineError> {
        let Some(shared) = self.store.get_item(&id) else {
            return Ok(None);
        };
        let guard = self.read_item(&shared).await?;
        if guard.deleted || (!include_inactive && !guard.spec.active) {
            return Ok(None);
        }
        Ok(Some(ItemView::build(&guard, caller)))
    }
}
