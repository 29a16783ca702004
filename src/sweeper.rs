use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::model::{now_ms, Ms};

/// One pass: delete ephemeral items that hold nothing and are older than `grace`.
///
/// A failure on one item is logged and the pass moves on to the rest.
pub async fn sweep_once(engine: &Engine, grace: Duration) -> usize {
    let cutoff = now_ms() - grace.as_millis() as Ms;
    let mut swept = 0;
    for item_id in engine.orphan_candidates(cutoff) {
        match engine.sweep_orphan(item_id, cutoff).await {
            Ok(true) => {
                info!(item = %item_id, "swept orphaned ad-hoc item");
                swept += 1;
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(item = %item_id, "could not sweep orphaned item: {e}"),
        }
    }
    if swept > 0 {
        metrics::counter!(crate::observability::ITEMS_SWEPT_TOTAL).increment(swept as u64);
    }
    swept
}

/// Background task that periodically reclaims orphaned ephemeral items.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration, grace: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_once(&engine, grace).await;
    }
}

/// Background task that compacts the WAL once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, every: Duration, threshold: u64) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(appends, "compacted WAL"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AssignRequest;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("allotment_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn sweeper_reclaims_emptied_adhoc_items() {
        let engine = Arc::new(Engine::new(test_wal_path("reclaim.wal"), Arc::new(NotifyHub::new())).unwrap());

        let outcome = engine
            .assign_batch(AssignRequest::new(vec![], "Iris").with_adhoc("Hand-knit blanket"))
            .await
            .unwrap();
        let adhoc = outcome.created_item_id.unwrap();

        // Admin clear bypasses the cancellation cleanup path.
        engine.clear_reservations(adhoc).await.unwrap();
        assert!(engine.get_item(&adhoc).is_some());

        assert_eq!(sweep_once(&engine, Duration::ZERO).await, 1);
        assert!(engine.get_item(&adhoc).is_none());
    }

    #[tokio::test]
    async fn sweeper_respects_grace_period() {
        let engine = Arc::new(Engine::new(test_wal_path("grace.wal"), Arc::new(NotifyHub::new())).unwrap());
        let fresh = engine.create_adhoc_item("Paper lantern", "Omar").await.unwrap();

        assert_eq!(sweep_once(&engine, Duration::from_secs(3600)).await, 0);
        assert!(engine.get_item(&fresh).is_some());
    }

    #[tokio::test]
    async fn one_failed_delete_does_not_stop_the_pass() {
        let engine = Arc::new(Engine::new(test_wal_path("partial_pass.wal"), Arc::new(NotifyHub::new())).unwrap());
        let first = engine.create_adhoc_item("Clay pot", "Yusuf").await.unwrap();
        let second = engine.create_adhoc_item("Wind chime", "Yusuf").await.unwrap();

        engine.fail_flushes(0, 1);
        assert_eq!(sweep_once(&engine, Duration::ZERO).await, 1);
        let left = [first, second].iter().filter(|id| engine.get_item(id).is_some()).count();
        assert_eq!(left, 1);

        assert_eq!(sweep_once(&engine, Duration::ZERO).await, 1);
        assert_eq!(engine.item_count(), 0);
    }

    #[tokio::test]
    async fn sweeper_ignores_catalog_items() {
        let engine = Arc::new(Engine::new(test_wal_path("catalog.wal"), Arc::new(NotifyHub::new())).unwrap());
        let item = engine.create_item(ItemSpec::named("Blender")).await.unwrap();

        assert_eq!(sweep_once(&engine, Duration::ZERO).await, 0);
        assert!(engine.get_item(&item).is_some());
    }
}
