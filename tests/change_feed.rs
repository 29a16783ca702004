use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use ulid::Ulid;

use allotment::engine::{AssignRequest, Engine};
use allotment::model::{CallerId, Capacity, Event, ItemSpec};
use allotment::notify::NotifyHub;
use allotment::sweeper;

// ── Test infrastructure ──────────────────────────────────────

fn data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("allotment_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn start_engine(wal: &PathBuf) -> (Arc<Engine>, Arc<NotifyHub>) {
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(wal.clone(), notify.clone()).unwrap());
    (engine, notify)
}

async fn next_event(rx: &mut broadcast::Receiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .unwrap()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn catalog_feed_follows_an_adhoc_lifecycle() {
    let wal = data_dir().join("feed.wal");
    let (engine, notify) = start_engine(&wal);
    let mut feed = notify.subscribe_catalog();
    let guest = CallerId::new("guest-1");

    let outcome = engine
        .assign_batch(
            AssignRequest::new(vec![], "Marta")
                .with_adhoc("Cast iron pan")
                .by(guest.clone()),
        )
        .await
        .unwrap();
    let adhoc = outcome.created_item_id.unwrap();

    match next_event(&mut feed).await {
        Event::ItemCreated { id, ephemeral, spec, .. } => {
            assert_eq!(id, adhoc);
            assert!(ephemeral);
            assert_eq!(spec.capacity, Capacity::SINGLE);
        }
        other => panic!("expected ItemCreated, got {other:?}"),
    }
    match next_event(&mut feed).await {
        Event::ReservationPlaced { item_id, caller, display_name, .. } => {
            assert_eq!(item_id, adhoc);
            assert_eq!(caller, Some(guest.clone()));
            assert_eq!(display_name, "Marta");
        }
        other => panic!("expected ReservationPlaced, got {other:?}"),
    }

    let done = engine.cancel(adhoc, &guest).await.unwrap();
    assert!(done.item_removed);

    assert!(matches!(
        next_event(&mut feed).await,
        Event::ReservationCancelled { id, .. } if id == done.reservation_id
    ));
    assert!(matches!(next_event(&mut feed).await, Event::ItemDeleted { id } if id == adhoc));
}

#[tokio::test]
async fn item_feed_ignores_other_items() {
    let wal = data_dir().join("scoped.wal");
    let (engine, notify) = start_engine(&wal);
    let watched = engine.create_item(ItemSpec::named("Blender")).await.unwrap();
    let other = engine.create_item(ItemSpec::named("Mixer")).await.unwrap();
    let mut rx = notify.subscribe(watched);

    engine
        .assign_batch(AssignRequest::new(vec![other, watched], "Iker"))
        .await
        .unwrap();

    assert!(matches!(
        next_event(&mut rx).await,
        Event::ReservationPlaced { item_id, .. } if item_id == watched
    ));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn restart_restores_projection() {
    let wal = data_dir().join("restart.wal");
    let guest = CallerId::new("guest-2");
    let item = {
        let (engine, _) = start_engine(&wal);
        let item = engine
            .create_item(ItemSpec::named("Espresso cups").with_capacity(Capacity::bounded(2).unwrap()))
            .await
            .unwrap();
        engine
            .assign_batch(AssignRequest::new(vec![item], "Olga").by(guest.clone()))
            .await
            .unwrap();
        item
    };

    let (engine, _) = start_engine(&wal);
    let views = engine.project(Some(&guest)).await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].id, item);
    assert_eq!(views[0].reserved_count, 1);
    assert!(views[0].my_reservation.is_some());
}

#[tokio::test]
async fn sweeper_reclaims_orphan_after_grace() {
    let wal = data_dir().join("sweep.wal");
    let (engine, notify) = start_engine(&wal);
    let orphan = engine
        .create_adhoc_item("Forgotten vase", "Pau")
        .await
        .unwrap();
    let mut rx = notify.subscribe(orphan);

    assert_eq!(sweeper::sweep_once(&engine, Duration::from_secs(60)).await, 0);
    assert!(engine.get_item(&orphan).is_some());

    assert_eq!(sweeper::sweep_once(&engine, Duration::ZERO).await, 1);
    assert!(matches!(next_event(&mut rx).await, Event::ItemDeleted { id } if id == orphan));
    assert!(engine.get_item(&orphan).is_none());
}
