mod admin;
mod capacity;
mod error;
mod factory;
mod mutations;
mod queries;
mod retry;
mod store;

pub use error::EngineError;
pub use mutations::AssignRequest;
pub use retry::RetryPolicy;
pub use store::{ItemStore, SharedItemState};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};

use crate::config::EngineOptions;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
    tracing::debug!("WAL writer stopped: all senders dropped");
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    let result = match append_err {
        Some(e) => Err(e),
        None => wal.flush_sync(),
    };
    // Every caller in a failed batch is told so, and will retry; none of the
    // batch may reach disk behind their back.
    if result.is_err()
        && let Err(e) = wal.rollback()
    {
        tracing::error!("WAL rollback after failed flush also failed: {e}");
    }
    result
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// The reservation allocation engine.
///
/// Each item sits behind its own `RwLock`. Every capacity decision and the
/// write it guards happen under that item's write lock, with the WAL append
/// in between, so a check and its insert are never separable. Readers only
/// ever observe committed state.
pub struct Engine {
    pub(super) store: ItemStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) options: EngineOptions,
    /// Commits hold this shared; compaction holds it exclusively so no append
    /// can land between its snapshot and the file swap. Always taken before
    /// any item lock.
    pub(super) commit_gate: Arc<RwLock<()>>,
    #[cfg(test)]
    flush_faults: crate::wal::FlushFaults,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Self::with_options(wal_path, notify, EngineOptions::default())
    }

    /// Replay the WAL at `wal_path` and start its writer task. Must run inside a Tokio runtime.
    pub fn with_options(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        options: EngineOptions,
    ) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        #[cfg(test)]
        let flush_faults = wal.faults();
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = ItemStore::new();
        store.replay(&events);
        tracing::info!(
            events = events.len(),
            items = store.item_count(),
            reservations = store.reservation_count(),
            "engine replayed {}",
            wal_path.display()
        );

        Ok(Self {
            store,
            wal_tx,
            notify,
            options,
            commit_gate: Arc::new(RwLock::new(())),
            #[cfg(test)]
            flush_faults,
        })
    }

    /// Let `pass` WAL flushes succeed, then fail the next `fail`.
    #[cfg(test)]
    pub(crate) fn fail_flushes(&self, pass: usize, fail: usize) {
        self.flush_faults.arm(pass, fail);
    }

    pub fn get_item(&self, id: &ItemId) -> Option<SharedItemState> {
        self.store.get_item(id)
    }

    pub fn item_count(&self) -> usize {
        self.store.item_count()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::TransientStore("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::TransientStore("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::TransientStore(e.to_string()))
    }

    /// True once the WAL writer can no longer accept appends.
    pub(super) fn store_unavailable(&self) -> bool {
        self.wal_tx.is_closed()
    }

    /// WAL-append + apply + notify. The caller holds the item's write lock and a commit permit.
    pub(super) async fn persist_and_apply(
        &self,
        item: &mut ItemState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(item, event);
        self.notify.send(event);
        Ok(())
    }

    /// Take a commit permit, then the item's write lock. Tombstoned items read as missing.
    pub(super) async fn lock_item_for_commit(
        &self,
        item_id: ItemId,
    ) -> Result<(tokio::sync::OwnedRwLockReadGuard<()>, OwnedRwLockWriteGuard<ItemState>), EngineError>
    {
        let permit = self.commit_gate.clone().read_owned().await;
        let shared = self
            .store
            .get_item(&item_id)
            .ok_or(EngineError::NotFound(item_id))?;
        let guard = shared.write_owned().await;
        if guard.deleted {
            return Err(EngineError::NotFound(item_id));
        }
        Ok((permit, guard))
    }

    /// Compact the WAL down to the events that recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.commit_gate.write().await;

        let mut snapshot = Vec::new();
        for shared in self.store.item_handles() {
            snapshot.push(shared.read().await.clone());
        }
        snapshot.sort_by_key(|item| (item.created_at, item.id));

        let mut events = Vec::with_capacity(snapshot.len());
        for item in snapshot.into_iter().filter(|item| !item.deleted) {
            events.push(Event::ItemCreated {
                id: item.id,
                spec: item.spec.clone(),
                ephemeral: item.ephemeral,
                created_at: item.created_at,
            });
            if item.updated_at != item.created_at {
                events.push(Event::ItemUpdated {
                    id: item.id,
                    spec: item.spec,
                    updated_at: item.updated_at,
                });
            }
            for r in item.reservations {
                events.push(Event::ReservationPlaced {
                    id: r.id,
                    item_id: r.item_id,
                    caller: r.caller,
                    display_name: r.display_name,
                    created_at: r.created_at,
                });
            }
        }

        let event_count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::TransientStore("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::TransientStore("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::TransientStore(e.to_string()))?;
        tracing::info!(events = event_count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
