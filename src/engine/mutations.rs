use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::limits::MAX_BATCH_SIZE;
use crate::model::*;
use crate::observability::{failure_label, CANCELLATIONS_TOTAL, EPHEMERAL_CLEANUP_FAILURES_TOTAL, RESERVATIONS_TOTAL};

use super::capacity::{check_capacity, validate_adhoc_description, validate_display_name};
use super::retry::retry_transient;
use super::{Engine, EngineError};

/// A caller's request to reserve a set of items in one go.
#[derive(Debug, Clone)]
pub struct AssignRequest {
    pub item_ids: Vec<ItemId>,
    pub display_name: String,
    /// When present, an ad-hoc item is created and reserved as part of the batch.
    pub adhoc_description: Option<String>,
    pub caller: Option<CallerId>,
}

impl AssignRequest {
    pub fn new(item_ids: Vec<ItemId>, display_name: impl Into<String>) -> Self {
        Self {
            item_ids,
            display_name: display_name.into(),
            adhoc_description: None,
            caller: None,
        }
    }

    pub fn with_adhoc(mut self, description: impl Into<String>) -> Self {
        self.adhoc_description = Some(description.into());
        self
    }

    pub fn by(mut self, caller: CallerId) -> Self {
        self.caller = Some(caller);
        self
    }
}

impl Engine {
    /// Reserve every target independently. One target's failure never undoes another's success.
    pub async fn assign_batch(self: &Arc<Self>, request: AssignRequest) -> Result<BatchOutcome, EngineError> {
        self.assign_batch_until(request, &CancellationToken::new()).await
    }

    /// Like [`Engine::assign_batch`], but stops issuing attempts once `cancel` fires.
    ///
    /// Targets not yet attempted are reported as `Cancelled`; committed ones stay committed.
    pub async fn assign_batch_until(
        self: &Arc<Self>,
        request: AssignRequest,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, EngineError> {
        let started = Instant::now();
        let display_name = validate_display_name(&request.display_name)?;
        let adhoc = request
            .adhoc_description
            .as_deref()
            .map(validate_adhoc_description)
            .transpose()?;

        let mut seen = HashSet::new();
        let mut targets: Vec<ItemId> = request
            .item_ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect();
        if targets.len() + usize::from(adhoc.is_some()) > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        if self.store_unavailable() {
            return Err(EngineError::TransientStore("store unavailable".into()));
        }

        let mut outcome = BatchOutcome::default();

        if let Some(description) = adhoc {
            let created = retry_transient(&self.options.retry, cancel, "create_adhoc_item", || {
                self.create_adhoc_item(&description, &display_name)
            })
            .await
            .map_err(|e| {
                tracing::warn!("ad-hoc item creation failed, aborting batch: {e}");
                EngineError::CreationFailed(e.to_string())
            })?;
            outcome.created_item_id = Some(created);
            targets.push(created);
        }

        for item_id in targets {
            if cancel.is_cancelled() {
                outcome.failed.push(ItemFailure {
                    item_id,
                    reason: FailureReason::Cancelled,
                });
                continue;
            }
            let attempt = self
                .reserve_detached(item_id, request.caller.clone(), display_name.clone(), cancel.clone())
                .await;
            match attempt {
                Ok(reservation_id) => {
                    tracing::debug!(item = %item_id, reservation = %reservation_id, "reserved");
                    metrics::counter!(RESERVATIONS_TOTAL, "outcome" => "reserved").increment(1);
                    outcome.succeeded.push(item_id);
                }
                Err(e) => {
                    if e.is_business_outcome() {
                        tracing::debug!(item = %item_id, "not reserved: {e}");
                    } else {
                        tracing::warn!(item = %item_id, "reservation failed: {e}");
                    }
                    let reason = e
                        .as_failure()
                        .unwrap_or_else(|| FailureReason::Transient(e.to_string()));
                    metrics::counter!(RESERVATIONS_TOTAL, "outcome" => failure_label(&reason))
                        .increment(1);
                    outcome.failed.push(ItemFailure { item_id, reason });
                }
            }
        }

        // An ad-hoc item nobody holds is garbage from the moment it exists.
        if let Some(created) = outcome.created_item_id
            && outcome.failure_for(&created).is_some()
        {
            match self.sweep_orphan(created, Ms::MAX).await {
                Ok(_) => {}
                Err(e) => tracing::warn!(item = %created, "could not discard unreserved ad-hoc item: {e}"),
            }
        }

        metrics::histogram!(crate::observability::BATCH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// Run one target's attempt on its own task so a caller walking away can
    /// never split a WAL append from its in-memory apply.
    async fn reserve_detached(
        self: &Arc<Self>,
        item_id: ItemId,
        caller: Option<CallerId>,
        display_name: String,
        cancel: CancellationToken,
    ) -> Result<ReservationId, EngineError> {
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            let policy = engine.options.retry.clone();
            retry_transient(&policy, &cancel, "reserve", || {
                engine.try_reserve(item_id, caller.clone(), display_name.clone())
            })
            .await
        });
        task.await
            .map_err(|e| EngineError::TransientStore(format!("reservation task failed: {e}")))?
    }

    /// Capacity check and insert under one write lock.
    async fn try_reserve(
        &self,
        item_id: ItemId,
        caller: Option<CallerId>,
        display_name: String,
    ) -> Result<ReservationId, EngineError> {
        let (_permit, mut guard) = self.lock_item_for_commit(item_id).await?;
        check_capacity(&guard)?;

        let id = Ulid::new();
        let event = Event::ReservationPlaced {
            id,
            item_id,
            caller,
            display_name,
            created_at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(id)
    }

    /// Release the caller's most recent reservation on `item_id`.
    ///
    /// An ephemeral item left empty is deleted too; if that delete fails the
    /// cancellation still succeeds and the sweeper reclaims the item later.
    pub async fn cancel(self: &Arc<Self>, item_id: ItemId, caller: &CallerId) -> Result<Cancelled, EngineError> {
        let engine = Arc::clone(self);
        let caller = caller.clone();
        let task = tokio::spawn(async move {
            let policy = engine.options.retry.clone();
            retry_transient(&policy, &CancellationToken::new(), "cancel", || {
                engine.try_cancel(item_id, &caller)
            })
            .await
        });
        let result = task
            .await
            .map_err(|e| EngineError::TransientStore(format!("cancellation task failed: {e}")))?;

        match &result {
            Ok(done) => {
                tracing::debug!(item = %item_id, removed = done.item_removed, "reservation cancelled");
                metrics::counter!(CANCELLATIONS_TOTAL, "outcome" => "cancelled").increment(1);
            }
            Err(EngineError::NotReserved(_)) => {
                tracing::debug!(item = %item_id, "nothing to cancel");
                metrics::counter!(CANCELLATIONS_TOTAL, "outcome" => "not_reserved").increment(1);
            }
            Err(e) => {
                tracing::warn!(item = %item_id, "cancellation failed: {e}");
                metrics::counter!(CANCELLATIONS_TOTAL, "outcome" => "error").increment(1);
            }
        }
        result
    }

    async fn try_cancel(&self, item_id: ItemId, caller: &CallerId) -> Result<Cancelled, EngineError> {
        let (_permit, mut guard) = match self.lock_item_for_commit(item_id).await {
            Ok(locked) => locked,
            Err(EngineError::NotFound(_)) => return Err(EngineError::NotReserved(item_id)),
            Err(e) => return Err(e),
        };
        let reservation_id = guard
            .latest_for(caller)
            .map(|r| r.id)
            .ok_or(EngineError::NotReserved(item_id))?;

        let event = Event::ReservationCancelled {
            id: reservation_id,
            item_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let mut item_removed = false;
        if guard.is_orphaned() {
            match self
                .persist_and_apply(&mut guard, &Event::ItemDeleted { id: item_id })
                .await
            {
                Ok(()) => item_removed = true,
                Err(e) => {
                    tracing::warn!(item = %item_id, "ephemeral item left behind after cancellation: {e}");
                    metrics::counter!(EPHEMERAL_CLEANUP_FAILURES_TOTAL).increment(1);
                }
            }
        }

        Ok(Cancelled {
            reservation_id,
            item_removed,
        })
    }

    /// Ephemeral items with no reservations, created at or before `created_before`.
    pub fn orphan_candidates(&self, created_before: Ms) -> Vec<ItemId> {
        self.store
            .item_handles()
            .into_iter()
            .filter_map(|shared| {
                let guard = shared.try_read().ok()?;
                (guard.is_orphaned() && guard.created_at <= created_before).then_some(guard.id)
            })
            .collect()
    }

    /// Delete `item_id` if it is still an orphaned ephemeral item created at or
    /// before `created_before`. Re-checked under the write lock.
    pub async fn sweep_orphan(&self, item_id: ItemId, created_before: Ms) -> Result<bool, EngineError> {
        let (_permit, mut guard) = match self.lock_item_for_commit(item_id).await {
            Ok(locked) => locked,
            Err(EngineError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        if !guard.is_orphaned() || guard.created_at > created_before {
            return Ok(false);
        }
        self.persist_and_apply(&mut guard, &Event::ItemDeleted { id: item_id })
            .await?;
        Ok(true)
    }
}
