use crate::session::UpdateId;
use std::{
    collections::VecDeque,
    fmt,
    time::Duration,
};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{
    debug,
    warn,
};

#[cfg(test)]
mod tests;

pub const DEFAULT_MAX_PENDING_AGE: Duration = Duration::from_secs(30);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("update `{0}` is already pending")]
    DuplicateUpdate(UpdateId),
}

/// A locally speculative state waiting for the authority to accept or reject it.
#[derive(Clone, Debug, PartialEq)]
pub struct TentativeUpdate<S> {
    pub id: UpdateId,
    pub payload: S,
    pub created_at: Instant,
}

pub type RollbackHook<S> = Box<dyn FnMut(&TentativeUpdate<S>) + Send>;

/// Result of folding an authoritative snapshot into the store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reconciled {
    /// Pending updates whose payload matched the snapshot.
    pub confirmed: Vec<UpdateId>,
    /// Set when nothing matched and the baseline was replaced directly.
    pub unkeyed: bool,
}

/// Confirmed baseline plus an ordered queue of tentative updates.
///
/// The display state is derived on demand: the newest pending payload if any,
/// the confirmed state otherwise. Older pending updates are kept for
/// bookkeeping only.
pub struct OptimisticStore<S> {
    confirmed: S,
    pending: VecDeque<TentativeUpdate<S>>,
    max_pending_age: Option<Duration>,
    on_rollback: Option<RollbackHook<S>>,
}

impl<S> fmt::Debug for OptimisticStore<S>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticStore")
            .field("confirmed", &self.confirmed)
            .field("pending", &self.pending)
            .field("max_pending_age", &self.max_pending_age)
            .field("has_rollback_hook", &self.on_rollback.is_some())
            .finish()
    }
}

impl<S> OptimisticStore<S>
where
    S: Clone + PartialEq,
{
    pub fn new(initial: S) -> Self {
        Self {
            confirmed: initial,
            pending: VecDeque::new(),
            max_pending_age: Some(DEFAULT_MAX_PENDING_AGE),
            on_rollback: None,
        }
    }

    pub fn with_max_pending_age(mut self, max_pending_age: Option<Duration>) -> Self {
        self.max_pending_age = max_pending_age;
        self
    }

    pub fn with_rollback_hook(
        mut self,
        hook: impl FnMut(&TentativeUpdate<S>) + Send + 'static,
    ) -> Self {
        self.on_rollback = Some(Box::new(hook));
        self
    }

    pub fn apply_optimistic_update(
        &mut self,
        id: UpdateId,
        candidate: S,
    ) -> Result<(), StoreError> {
        if self.pending.iter().any(|update| update.id == id) {
            return Err(StoreError::DuplicateUpdate(id));
        }
        debug!(update = %id, pending = self.pending.len() + 1, "applying optimistic update");
        self.pending.push_back(TentativeUpdate {
            id,
            payload: candidate,
            created_at: Instant::now(),
        });
        Ok(())
    }

    /// Removes the pending update and, if given, adopts `confirmed` as the new
    /// baseline. Unknown ids are ignored entirely, including the state.
    pub fn confirm_update(&mut self, id: &UpdateId, confirmed: Option<S>) -> bool {
        let Some(position) = self.position_of(id) else {
            debug!(update = %id, "ignoring confirmation for unknown update");
            return false;
        };
        self.pending.remove(position);
        if let Some(state) = confirmed {
            self.confirmed = state;
        }
        debug!(update = %id, pending = self.pending.len(), "update confirmed");
        true
    }

    pub fn rollback_update(&mut self, id: &UpdateId) -> Option<TentativeUpdate<S>> {
        let Some(position) = self.position_of(id) else {
            debug!(update = %id, "ignoring rollback for unknown update");
            return None;
        };
        let update = self.pending.remove(position)?;
        debug!(update = %id, pending = self.pending.len(), "update rolled back");
        if let Some(hook) = self.on_rollback.as_mut() {
            hook(&update);
        }
        Some(update)
    }

    /// Folds an authoritative snapshot into the store. Pending updates that
    /// predicted it exactly are confirmed; the rest stay pending.
    pub fn reconcile(&mut self, authoritative: S) -> Reconciled {
        let matched: Vec<UpdateId> = self
            .pending
            .iter()
            .filter(|update| update.payload == authoritative)
            .map(|update| update.id.clone())
            .collect();

        if matched.is_empty() {
            self.confirmed = authoritative;
            return Reconciled {
                confirmed: matched,
                unkeyed: true,
            };
        }

        for id in &matched {
            self.confirm_update(id, Some(authoritative.clone()));
        }
        Reconciled {
            confirmed: matched,
            unkeyed: false,
        }
    }

    /// Rolls back every update older than the configured lifetime.
    pub fn expire_stale(&mut self, now: Instant) -> Vec<UpdateId> {
        let Some(max_age) = self.max_pending_age else {
            return Vec::new();
        };
        let expired: Vec<UpdateId> = self
            .pending
            .iter()
            .filter(|update| now.saturating_duration_since(update.created_at) >= max_age)
            .map(|update| update.id.clone())
            .collect();
        for id in &expired {
            warn!(update = %id, ?max_age, "pending update expired without resolution");
            self.rollback_update(id);
        }
        expired
    }

    pub fn display_state(&self) -> &S {
        self.pending
            .back()
            .map(|update| &update.payload)
            .unwrap_or(&self.confirmed)
    }

    pub fn confirmed_state(&self) -> &S {
        &self.confirmed
    }

    pub fn pending_updates(&self) -> impl Iterator<Item = &TentativeUpdate<S>> {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending_updates(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn max_pending_age(&self) -> Option<Duration> {
        self.max_pending_age
    }

    fn position_of(&self, id: &UpdateId) -> Option<usize> {
        self.pending.iter().position(|update| &update.id == id)
    }
}
