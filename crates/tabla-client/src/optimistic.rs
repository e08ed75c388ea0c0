//! Optimistic Mutation Controller.
//!
//! Boolean flags (liked / not liked) are flipped locally before the
//! network mutation completes and rolled back when it fails. Observers
//! follow flag changes through [`OptimisticFlags::subscribe`].
//!
//! Only one mutation per resource may be in flight. A second toggle for
//! the same resource is rejected with [`ClientError::MutationInFlight`]
//! without touching the override or issuing a request.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;

use crate::error::{ApiError, ClientError, Result};
use crate::models::Id;

/// A flag value observers should now display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagEvent {
    pub resource_id: Id,
    pub value: bool,
}

pub struct OptimisticFlags {
    overrides: DashMap<Id, bool>,
    pending: DashMap<Id, ()>,
    generation: AtomicU64,
    events: broadcast::Sender<FlagEvent>,
}

impl Default for OptimisticFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimisticFlags {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            overrides: DashMap::new(),
            pending: DashMap::new(),
            generation: AtomicU64::new(0),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlagEvent> {
        self.events.subscribe()
    }

    pub fn override_for(&self, id: &Id) -> Option<bool> {
        self.overrides.get(id).map(|v| *v)
    }

    pub fn is_pending(&self, id: &Id) -> bool {
        self.pending.contains_key(id)
    }

    /// Override if present, else `authoritative`.
    ///
    /// An override that agrees with the authoritative value is no longer
    /// needed and is dropped, unless its mutation is still in flight.
    pub fn effective(&self, id: &Id, authoritative: bool) -> bool {
        let Some(value) = self.override_for(id) else {
            return authoritative;
        };
        if value == authoritative && !self.is_pending(id) {
            self.overrides.remove_if(id, |_, v| *v == authoritative);
        }
        value
    }

    /// Forget every override and pending mark, e.g. when the user changes.
    ///
    /// Toggles still in flight finish without touching the map again.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.overrides.clear();
        self.pending.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty() && self.pending.is_empty()
    }

    fn emit(&self, id: &Id, value: bool) {
        // No subscribers is fine.
        let _ = self.events.send(FlagEvent {
            resource_id: id.clone(),
            value,
        });
    }

    fn restore(&self, id: &Id, previous: Option<bool>) {
        match previous {
            Some(v) => {
                self.overrides.insert(id.clone(), v);
            }
            None => {
                self.overrides.remove(id);
            }
        }
    }

    /// Flip the flag for `id` and run `mutation` for the new value.
    ///
    /// On success `on_success` runs (typically cache invalidation) and the
    /// new value is returned; the override stays until an authoritative
    /// read confirms it. On failure the previous override is restored,
    /// observers get the previous value, and the error is returned.
    pub async fn toggle<M, Fut, S>(
        &self,
        id: &Id,
        authoritative: bool,
        mutation: M,
        on_success: S,
    ) -> Result<bool>
    where
        M: FnOnce(bool) -> Fut,
        Fut: Future<Output = std::result::Result<(), ApiError>>,
        S: FnOnce(bool),
    {
        match self.pending.entry(id.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!(resource_id = %id, "Rejecting overlapping toggle");
                return Err(ClientError::MutationInFlight {
                    resource_id: id.to_string(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let previous = self.override_for(id);
        let current = previous.unwrap_or(authoritative);
        let next = !current;
        self.overrides.insert(id.clone(), next);
        self.emit(id, next);

        let mut guard = PendingGuard {
            flags: self,
            id,
            previous,
            shown: current,
            generation,
            settled: false,
        };

        match mutation(next).await {
            Ok(()) => {
                guard.settled = true;
                drop(guard);
                tracing::debug!(resource_id = %id, value = next, "Optimistic toggle confirmed");
                on_success(next);
                Ok(next)
            }
            Err(e) => {
                drop(guard);
                tracing::warn!(resource_id = %id, error = %e, "Optimistic toggle rolled back");
                Err(e.into())
            }
        }
    }
}

/// Clears the pending mark when the toggle ends, and rolls the override
/// back unless the mutation succeeded. Also covers a cancelled toggle.
struct PendingGuard<'a> {
    flags: &'a OptimisticFlags,
    id: &'a Id,
    previous: Option<bool>,
    shown: bool,
    generation: u64,
    settled: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.flags.generation.load(Ordering::SeqCst) != self.generation {
            return;
        }
        if !self.settled {
            self.flags.restore(self.id, self.previous);
            self.flags.emit(self.id, self.shown);
        }
        self.flags.pending.remove(self.id);
    }
}
