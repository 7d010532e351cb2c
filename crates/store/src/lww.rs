//! The last-writer-wins keyed store.
//!
//! A map projected over an ordered CRDT sequence of
//! `{ key, val, ts }` records. For each key the live value is the record
//! with the highest timestamp; equal timestamps are broken by sequence
//! position (later wins), which is deterministic because the CRDT
//! totally orders the merged sequence.
//!
//! The projection is a shadow map rebuilt incrementally from the
//! sequence observer's delta, never from a full scan on the write path.
//! Writes only ever append: local and remote records alike compete
//! through the same winner recompute, so a local write with a stale
//! timestamp loses to a newer record merged in from another replica
//! instead of deleting it out from under the merge.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;
use yrs::types::array::ArrayEvent;
use yrs::types::Change;
use yrs::{Array, ArrayRef, Doc, Observable, ReadTxn, Subscription, Transact, TransactionMut};

use crate::clock::Clock;
use crate::entry::LwwEntry;
use crate::errors::StoreError;

/// Net effect on one key within one transaction.
#[derive(Clone, Debug, PartialEq)]
pub enum KeyChange {
    Added { new: LwwEntry },
    Updated { old: LwwEntry, new: LwwEntry },
    Removed { old: LwwEntry },
}

/// One observer callback's payload: the per-key net effect of a single
/// committed transaction.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct LwwDelta {
    pub changes: IndexMap<String, KeyChange>,
}

type ObserveHandler = Arc<dyn Fn(&LwwDelta) + Send + Sync>;

#[derive(Default)]
struct HandlerSlots {
    next_id: u64,
    handlers: Vec<(u64, ObserveHandler)>,
}

/// Unsubscribes its observer when dropped.
#[must_use = "dropping the subscription detaches the observer"]
pub struct StoreSubscription {
    id: u64,
    slots: Weak<Mutex<HandlerSlots>>,
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        if let Some(slots) = self.slots.upgrade() {
            let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.handlers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl core::fmt::Debug for StoreSubscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StoreSubscription")
            .field("id", &self.id)
            .finish()
    }
}

#[derive(Default)]
struct StoreState {
    /// Positional mirror of the sequence. `None` marks elements the
    /// store does not recognize; they still occupy a slot so positions
    /// stay aligned with the document.
    sequence: Vec<Option<LwwEntry>>,
    /// Per-key LWW winners, insertion-ordered. Tombstone winners are
    /// absent.
    map: IndexMap<String, LwwEntry>,
}

/// A keyed LWW store bound to one named sequence of a document.
pub struct LwwStore {
    doc: Doc,
    array: ArrayRef,
    name: String,
    clock: Arc<dyn Clock>,
    state: Arc<RwLock<StoreState>>,
    slots: Arc<Mutex<HandlerSlots>>,
    subscription: Mutex<Option<Subscription>>,
}

impl LwwStore {
    /// Attaches a store to the named root sequence of `doc`.
    ///
    /// Existing sequence contents are projected immediately; the
    /// observer that keeps the projection current is attached before
    /// this returns.
    pub fn new(doc: &Doc, name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        let name = name.into();
        let array = doc.get_or_insert_array(name.as_str());

        let state = Arc::new(RwLock::new(StoreState::default()));
        let slots = Arc::new(Mutex::new(HandlerSlots::default()));

        {
            let txn = doc.transact();
            let mut guard = state.write().unwrap_or_else(PoisonError::into_inner);
            for out in array.iter(&txn) {
                guard.sequence.push(LwwEntry::from_out(&out));
            }
            let keys: BTreeSet<String> = guard
                .sequence
                .iter()
                .flatten()
                .map(|entry| entry.key.clone())
                .collect();
            let _ = recompute_winners(&mut guard, &keys);
        }

        let subscription = {
            let state = Arc::clone(&state);
            let slots = Arc::clone(&slots);
            let store_name = name.clone();
            array.observe(move |txn, event| {
                on_sequence_event(&store_name, &state, &slots, txn, event);
            })
        };

        Self {
            doc: doc.clone(),
            array,
            name,
            clock,
            state,
            slots,
            subscription: Mutex::new(Some(subscription)),
        }
    }

    /// Name of the underlying root sequence.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entry(key).and_then(|entry| entry.value)
    }

    /// Current winning entry for `key`, if any.
    #[must_use]
    pub fn entry(&self, key: &str) -> Option<LwwEntry> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.map.get(key).cloned()
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.map.contains_key(key)
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys in map order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.map.keys().cloned().collect()
    }

    /// Snapshot of the live map in map order.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, LwwEntry)> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .map
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Writes `value` under `key` in its own transaction.
    pub fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.batch(|batch| batch.set(key, value))
    }

    /// Writes a tombstone for `key` in its own transaction.
    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.batch(|batch| batch.delete(key))
    }

    /// Runs `f` inside a single document transaction.
    ///
    /// Observers see the whole batch as one merged delta; there is no
    /// intermediate observable state. An error returned by `f` does not
    /// roll back writes already made in the batch.
    pub fn batch<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut LwwBatch<'_, '_>) -> Result<(), StoreError>,
    {
        let mut txn = self.doc.transact_mut();
        let mut batch = LwwBatch {
            store: self,
            txn: &mut txn,
        };
        f(&mut batch)
        // Dropping the transaction commits and fires the observer.
    }

    /// Subscribes to per-transaction deltas.
    pub fn observe<F>(&self, handler: F) -> StoreSubscription
    where
        F: Fn(&LwwDelta) + Send + Sync + 'static,
    {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let id = slots.next_id;
        slots.next_id += 1;
        slots.handlers.push((id, Arc::new(handler)));

        StoreSubscription {
            id,
            slots: Arc::downgrade(&self.slots),
        }
    }

    /// Detaches the sequence observer and drops every handler.
    ///
    /// Used at workspace teardown; the store keeps serving reads from
    /// its last projection but no longer tracks the document.
    pub fn detach(&self) {
        let subscription = {
            let mut guard = self
                .subscription
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.take()
        };
        drop(subscription);

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.handlers.clear();
    }

    fn append(&self, txn: &mut TransactionMut<'_>, entry: &LwwEntry) {
        let _ = self.array.push_back(txn, entry.to_any());
    }
}

impl core::fmt::Debug for LwwStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LwwStore")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Write surface of an open store transaction.
pub struct LwwBatch<'a, 'doc> {
    store: &'a LwwStore,
    txn: &'a mut TransactionMut<'doc>,
}

impl LwwBatch<'_, '_> {
    /// Appends a record for `key`.
    ///
    /// Existing records stay in the sequence and keep competing; the
    /// winner recompute decides which record is live, so a write with a
    /// stale timestamp does not displace a newer one.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }

        let entry = LwwEntry::new(key, value, self.store.clock.now_millis());
        self.store.append(self.txn, &entry);
        Ok(())
    }

    /// Appends a tombstone for `key`, under the same LWW discipline as
    /// [`LwwBatch::set`].
    pub fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }

        let entry = LwwEntry::tombstone(key, self.store.clock.now_millis());
        self.store.append(self.txn, &entry);
        Ok(())
    }
}

impl core::fmt::Debug for LwwBatch<'_, '_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LwwBatch")
            .field("store", &self.store.name)
            .finish_non_exhaustive()
    }
}

/// Applies one sequence delta to the mirror and notifies handlers with
/// the per-key net effect.
fn on_sequence_event(
    store_name: &str,
    state: &Arc<RwLock<StoreState>>,
    slots: &Arc<Mutex<HandlerSlots>>,
    txn: &TransactionMut<'_>,
    event: &ArrayEvent,
) {
    let delta = {
        let mut guard = state.write().unwrap_or_else(PoisonError::into_inner);
        let affected = apply_sequence_delta(store_name, &mut guard, event.delta(txn));
        if affected.is_empty() {
            return;
        }
        recompute_winners(&mut guard, &affected)
    };

    if delta.changes.is_empty() {
        return;
    }

    // Snapshot the handler list so callbacks can subscribe or
    // unsubscribe without deadlocking.
    let handlers: Vec<ObserveHandler> = {
        let slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    };

    for handler in handlers {
        handler(&delta);
    }
}

/// Folds a positional change list into the mirror, returning the keys
/// whose winner may have changed.
fn apply_sequence_delta(
    store_name: &str,
    state: &mut StoreState,
    changes: &[Change],
) -> BTreeSet<String> {
    let mut affected = BTreeSet::new();
    let mut position = 0_usize;

    for change in changes {
        match change {
            Change::Retain(count) => position += *count as usize,
            Change::Added(values) => {
                for out in values {
                    let entry = LwwEntry::from_out(out);
                    match &entry {
                        Some(entry) => {
                            let _ = affected.insert(entry.key.clone());
                        }
                        None => {
                            debug!(store = store_name, "ignoring unrecognized sequence element");
                        }
                    }
                    state.sequence.insert(position.min(state.sequence.len()), entry);
                    position += 1;
                }
            }
            Change::Removed(count) => {
                for _ in 0..*count {
                    if position < state.sequence.len() {
                        if let Some(entry) = state.sequence.remove(position) {
                            let _ = affected.insert(entry.key);
                        }
                    }
                }
            }
        }
    }

    affected
}

/// Recomputes LWW winners for `affected` keys in one pass over the
/// mirror and folds the outcome into the map, returning the net delta.
fn recompute_winners(state: &mut StoreState, affected: &BTreeSet<String>) -> LwwDelta {
    let mut winners: IndexMap<&str, &LwwEntry> = IndexMap::new();

    for entry in state.sequence.iter().flatten() {
        if !affected.contains(&entry.key) {
            continue;
        }

        // Later position wins ties, so replace on >=.
        let better = winners
            .get(entry.key.as_str())
            .map_or(true, |current| entry.timestamp >= current.timestamp);
        if better {
            let _ = winners.insert(entry.key.as_str(), entry);
        }
    }

    let mut resolved: Vec<(String, Option<LwwEntry>)> = Vec::with_capacity(affected.len());
    for key in affected {
        let winner = winners
            .get(key.as_str())
            .filter(|entry| !entry.is_tombstone())
            .map(|entry| (*entry).clone());
        resolved.push((key.clone(), winner));
    }

    let mut delta = LwwDelta::default();
    for (key, winner) in resolved {
        let previous = state.map.get(&key).cloned();
        match (previous, winner) {
            (None, Some(new)) => {
                let _ = state.map.insert(key.clone(), new.clone());
                let _ = delta.changes.insert(key, KeyChange::Added { new });
            }
            (Some(old), Some(new)) => {
                if old != new {
                    let _ = state.map.insert(key.clone(), new.clone());
                    let _ = delta.changes.insert(key, KeyChange::Updated { old, new });
                }
            }
            (Some(old), None) => {
                let _ = state.map.shift_remove(&key);
                let _ = delta.changes.insert(key, KeyChange::Removed { old });
            }
            (None, None) => {}
        }
    }

    delta
}

/// Projects the LWW winners of a raw sequence without constructing a
/// store. Used for read-only projections of loaded documents.
#[must_use]
pub fn sequence_winners<T: ReadTxn>(txn: &T, array: &ArrayRef) -> IndexMap<String, LwwEntry> {
    let mut winners: IndexMap<String, LwwEntry> = IndexMap::new();

    for out in array.iter(txn) {
        let Some(entry) = LwwEntry::from_out(&out) else {
            continue;
        };

        let better = winners
            .get(&entry.key)
            .map_or(true, |current| entry.timestamp >= current.timestamp);
        if better {
            let _ = winners.insert(entry.key.clone(), entry);
        }
    }

    winners.retain(|_, entry| !entry.is_tombstone());
    winners
}
