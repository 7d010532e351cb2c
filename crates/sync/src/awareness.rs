//! Ephemeral per-client presence state.
//!
//! Awareness is shared over the sync transport and never persisted.
//! Each client owns a monotonically increasing clock; a remote entry
//! applies only if its clock is ahead of what we know. A `null` state
//! marks the client offline but keeps its clock so stale frames cannot
//! resurrect it.

use std::collections::HashMap;

use serde_json::Value;

/// One `(client, clock, state)` tuple on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct AwarenessEntry {
    pub client_id: u64,
    pub clock: u64,
    /// `None` marks the client offline.
    pub state: Option<Value>,
}

/// What we know about one client.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientState {
    pub clock: u64,
    pub state: Option<Value>,
}

/// The local replica's view of every client's presence.
#[derive(Debug)]
pub struct Awareness {
    local_client: u64,
    clients: HashMap<u64, ClientState>,
}

impl Awareness {
    #[must_use]
    pub fn new(local_client: u64) -> Self {
        Self {
            local_client,
            clients: HashMap::new(),
        }
    }

    #[must_use]
    pub fn local_client(&self) -> u64 {
        self.local_client
    }

    /// The local client's current state, if it is online.
    #[must_use]
    pub fn local_state(&self) -> Option<&Value> {
        self.clients
            .get(&self.local_client)
            .and_then(|client| client.state.as_ref())
    }

    /// Publishes a new local state, bumping the local clock.
    pub fn set_local_state(&mut self, state: Value) {
        self.bump_local(Some(state));
    }

    /// Marks the local client offline, bumping the local clock.
    pub fn clear_local_state(&mut self) {
        self.bump_local(None);
    }

    fn bump_local(&mut self, state: Option<Value>) {
        let clock = self
            .clients
            .get(&self.local_client)
            .map_or(0, |client| client.clock)
            .saturating_add(1);
        let _ = self
            .clients
            .insert(self.local_client, ClientState { clock, state });
    }

    /// The local client's wire entry.
    #[must_use]
    pub fn local_entry(&self) -> AwarenessEntry {
        let known = self.clients.get(&self.local_client);
        AwarenessEntry {
            client_id: self.local_client,
            clock: known.map_or(0, |client| client.clock),
            state: known.and_then(|client| client.state.clone()),
        }
    }

    /// Every known client's wire entry, for a full broadcast.
    #[must_use]
    pub fn entries(&self) -> Vec<AwarenessEntry> {
        let mut entries: Vec<AwarenessEntry> = self
            .clients
            .iter()
            .map(|(client_id, client)| AwarenessEntry {
                client_id: *client_id,
                clock: client.clock,
                state: client.state.clone(),
            })
            .collect();
        entries.sort_by_key(|entry| entry.client_id);
        entries
    }

    /// Folds remote entries in, returning the clients whose state
    /// changed. An entry applies only if its clock is ahead.
    pub fn apply(&mut self, entries: &[AwarenessEntry]) -> Vec<u64> {
        let mut changed = Vec::new();

        for entry in entries {
            let known_clock = self.clients.get(&entry.client_id).map(|client| client.clock);
            let newer = known_clock.map_or(true, |clock| entry.clock > clock);
            if !newer {
                continue;
            }

            let _ = self.clients.insert(
                entry.client_id,
                ClientState {
                    clock: entry.clock,
                    state: entry.state.clone(),
                },
            );
            changed.push(entry.client_id);
        }

        changed
    }

    /// Online clients and their states.
    pub fn states(&self) -> impl Iterator<Item = (u64, &Value)> {
        self.clients
            .iter()
            .filter_map(|(client_id, client)| client.state.as_ref().map(|state| (*client_id, state)))
    }

    /// Number of online clients.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.states().count()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn local_state_bumps_the_clock() {
        let mut awareness = Awareness::new(7);
        assert_eq!(awareness.local_entry().clock, 0);

        awareness.set_local_state(json!({"cursor": 1}));
        assert_eq!(awareness.local_entry().clock, 1);

        awareness.clear_local_state();
        let entry = awareness.local_entry();
        assert_eq!(entry.clock, 2);
        assert_eq!(entry.state, None);
        assert_eq!(awareness.online_count(), 0);
    }

    #[test]
    fn stale_entries_do_not_apply() {
        let mut awareness = Awareness::new(1);

        let changed = awareness.apply(&[AwarenessEntry {
            client_id: 2,
            clock: 5,
            state: Some(json!({"name": "fresh"})),
        }]);
        assert_eq!(changed, vec![2]);

        let changed = awareness.apply(&[AwarenessEntry {
            client_id: 2,
            clock: 4,
            state: Some(json!({"name": "stale"})),
        }]);
        assert!(changed.is_empty(), "an older clock must not apply");

        let state: Vec<_> = awareness.states().collect();
        assert_eq!(state, vec![(2, &json!({"name": "fresh"}))]);
    }

    #[test]
    fn offline_entries_keep_the_clock() {
        let mut awareness = Awareness::new(1);

        let _ = awareness.apply(&[AwarenessEntry {
            client_id: 2,
            clock: 3,
            state: Some(json!({})),
        }]);
        let _ = awareness.apply(&[AwarenessEntry {
            client_id: 2,
            clock: 4,
            state: None,
        }]);

        assert_eq!(awareness.online_count(), 0);

        // A replayed older frame cannot resurrect the client.
        let changed = awareness.apply(&[AwarenessEntry {
            client_id: 2,
            clock: 3,
            state: Some(json!({})),
        }]);
        assert!(changed.is_empty());
        assert_eq!(awareness.online_count(), 0);
    }
}
