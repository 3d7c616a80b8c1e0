// Copyright 2020 The Exonum Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The out-of-scope chain-store collaborator, modeled as a trait.
//!
//! A production node would back this with a real database; here it is an interface plus an
//! in-memory fake so tests can run without one.

use crate::crypto::{Hash, PeerId};

/// The persisted arbitrator-set snapshot (§6: "current arbitrators, next arbitrators,
/// duty-changed counter").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArbitratorsSnapshot {
    pub current: Vec<PeerId>,
    pub candidates: Vec<PeerId>,
    pub next: Vec<PeerId>,
    pub next_candidates: Vec<PeerId>,
    pub duty_changed_count: u32,
}

/// One entry of the persisted consensus event log (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistedEvent {
    Proposal { height: u32, hash: Hash },
    Vote { height: u32, proposal_hash: Hash, signer: PeerId, accept: bool },
    ViewChange { height: u32, view_offset: u32 },
    Confirm { height: u32, block_hash: Hash },
}

/// The chain-store interface this core depends on but does not implement.
///
/// Loading/saving the arbitrator snapshot and appending to the event log are out of scope;
/// `producers_desc` stands in for the UTXO-backed producer stake ranking that a real chain
/// store would compute.
pub trait Persistence: Send + Sync {
    /// Loads the last persisted arbitrator snapshot, or `None` at genesis.
    fn load_arbitrators(&self) -> Option<ArbitratorsSnapshot>;

    /// Persists a new arbitrator snapshot, replacing any prior one.
    fn save_arbitrators(&self, snapshot: &ArbitratorsSnapshot);

    /// Returns the producer registry ranked by stake, descending.
    fn producers_desc(&self) -> Vec<PeerId>;

    /// Appends one event to the consensus event log.
    fn append_event(&self, event: PersistedEvent);
}

/// An in-memory `Persistence` used by tests and by nodes that do not need durability across
/// restarts.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    inner: parking_lot::Mutex<InMemoryPersistenceState>,
}

#[derive(Debug, Default)]
struct InMemoryPersistenceState {
    arbitrators: Option<ArbitratorsSnapshot>,
    producers_desc: Vec<PeerId>,
    events: Vec<PersistedEvent>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the producer ranking the fake chain store will report, highest stake first.
    pub fn set_producers_desc(&self, producers: Vec<PeerId>) {
        self.inner.lock().producers_desc = producers;
    }

    /// Returns a copy of every event appended so far, for assertions in tests.
    pub fn events(&self) -> Vec<PersistedEvent> {
        self.inner.lock().events.clone()
    }
}

impl Persistence for InMemoryPersistence {
    fn load_arbitrators(&self) -> Option<ArbitratorsSnapshot> {
        self.inner.lock().arbitrators.clone()
    }

    fn save_arbitrators(&self, snapshot: &ArbitratorsSnapshot) {
        self.inner.lock().arbitrators = Some(snapshot.clone());
    }

    fn producers_desc(&self) -> Vec<PeerId> {
        self.inner.lock().producers_desc.clone()
    }

    fn append_event(&self, event: PersistedEvent) {
        self.inner.lock().events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(byte: u8) -> PeerId {
        PeerId([byte; crate::crypto::PEER_ID_LENGTH])
    }

    #[test]
    fn round_trips_arbitrator_snapshot() {
        let store = InMemoryPersistence::new();
        assert!(store.load_arbitrators().is_none());

        let snapshot = ArbitratorsSnapshot {
            current: vec![peer(1), peer(2)],
            candidates: vec![],
            next: vec![],
            next_candidates: vec![],
            duty_changed_count: 3,
        };
        store.save_arbitrators(&snapshot);
        assert_eq!(store.load_arbitrators(), Some(snapshot));
    }

    #[test]
    fn records_events_in_append_order() {
        let store = InMemoryPersistence::new();
        store.append_event(PersistedEvent::ViewChange { height: 1, view_offset: 1 });
        store.append_event(PersistedEvent::Confirm { height: 1, block_hash: Hash::zero() });
        assert_eq!(store.events().len(), 2);
    }
}
