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

//! The arbitrator committee: current/next arbitrator and candidate sets, the duty-rotation
//! counter, and on-duty derivation (§4.1).

use crate::config::CommitteeConfig;
use crate::crypto::PeerId;
use crate::error::{CoreError, CoreResult};
use crate::persistence::{ArbitratorsSnapshot, Persistence};
use log::info;

/// Receives a callback whenever the committee performs a new election (promotes `next` into
/// `current`). Mirrors the source's `RegisterListener`/`UnregisterListener` pair; the CSM
/// registers itself so it learns about duty switches without polling.
pub trait ArbitratorsListener: Send + Sync {
    fn on_new_election(&self, current: &[PeerId]);
}

/// Opaque token returned by `register_listener`, used to detach that one listener later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(usize);

/// Holds the current and next arbitrator/candidate sets and the duty-rotation counter.
pub struct Committee {
    config: CommitteeConfig,
    current: Vec<PeerId>,
    candidates: Vec<PeerId>,
    next: Vec<PeerId>,
    next_candidates: Vec<PeerId>,
    duty_changed_count: u32,
    listeners: Vec<Option<Box<dyn ArbitratorsListener>>>,
}

impl std::fmt::Debug for Committee {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Committee")
            .field("config", &self.config)
            .field("current", &self.current)
            .field("candidates", &self.candidates)
            .field("next", &self.next)
            .field("next_candidates", &self.next_candidates)
            .field("duty_changed_count", &self.duty_changed_count)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Committee {
    pub fn new(config: CommitteeConfig) -> Self {
        Self {
            config,
            current: Vec::new(),
            candidates: Vec::new(),
            next: Vec::new(),
            next_candidates: Vec::new(),
            duty_changed_count: 0,
            listeners: Vec::new(),
        }
    }

    /// Registers a listener and returns a handle that can later be passed to
    /// `unregister_listener` to detach it (§4.1's `RegisterListener`/`UnregisterListener` pair).
    pub fn register_listener(&mut self, listener: Box<dyn ArbitratorsListener>) -> ListenerHandle {
        self.listeners.push(Some(listener));
        ListenerHandle(self.listeners.len() - 1)
    }

    /// Detaches the listener previously returned by `register_listener`. A handle from a
    /// different `Committee`, or one already unregistered, is a no-op.
    pub fn unregister_listener(&mut self, handle: ListenerHandle) {
        if let Some(slot) = self.listeners.get_mut(handle.0) {
            *slot = None;
        }
    }

    /// Removes every registered listener, invalidating every handle issued so far.
    pub fn clear_listeners(&mut self) {
        self.listeners.clear();
    }

    fn notify_new_election(&self) {
        for listener in self.listeners.iter().flatten() {
            listener.on_new_election(&self.current);
        }
    }

    /// Loads the persisted set, or, at genesis (nothing persisted yet), derives the initial
    /// set from the producer ranking of the tip block.
    pub fn start_up(&mut self, persistence: &dyn Persistence) -> CoreResult<()> {
        match persistence.load_arbitrators() {
            Some(snapshot) => {
                self.apply_snapshot(snapshot);
                Ok(())
            }
            None => self.force_change(persistence),
        }
    }

    fn apply_snapshot(&mut self, snapshot: ArbitratorsSnapshot) {
        self.current = snapshot.current;
        self.candidates = snapshot.candidates;
        self.next = snapshot.next;
        self.next_candidates = snapshot.next_candidates;
        self.duty_changed_count = snapshot.duty_changed_count;
    }

    fn persist(&self, persistence: &dyn Persistence) {
        persistence.save_arbitrators(&ArbitratorsSnapshot {
            current: self.current.clone(),
            candidates: self.candidates.clone(),
            next: self.next.clone(),
            next_candidates: self.next_candidates.clone(),
            duty_changed_count: self.duty_changed_count,
        });
    }

    /// Derives the next arbitrator and candidate sets from the producer registry, requiring
    /// `len >= A` producers (I2).
    fn derive_next_sets(&self, persistence: &dyn Persistence) -> CoreResult<(Vec<PeerId>, Vec<PeerId>)> {
        let mut producers = persistence.producers_desc();
        let required = self.config.arbitrators_count as usize;
        if producers.len() < required {
            return Err(CoreError::RotationUnavailable {
                available: producers.len(),
                required,
            });
        }
        let candidate_count = (self.config.candidates_count as usize).min(producers.len() - required);
        let mut candidates: Vec<PeerId> = producers.drain(required..required + candidate_count).collect();
        let mut next = producers;
        next.truncate(required);
        // Canonical hex-lexicographic order, so the on-duty index is deterministic (§4.1).
        next.sort_by_key(|p| p.to_hex());
        candidates.sort_by_key(|p| p.to_hex());
        Ok((next, candidates))
    }

    /// Administrative rotation: compute a fresh set from tip producers and swap it in as both
    /// the current and the pre-fetched next set, without waiting for `duty_changed_count` to
    /// reach the term boundary.
    pub fn force_change(&mut self, persistence: &dyn Persistence) -> CoreResult<()> {
        let (next, next_candidates) = self.derive_next_sets(persistence)?;
        self.current = next.clone();
        self.candidates = next_candidates.clone();
        self.next = next;
        self.next_candidates = next_candidates;
        self.duty_changed_count = 0;
        self.persist(persistence);
        info!("arbitrators force-changed, {} in committee", self.current.len());
        self.notify_new_election();
        Ok(())
    }

    /// The sole automatic mutator, invoked when a block is confirmed. Promotes the
    /// already-pre-fetched `next` set into `current` at the term boundary and pre-fetches a
    /// fresh `next` for the following term; otherwise just advances the duty counter.
    ///
    /// The boundary check happens *before* the increment (`duty_changed_count == A - 1`),
    /// matching `onChainHeightIncreased` exactly, so every honest node computes the same
    /// duty index.
    pub fn on_block_confirmed(&mut self, persistence: &dyn Persistence) -> CoreResult<()> {
        let is_new_election = self.duty_changed_count == self.config.arbitrators_count.saturating_sub(1);
        if is_new_election {
            let (fresh_next, fresh_next_candidates) = self.derive_next_sets(persistence)?;
            self.current = std::mem::replace(&mut self.next, fresh_next);
            self.candidates = std::mem::replace(&mut self.next_candidates, fresh_next_candidates);
            self.duty_changed_count = 0;
            self.persist(persistence);
            info!("new election, {} arbitrators", self.current.len());
            self.notify_new_election();
        } else {
            self.duty_changed_count += 1;
            self.persist(persistence);
        }
        Ok(())
    }

    /// Returns the arbitrator on duty at the given view offset (I1).
    pub fn get_on_duty(&self, offset: u32) -> CoreResult<PeerId> {
        if self.current.is_empty() {
            return Err(CoreError::RotationUnavailable {
                available: 0,
                required: self.config.arbitrators_count as usize,
            });
        }
        let index = (self.duty_changed_count as usize + offset as usize) % self.current.len();
        Ok(self.current[index])
    }

    /// I3: confirmation requires strictly more than `M` accepts.
    pub fn has_majority(&self, n: usize) -> bool {
        n > self.config.majority_count as usize
    }

    /// Reject threshold: `n >= A - M`.
    pub fn has_minority(&self, n: usize) -> bool {
        let a = self.config.arbitrators_count as usize;
        let m = self.config.majority_count as usize;
        n >= a.saturating_sub(m)
    }

    pub fn current(&self) -> &[PeerId] {
        &self.current
    }

    pub fn is_current_arbitrator(&self, peer: PeerId) -> bool {
        self.current.contains(&peer)
    }

    pub fn duty_changed_count(&self) -> u32 {
        self.duty_changed_count
    }

    pub fn config(&self) -> &CommitteeConfig {
        &self.config
    }
}
