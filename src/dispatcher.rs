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

//! Proposal dispatcher: tracks the in-flight proposal, accumulates votes, and detects
//! accept/reject thresholds (§4.3).

use crate::committee::Committee;
use crate::crypto::{Hash, PeerId};
use crate::types::{Confirm, Proposal, Vote};
use log::debug;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of recording a vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    /// The vote was recorded but no threshold was reached.
    Recorded,
    /// The vote was a duplicate on the same (proposal, signer, axis) and was dropped.
    Duplicate,
    /// The vote's proposal hash did not match the in-flight proposal; parked for replay.
    Parked,
    /// The accept threshold was reached; here is the confirm to broadcast.
    Confirmed(Confirm),
    /// The reject threshold was reached; a view change should be requested.
    RejectThreshold,
}

/// Outcome of submitting a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalOutcome {
    /// Accepted as the new in-flight proposal (none was active, or it had a higher view).
    Accepted,
    /// Ignored: an in-flight proposal already exists with an equal or higher view.
    Ignored,
}

/// A snapshot of the dispatcher's in-flight state, for `get_processing` / recovery replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingSnapshot {
    pub proposal: Proposal,
    pub accepts: Vec<Vote>,
    pub rejects: Vec<Vote>,
}

/// Tracks the currently-processing proposal and its accumulated votes.
#[derive(Debug, Default)]
pub struct Dispatcher {
    processing: Option<Proposal>,
    accepts: HashMap<PeerId, Vote>,
    rejects: HashMap<PeerId, Vote>,
    pending_votes: HashMap<Hash, Vec<(PeerId, Vote)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts a proposal if none is in flight, or if the incoming one has a higher view;
    /// proposals with a lower-or-equal view than the current one are ignored (§4.2/§4.3).
    pub fn process_proposal(&mut self, proposal: Proposal) -> ProposalOutcome {
        let should_replace = match &self.processing {
            None => true,
            Some(current) => proposal.view_offset > current.view_offset,
        };
        if !should_replace {
            debug!(
                "ignoring proposal at view {} (current view {})",
                proposal.view_offset,
                self.processing.as_ref().map(|p| p.view_offset).unwrap_or(0)
            );
            return ProposalOutcome::Ignored;
        }
        self.accepts.clear();
        self.rejects.clear();
        let hash = proposal.hash();
        self.processing = Some(proposal);
        self.replay_pending(hash);
        ProposalOutcome::Accepted
    }

    /// Replays any votes that arrived before this proposal and were parked, recording them
    /// without re-triggering threshold evaluation recursively.
    fn replay_pending(&mut self, proposal_hash: Hash) {
        if let Some(parked) = self.pending_votes.remove(&proposal_hash) {
            for (_, vote) in parked {
                let accept = vote.accept;
                self.record_vote(vote, accept);
            }
        }
    }

    fn record_vote(&mut self, vote: Vote, accept: bool) {
        let table = if accept { &mut self.accepts } else { &mut self.rejects };
        table.insert(vote.signer, vote);
    }

    /// Records a vote and checks thresholds, using the committee's majority/minority
    /// definitions (I3).
    pub fn process_vote(&mut self, vote: Vote, accept: bool, committee: &Committee) -> VoteOutcome {
        let current = match self.processing.clone() {
            Some(current) => current,
            None => {
                self.park(vote);
                return VoteOutcome::Parked;
            }
        };
        if vote.proposal_hash != current.hash() {
            self.park(vote);
            return VoteOutcome::Parked;
        }
        if self.accepts.contains_key(&vote.signer) || self.rejects.contains_key(&vote.signer) {
            return VoteOutcome::Duplicate;
        }
        self.record_vote(vote, accept);

        if committee.has_majority(self.accepts.len()) {
            let votes: Vec<Vote> = self.accepts.values().cloned().collect();
            let confirm = Confirm::new(current.block_hash, current.sponsor, current.view_offset, votes);
            return VoteOutcome::Confirmed(confirm);
        }
        if committee.has_minority(self.rejects.len()) {
            return VoteOutcome::RejectThreshold;
        }
        VoteOutcome::Recorded
    }

    fn park(&mut self, vote: Vote) {
        self.pending_votes
            .entry(vote.proposal_hash)
            .or_default()
            .push((vote.signer, vote));
    }

    /// Snapshot for network responses (`req_con`/`res_con`, §4.2 recovery).
    pub fn get_processing(&self) -> Option<ProcessingSnapshot> {
        self.processing.as_ref().map(|proposal| ProcessingSnapshot {
            proposal: proposal.clone(),
            accepts: self.accepts.values().cloned().collect(),
            rejects: self.rejects.values().cloned().collect(),
        })
    }

    /// Adopts a recovered snapshot verbatim, replacing any local in-flight state.
    pub fn adopt_snapshot(&mut self, snapshot: ProcessingSnapshot) {
        self.processing = Some(snapshot.proposal);
        self.accepts = snapshot.accepts.into_iter().map(|v| (v.signer, v)).collect();
        self.rejects = snapshot.rejects.into_iter().map(|v| (v.signer, v)).collect();
    }

    /// Drops in-flight state; if `hard`, also drops the pending-vote buffer.
    pub fn clean(&mut self, hard: bool) {
        self.processing = None;
        self.accepts.clear();
        self.rejects.clear();
        if hard {
            self.pending_votes.clear();
        }
    }

    pub fn is_processing(&self, proposal_hash: Hash) -> bool {
        self.processing.as_ref().map(Proposal::hash) == Some(proposal_hash)
    }

    pub fn current_view(&self) -> Option<u32> {
        self.processing.as_ref().map(|p| p.view_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommitteeConfig;
    use crate::persistence::InMemoryPersistence;

    fn peer(byte: u8) -> PeerId {
        PeerId([byte; crate::crypto::PEER_ID_LENGTH])
    }

    fn committee(a: u32, m: u32) -> Committee {
        let persistence = InMemoryPersistence::new();
        persistence.set_producers_desc((0..a + 5).map(|i| peer(i as u8)).collect());
        let mut committee = Committee::new(CommitteeConfig {
            arbitrators_count: a,
            candidates_count: 2,
            majority_count: m,
        });
        committee.start_up(&persistence).unwrap();
        committee
    }

    fn proposal(sponsor: PeerId, view_offset: u32) -> Proposal {
        Proposal {
            sponsor,
            block_hash: crate::crypto::sha256d(b"block"),
            height: 10,
            view_offset,
            signature: vec![],
        }
    }

    fn vote(proposal_hash: Hash, signer: PeerId, accept: bool) -> Vote {
        Vote {
            proposal_hash,
            signer,
            accept,
            signature: vec![],
        }
    }

    #[test]
    fn accept_threshold_emits_confirm() {
        let committee = committee(5, 3);
        let mut dispatcher = Dispatcher::new();
        let sponsor = peer(1);
        let p = proposal(sponsor, 0);
        let hash = p.hash();
        assert_eq!(dispatcher.process_proposal(p), ProposalOutcome::Accepted);

        for i in 2..=4u8 {
            let outcome = dispatcher.process_vote(vote(hash, peer(i), true), true, &committee);
            if i < 4 {
                assert_eq!(outcome, VoteOutcome::Recorded);
            } else {
                match outcome {
                    VoteOutcome::Confirmed(confirm) => assert_eq!(confirm.accept_count(), 3),
                    other => panic!("expected confirmed, got {:?}", other),
                }
            }
        }
    }

    #[test]
    fn vote_before_proposal_is_parked_then_replayed() {
        let committee = committee(5, 3);
        let mut dispatcher = Dispatcher::new();
        let sponsor = peer(1);
        let p = proposal(sponsor, 0);
        let hash = p.hash();

        let outcome = dispatcher.process_vote(vote(hash, peer(2), true), true, &committee);
        assert_eq!(outcome, VoteOutcome::Parked);

        dispatcher.process_proposal(p);
        assert!(dispatcher.accepts.contains_key(&peer(2)));
    }

    #[test]
    fn duplicate_vote_from_same_signer_is_dropped() {
        let committee = committee(5, 3);
        let mut dispatcher = Dispatcher::new();
        let p = proposal(peer(1), 0);
        let hash = p.hash();
        dispatcher.process_proposal(p);
        dispatcher.process_vote(vote(hash, peer(2), true), true, &committee);
        let outcome = dispatcher.process_vote(vote(hash, peer(2), true), true, &committee);
        assert_eq!(outcome, VoteOutcome::Duplicate);
    }

    #[test]
    fn reject_threshold_requests_view_change() {
        let committee = committee(5, 3);
        let mut dispatcher = Dispatcher::new();
        let p = proposal(peer(1), 0);
        let hash = p.hash();
        dispatcher.process_proposal(p);
        dispatcher.process_vote(vote(hash, peer(2), false), false, &committee);
        let outcome = dispatcher.process_vote(vote(hash, peer(3), false), false, &committee);
        assert_eq!(outcome, VoteOutcome::RejectThreshold);
    }

    #[test]
    fn higher_view_proposal_replaces_lower_one() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.process_proposal(proposal(peer(1), 0));
        let outcome = dispatcher.process_proposal(proposal(peer(1), 1));
        assert_eq!(outcome, ProposalOutcome::Accepted);
        assert_eq!(dispatcher.current_view(), Some(1));
    }

    #[test]
    fn equal_view_proposal_is_ignored() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.process_proposal(proposal(peer(1), 2));
        let outcome = dispatcher.process_proposal(proposal(peer(1), 2));
        assert_eq!(outcome, ProposalOutcome::Ignored);
    }
}
