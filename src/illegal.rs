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

//! Illegal-behavior (slashing evidence) detection.
//!
//! An arbitrator that signs two mutually-exclusive artifacts at the same height has
//! misbehaved; this module accumulates the conflicting pair and exposes it for inclusion in
//! the next block as a special transaction payload (§4.4).

use crate::crypto::{sha256d, Hash, PeerId};
use crate::error::CoreError;
use crate::types::{Block, Proposal, Vote};
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;

/// Two proposals signed by the same sponsor, at the same height, with different block hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalEvidence {
    pub height: u32,
    pub sponsor: PeerId,
    pub first: Proposal,
    pub second: Proposal,
}

impl ProposalEvidence {
    /// I8: the pair is only valid evidence if it shares a height/sponsor and genuinely
    /// conflicts in content.
    pub fn is_valid(&self) -> bool {
        self.first.height == self.height
            && self.second.height == self.height
            && self.first.sponsor == self.sponsor
            && self.second.sponsor == self.sponsor
            && self.first.block_hash != self.second.block_hash
    }

    /// Canonical pair hash: commutative regardless of which proposal is `first`.
    pub fn pair_hash(&self) -> Hash {
        pair_hash(self.first.hash(), self.second.hash())
    }
}

/// Two votes signed by the same signer, at the same height, targeting different proposals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteEvidence {
    pub height: u32,
    pub signer: PeerId,
    pub first: Vote,
    pub second: Vote,
}

impl VoteEvidence {
    pub fn is_valid(&self) -> bool {
        self.first.signer == self.signer
            && self.second.signer == self.signer
            && self.first.proposal_hash != self.second.proposal_hash
    }

    pub fn pair_hash(&self) -> Hash {
        pair_hash(sha256d_of(&self.first), sha256d_of(&self.second))
    }
}

/// Two confirmed blocks at the same height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEvidence {
    pub height: u32,
    pub first: Block,
    pub second: Block,
}

impl BlockEvidence {
    pub fn is_valid(&self) -> bool {
        self.first.height() == self.height
            && self.second.height() == self.height
            && self.first.hash() != self.second.hash()
    }

    pub fn pair_hash(&self) -> Hash {
        pair_hash(self.first.hash(), self.second.hash())
    }
}

fn sha256d_of<T: serde::Serialize>(value: &T) -> Hash {
    let bytes = bincode::serialize(value).expect("evidence member serialization cannot fail");
    sha256d(&bytes)
}

/// Hashes two member hashes together in a fixed (sorted) order so the pair hash does not
/// depend on which member was observed first.
fn pair_hash(a: Hash, b: Hash) -> Hash {
    let (lo, hi) = if a.0 <= b.0 { (a, b) } else { (b, a) };
    let mut bytes = Vec::with_capacity(crate::crypto::HASH_LENGTH * 2);
    bytes.extend_from_slice(&lo.0);
    bytes.extend_from_slice(&hi.0);
    sha256d(&bytes)
}

/// Ready-for-inclusion evidence, in whichever of the three classes was detected.
#[derive(Debug, Clone)]
pub enum ReadyEvidence {
    Proposal(ProposalEvidence),
    Vote(VoteEvidence),
    Block(BlockEvidence),
}

/// Accumulates per-height observations of proposals, votes and confirmed blocks, pairing up
/// conflicting artifacts from the same signer into slashing evidence.
#[derive(Debug, Default)]
pub struct IllegalMonitor {
    proposals_seen: HashMap<(u32, PeerId), Proposal>,
    votes_seen: HashMap<(u32, PeerId), Vote>,
    blocks_seen: HashMap<u32, Block>,
    ready: Vec<ReadyEvidence>,
}

impl IllegalMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a proposal; returns evidence if it conflicts with one already seen from the
    /// same sponsor at the same height.
    pub fn observe_proposal(&mut self, height: u32, proposal: Proposal) -> Option<&ProposalEvidence> {
        let key = (height, proposal.sponsor);
        match self.proposals_seen.get(&key) {
            Some(prior) if prior.block_hash != proposal.block_hash => {
                let evidence = ProposalEvidence {
                    height,
                    sponsor: proposal.sponsor,
                    first: prior.clone(),
                    second: proposal,
                };
                self.ready.push(ReadyEvidence::Proposal(evidence));
                match self.ready.last() {
                    Some(ReadyEvidence::Proposal(e)) => Some(e),
                    _ => unreachable!(),
                }
            }
            Some(_) => None,
            None => {
                self.proposals_seen.insert(key, proposal);
                None
            }
        }
    }

    /// Records a vote; returns evidence if the same signer already voted for a different
    /// proposal at this height.
    pub fn observe_vote(&mut self, height: u32, signer: PeerId, vote: Vote) -> Option<&VoteEvidence> {
        let key = (height, signer);
        match self.votes_seen.get(&key) {
            Some(prior) if prior.proposal_hash != vote.proposal_hash => {
                let evidence = VoteEvidence {
                    height,
                    signer,
                    first: prior.clone(),
                    second: vote,
                };
                self.ready.push(ReadyEvidence::Vote(evidence));
                match self.ready.last() {
                    Some(ReadyEvidence::Vote(e)) => Some(e),
                    _ => unreachable!(),
                }
            }
            Some(_) => None,
            None => {
                self.votes_seen.insert(key, vote);
                None
            }
        }
    }

    /// Records a confirmed block; returns evidence if a different block was already
    /// confirmed at the same height.
    pub fn observe_confirmed_block(&mut self, block: Block) -> Option<&BlockEvidence> {
        let height = block.height();
        match self.blocks_seen.get(&height) {
            Some(prior) if prior.hash() != block.hash() => {
                let evidence = BlockEvidence {
                    height,
                    first: prior.clone(),
                    second: block,
                };
                self.ready.push(ReadyEvidence::Block(evidence));
                match self.ready.last() {
                    Some(ReadyEvidence::Block(e)) => Some(e),
                    _ => unreachable!(),
                }
            }
            Some(_) => None,
            None => {
                self.blocks_seen.insert(height, block);
                None
            }
        }
    }

    /// Drains the accumulated ready-for-inclusion evidence, for the block assembler.
    pub fn take_ready(&mut self) -> Vec<ReadyEvidence> {
        std::mem::take(&mut self.ready)
    }

    /// Forgets observations at or below `height`, once the chain has moved past it.
    pub fn prune_below(&mut self, height: u32) {
        self.proposals_seen.retain(|(h, _), _| *h >= height);
        self.votes_seen.retain(|(h, _), _| *h >= height);
        self.blocks_seen.retain(|h, _| *h >= height);
    }

    /// Consulted by the CSM before starting consensus on a received higher block: checks
    /// every illegal-evidence payload it carries actually satisfies I8.
    pub fn is_block_valid(&self, block: &Block) -> bool {
        block
            .transactions
            .iter()
            .all(|tx| validate_evidence_payload(&tx.payload).is_ok())
    }
}

fn validate_evidence_payload(payload: &crate::types::TxPayload) -> Result<(), CoreError> {
    use crate::types::TxPayload;
    match payload {
        TxPayload::IllegalProposalEvidence(e) if !e.is_valid() => Err(CoreError::EvidenceMalformed),
        TxPayload::IllegalVoteEvidence(e) if !e.is_valid() => Err(CoreError::EvidenceMalformed),
        TxPayload::IllegalBlockEvidence(e) if !e.is_valid() => Err(CoreError::EvidenceMalformed),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(byte: u8) -> PeerId {
        PeerId([byte; crate::crypto::PEER_ID_LENGTH])
    }

    fn proposal(sponsor: PeerId, height: u32, block_hash: Hash) -> Proposal {
        Proposal {
            sponsor,
            block_hash,
            height,
            view_offset: 0,
            signature: vec![],
        }
    }

    #[test]
    fn conflicting_proposals_from_same_sponsor_produce_evidence() {
        let mut monitor = IllegalMonitor::new();
        let sponsor = peer(1);
        assert!(monitor
            .observe_proposal(10, proposal(sponsor, 10, sha256d(b"a")))
            .is_none());
        let evidence = monitor
            .observe_proposal(10, proposal(sponsor, 10, sha256d(b"b")))
            .expect("conflicting proposal should produce evidence");
        assert!(evidence.is_valid());
        assert_eq!(monitor.take_ready().len(), 1);
    }

    #[test]
    fn identical_proposal_repeated_is_not_evidence() {
        let mut monitor = IllegalMonitor::new();
        let sponsor = peer(1);
        let hash = sha256d(b"a");
        assert!(monitor
            .observe_proposal(10, proposal(sponsor, 10, hash))
            .is_none());
        assert!(monitor
            .observe_proposal(10, proposal(sponsor, 10, hash))
            .is_none());
        assert!(monitor.take_ready().is_empty());
    }

    #[test]
    fn pair_hash_is_commutative() {
        let a = sha256d(b"a");
        let b = sha256d(b"b");
        assert_eq!(pair_hash(a, b), pair_hash(b, a));
    }
}
