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

//! Read-only request/response handling: `get-block`, `req_pro`, `req_con` and the
//! height-range block-sync pair (§4.2 recovery, §6).

use crate::block_pool::BlockPool;
use crate::consensus::Consensus;
use crate::crypto::Hash;
use crate::dispatcher::Dispatcher;
use crate::error::{CoreError, CoreResult};
use crate::messages::{BlockWithConfirm, ConsensusSnapshot, Message};

/// Answers a single incoming request-shaped message, or `None` if `message` was not a
/// request this module handles (e.g. it is a vote or proposal, handled by `consensus`).
pub fn handle_request(
    message: &Message,
    consensus: &Consensus,
    dispatcher: &Dispatcher,
    block_pool: &BlockPool,
) -> Option<Message> {
    match message {
        Message::GetBlock { block_hash } => {
            block_pool.get_block(*block_hash).map(|block| {
                Message::ResponseBlocks {
                    blocks: vec![BlockWithConfirm {
                        block: block.clone(),
                        confirm: block_pool.get_confirm(*block_hash).cloned(),
                    }],
                }
            })
        }
        Message::RequestProposal { proposal_hash } => dispatcher.get_processing().and_then(|snapshot| {
            if snapshot.proposal.hash() == *proposal_hash {
                Some(Message::Proposal(snapshot.proposal))
            } else {
                None
            }
        }),
        Message::RequestConsensus { height } if *height == consensus.height() => {
            Some(Message::ResponseConsensus(ConsensusSnapshot {
                height: consensus.height(),
                processing: dispatcher.get_processing(),
            }))
        }
        Message::GetBlocks { from_height, to_height } => {
            let blocks: Vec<BlockWithConfirm> = (*from_height..=*to_height)
                .filter_map(|height| block_pool.finalized_at(height))
                .filter_map(|hash| {
                    let block = block_pool.get_block(hash)?;
                    Some(BlockWithConfirm {
                        block: block.clone(),
                        confirm: block_pool.get_confirm(hash).cloned(),
                    })
                })
                .collect();
            Some(Message::ResponseBlocks { blocks })
        }
        _ => None,
    }
}

/// Height-range sync over the out-of-scope chain-store.
///
/// The source leaves `GetDposBlocks`/`AppendDposBlocks` as stubs; rather than invent a
/// height-range sync protocol it never specified, these remain explicit "not implemented"
/// stubs (§9, resolved open question).
#[derive(Debug, Default)]
pub struct BlockSync;

impl BlockSync {
    pub fn get_dpos_blocks(&self, _from_height: u32, _to_height: u32) -> CoreResult<Vec<Hash>> {
        Err(CoreError::Persistence("not implemented".into()))
    }

    pub fn append_dpos_blocks(&self, _blocks: Vec<BlockWithConfirm>) -> CoreResult<()> {
        Err(CoreError::Persistence("not implemented".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{sha256d, PeerId};
    use crate::types::{Block, BlockHeader, Confirm};

    fn block(height: u32) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                previous_hash: Hash::zero(),
                merkle_root: sha256d(b"m"),
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
    fn get_block_returns_buffered_block() {
        let mut pool = BlockPool::new();
        let b = block(5);
        let hash = b.hash();
        pool.append_dpos_block(b, &test_committee());

        let dispatcher = Dispatcher::new();
        let consensus = Consensus::new(PeerId([1; crate::crypto::PEER_ID_LENGTH]), 5);
        let response = handle_request(&Message::GetBlock { block_hash: hash }, &consensus, &dispatcher, &pool);
        assert!(matches!(response, Some(Message::ResponseBlocks { .. })));
    }

    #[test]
    fn request_consensus_for_wrong_height_is_ignored() {
        let pool = BlockPool::new();
        let dispatcher = Dispatcher::new();
        let consensus = Consensus::new(PeerId([1; crate::crypto::PEER_ID_LENGTH]), 5);
        let response = handle_request(&Message::RequestConsensus { height: 99 }, &consensus, &dispatcher, &pool);
        assert!(response.is_none());
    }

    #[test]
    fn block_sync_stubs_report_not_implemented() {
        let sync = BlockSync::default();
        assert!(sync.get_dpos_blocks(0, 10).is_err());
        assert!(sync.append_dpos_blocks(vec![]).is_err());
    }

    fn test_committee() -> crate::committee::Committee {
        use crate::committee::Committee;
        use crate::config::CommitteeConfig;
        use crate::persistence::InMemoryPersistence;
        let persistence = InMemoryPersistence::new();
        persistence.set_producers_desc((0..10).map(|i| PeerId([i; crate::crypto::PEER_ID_LENGTH])).collect());
        let mut committee = Committee::new(CommitteeConfig { arbitrators_count: 5, candidates_count: 2, majority_count: 3 });
        committee.start_up(&persistence).unwrap();
        committee
    }
}
