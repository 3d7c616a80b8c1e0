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

//! End-to-end scenarios wiring the committee, dispatcher, consensus, block pool, transaction
//! pool and illegal monitor together, as opposed to each module's own unit tests.

use dpos_node::block_pool::BlockPool;
use dpos_node::committee::Committee;
use dpos_node::config::CommitteeConfig;
use dpos_node::consensus::Consensus;
use dpos_node::crypto::{sha256d, Hash, PeerId, PEER_ID_LENGTH};
use dpos_node::dispatcher::{Dispatcher, VoteOutcome};
use dpos_node::error::CoreError;
use dpos_node::illegal::IllegalMonitor;
use dpos_node::network::InMemoryNetwork;
use dpos_node::persistence::InMemoryPersistence;
use dpos_node::state::CsmState;
use dpos_node::tx_pool::{TxContext, TxPool};
use dpos_node::types::{
    Block, BlockHeader, OutPoint, Proposal, Transaction, TxIn, TxPayload, Vote,
};
use pretty_assertions::assert_eq;

struct AlwaysValid;

impl TxContext for AlwaysValid {
    fn validate_context(&self, _tx: &Transaction, _next_height: u32) -> dpos_node::error::CoreResult<()> {
        Ok(())
    }
}

fn peer(byte: u8) -> PeerId {
    PeerId([byte; PEER_ID_LENGTH])
}

/// Producers ranked by stake, descending: `peer(1) > peer(2) > ... > peer(n)`. With five
/// arbitrators this derives `current == [P1, P2, P3, P4, P5]` (peer(1)..peer(5)) because
/// ascending-hex order happens to match ascending byte value here.
fn committee_with_five_arbitrators() -> (Committee, InMemoryPersistence, Vec<PeerId>) {
    let persistence = InMemoryPersistence::new();
    let producers: Vec<PeerId> = (1..=10u8).map(peer).collect();
    persistence.set_producers_desc(producers);
    let mut committee = Committee::new(CommitteeConfig {
        arbitrators_count: 5,
        candidates_count: 2,
        majority_count: 3,
    });
    committee.start_up(&persistence).unwrap();
    let current = committee.current().to_vec();
    (committee, persistence, current)
}

fn empty_block(height: u32, seed: &[u8]) -> Block {
    Block {
        header: BlockHeader {
            version: 1,
            previous_hash: Hash::zero(),
            merkle_root: sha256d(seed),
            timestamp: 0,
            bits: 0,
            nonce: 0,
            height,
            aux_pow: vec![],
        },
        transactions: vec![],
    }
}

fn accept_vote(proposal_hash: Hash, signer: PeerId) -> Vote {
    Vote {
        proposal_hash,
        signer,
        accept: true,
        signature: vec![],
    }
}

fn reject_vote(proposal_hash: Hash, signer: PeerId) -> Vote {
    Vote {
        proposal_hash,
        signer,
        accept: false,
        signature: vec![],
    }
}

/// §8 scenario 1: a proposal that clears the accept threshold finalizes in the block pool,
/// rotates duty onto the next arbitrator, and advances consensus to the next height.
#[test]
fn basic_confirm_finalizes_rotates_and_advances_height() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (mut committee, persistence, current) = committee_with_five_arbitrators();
    let p1 = current[0];
    assert_eq!(committee.get_on_duty(0).unwrap(), p1);

    let mut consensus = Consensus::new(p1, 10);
    let mut dispatcher = Dispatcher::new();
    let mut block_pool = BlockPool::new();
    let network = InMemoryNetwork::new(current.clone());

    let block = empty_block(10, b"scenario-1");
    let proposal = consensus.propose(&block, &mut dispatcher, &network).unwrap();
    block_pool.append_dpos_block(block, &committee);

    let hash = proposal.hash();
    let mut confirm = None;
    for &signer in &current[1..5] {
        match consensus.handle_vote(accept_vote(hash, signer), true, &committee, &mut dispatcher) {
            VoteOutcome::Confirmed(c) => confirm = Some(c),
            VoteOutcome::Recorded => {}
            other => panic!("unexpected vote outcome: {:?}", other),
        }
    }
    let confirm = confirm.expect("four accepts should clear the majority threshold");
    assert!(confirm.accept_count() > committee.config().majority_count as usize);

    let result = block_pool.append_confirm(confirm.clone(), &committee);
    assert!(result.inserted);
    assert!(result.finalized);
    assert!(block_pool.is_finalized(confirm.block_hash));

    committee.on_block_confirmed(&persistence).unwrap();
    assert_eq!(committee.get_on_duty(0).unwrap(), current[1]);

    consensus = consensus.on_confirmed_block_received(&confirm, &mut dispatcher);
    assert_eq!(consensus.height(), 11);
    assert!(!dispatcher.is_processing(hash));
}

/// §8 scenario 2: with A=5, M=3 the reject threshold is `A - M == 2`; two rejects trigger a
/// view change, after which the on-duty arbitrator can repropose at the higher view.
#[test]
fn reject_threshold_triggers_view_change_then_repropose() {
    let (committee, _persistence, current) = committee_with_five_arbitrators();
    let p1 = current[0];
    let mut consensus = Consensus::new(p1, 10);
    let mut dispatcher = Dispatcher::new();
    let network = InMemoryNetwork::new(current.clone());

    let block = empty_block(10, b"scenario-2");
    let proposal = consensus.propose(&block, &mut dispatcher, &network).unwrap();
    let hash = proposal.hash();

    let outcome1 = consensus.handle_vote(reject_vote(hash, current[1]), false, &committee, &mut dispatcher);
    assert_eq!(outcome1, VoteOutcome::Recorded);
    assert_eq!(consensus.csm_state(), CsmState::Running);

    let outcome2 = consensus.handle_vote(reject_vote(hash, current[2]), false, &committee, &mut dispatcher);
    assert_eq!(outcome2, VoteOutcome::RejectThreshold);
    assert_eq!(consensus.csm_state(), CsmState::ViewChanging);
    assert_eq!(consensus.view_offset(), 1);

    let reproposal = consensus.propose(&block, &mut dispatcher, &network).unwrap();
    assert_eq!(reproposal.view_offset, 1);
    assert_eq!(network.drain_sent().len(), 2);
}

/// §8 scenario 3: a vote that arrives before its proposal is parked and replayed once the
/// proposal shows up, without being lost.
#[test]
fn vote_before_proposal_is_parked_and_replayed() {
    let (committee, _persistence, current) = committee_with_five_arbitrators();
    let p1 = current[0];
    let mut consensus = Consensus::new(p1, 10);
    let mut dispatcher = Dispatcher::new();
    let network = InMemoryNetwork::new(current.clone());

    let block = empty_block(10, b"scenario-3");
    // The proposal is built (so its hash is known to the voter) but not yet delivered to the
    // dispatcher.
    let would_be_hash = sha256d(
        &bincode::serialize(&(p1, block.hash(), 10_u32, 0_u32)).unwrap(),
    );
    let early_vote = accept_vote(would_be_hash, current[2]);
    let outcome = consensus.handle_vote(early_vote, true, &committee, &mut dispatcher);
    assert_eq!(outcome, VoteOutcome::Parked);
    assert!(dispatcher.get_processing().is_none());

    let proposal = consensus.propose(&block, &mut dispatcher, &network).unwrap();
    assert_eq!(proposal.hash(), would_be_hash);
    let snapshot = dispatcher.get_processing().expect("proposal now in flight");
    assert!(snapshot.accepts.iter().any(|v| v.signer == current[2]));
}

/// §8 scenario 4: a confirmed block that spends an input already claimed by a pooled
/// transaction evicts that transaction and releases its claim.
#[test]
fn confirmed_block_evicts_conflicting_pool_entry() {
    let mut pool = TxPool::new();
    let shared = OutPoint {
        txid: sha256d(b"scenario-4-utxo"),
        index: 0,
    };
    let t1 = Transaction {
        version: 9,
        payload: TxPayload::TransferAsset,
        inputs: vec![TxIn { previous_output: shared, sequence: 0 }],
        outputs: vec![],
        attributes: vec![],
        programs: vec![],
    };
    let admission = pool.append(t1, 1, &AlwaysValid).unwrap();
    assert!(pool.contains(admission.hash));

    let t2 = Transaction {
        version: 9,
        payload: TxPayload::TransferAsset,
        inputs: vec![TxIn { previous_output: shared, sequence: 0 }],
        outputs: vec![],
        attributes: vec![],
        programs: vec![],
    };
    let block = Block {
        header: BlockHeader {
            version: 1,
            previous_hash: Hash::zero(),
            merkle_root: Hash::zero(),
            timestamp: 0,
            bits: 0,
            nonce: 0,
            height: 11,
            aux_pow: vec![],
        },
        transactions: vec![t2],
    };
    pool.clean_submitted(&block, |_| true);
    assert!(!pool.contains(admission.hash));
}

/// §8 scenario 5: a producer owner key already registered by a pooled transaction cannot be
/// touched by a second producer-management transaction until the first clears.
#[test]
fn producer_owner_key_is_exclusive_across_pooled_transactions() {
    let mut pool = TxPool::new();
    let owner = peer(0xAA);
    let register = Transaction {
        version: 9,
        payload: TxPayload::RegisterProducer {
            owner_public_key: owner,
            node_public_key: peer(0xBB),
        },
        inputs: vec![TxIn {
            previous_output: OutPoint { txid: sha256d(b"reg"), index: 0 },
            sequence: 0,
        }],
        outputs: vec![],
        attributes: vec![],
        programs: vec![],
    };
    pool.append(register, 1, &AlwaysValid).unwrap();

    let update = Transaction {
        version: 9,
        payload: TxPayload::UpdateProducer {
            owner_public_key: owner,
            node_public_key: peer(0xCC),
        },
        inputs: vec![TxIn {
            previous_output: OutPoint { txid: sha256d(b"upd"), index: 0 },
            sequence: 0,
        }],
        outputs: vec![],
        attributes: vec![],
        programs: vec![],
    };
    let err = pool.append(update, 1, &AlwaysValid).unwrap_err();
    assert_eq!(err, CoreError::ProducerProcessing(owner));
}

/// §8 scenario 6: two proposals signed by the same sponsor at the same height with different
/// block hashes become slashing evidence the next block assembly round can include.
#[test]
fn conflicting_proposals_become_illegal_evidence_transaction() {
    let mut monitor = IllegalMonitor::new();
    let sponsor = peer(0x01);
    let p1 = Proposal {
        sponsor,
        block_hash: sha256d(b"h1"),
        height: 10,
        view_offset: 0,
        signature: vec![],
    };
    let p2 = Proposal {
        sponsor,
        block_hash: sha256d(b"h2"),
        height: 10,
        view_offset: 0,
        signature: vec![],
    };
    assert!(monitor.observe_proposal(10, p1).is_none());
    let evidence = monitor
        .observe_proposal(10, p2)
        .expect("second proposal from the same sponsor conflicts")
        .clone();
    assert!(evidence.is_valid());

    let ready = monitor.take_ready();
    assert_eq!(ready.len(), 1);

    // The block assembler would fold accumulated evidence into a transaction like this one.
    let slashing_tx = Transaction {
        version: 9,
        payload: TxPayload::IllegalProposalEvidence(evidence),
        inputs: vec![],
        outputs: vec![],
        attributes: vec![],
        programs: vec![],
    };
    assert!(monitor.is_block_valid(&Block {
        header: BlockHeader {
            version: 1,
            previous_hash: Hash::zero(),
            merkle_root: Hash::zero(),
            timestamp: 0,
            bits: 0,
            nonce: 0,
            height: 11,
            aux_pow: vec![],
        },
        transactions: vec![slashing_tx],
    }));
}
