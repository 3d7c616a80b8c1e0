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

//! The top-level orchestration struct: owns the lock-ordered components and dispatches
//! events to them (§5).

use crate::committee::Committee;
use crate::config::NodeConfig;
use crate::consensus::{BlockAssembler, Consensus, HandlerRole};
use crate::crypto::PeerId;
use crate::dispatcher::{Dispatcher, ProposalOutcome, VoteOutcome};
use crate::events::{ApiRequest, Event, EventHandler, EventQueue, EventSender, TimeoutKind, TimeoutRequest};
use crate::illegal::{IllegalMonitor, ReadyEvidence};
use crate::messages::{ConsensusSnapshot, Message};
use crate::network::PeerNetwork;
use crate::persistence::{Persistence, PersistedEvent};
use crate::tx_pool::{TxContext, TxPool};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Owns every stateful component and exposes them only through accessor methods, so call
/// sites cannot acquire the locks out of order (§5's "Committee -> BlockPool -> TxPool ->
/// Dispatcher" ordering).
pub struct Node {
    own_peer_id: PeerId,
    config: NodeConfig,
    committee: RwLock<Committee>,
    block_pool: Mutex<crate::block_pool::BlockPool>,
    tx_pool: RwLock<TxPool>,
    dispatcher: Mutex<Dispatcher>,
    illegal_monitor: Mutex<IllegalMonitor>,
    consensus: Mutex<Consensus>,
    network: Box<dyn PeerNetwork>,
    persistence: Box<dyn Persistence>,
    tx_context: Box<dyn TxContext>,
    assembler: Box<dyn BlockAssembler>,
}

impl Node {
    pub fn new(
        own_peer_id: PeerId,
        config: NodeConfig,
        network: Box<dyn PeerNetwork>,
        persistence: Box<dyn Persistence>,
        tx_context: Box<dyn TxContext>,
        assembler: Box<dyn BlockAssembler>,
    ) -> Self {
        Self {
            own_peer_id,
            committee: RwLock::new(Committee::new(config.committee)),
            block_pool: Mutex::new(crate::block_pool::BlockPool::new()),
            tx_pool: RwLock::new(TxPool::new()),
            dispatcher: Mutex::new(Dispatcher::new()),
            illegal_monitor: Mutex::new(IllegalMonitor::new()),
            consensus: Mutex::new(Consensus::new(own_peer_id, 0)),
            config,
            network,
            persistence,
            tx_context,
            assembler,
        }
    }

    /// Loads (or derives) the committee, arms consensus at the current height, and broadcasts
    /// a `req_con` recovery request so any peer further along can bring this node's in-flight
    /// proposal/vote state back up to date (§4.2 recovery).
    pub fn start_up(&self, height: u32) -> anyhow::Result<()> {
        self.committee.write().start_up(self.persistence.as_ref())?;
        *self.consensus.lock() = Consensus::new(self.own_peer_id, height);
        let request = self.consensus.lock().build_recovery_request();
        self.network.broadcast(request)?;
        Ok(())
    }

    pub fn own_peer_id(&self) -> PeerId {
        self.own_peer_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Admits a transaction into the pool. Acquired locks: `TxPool` only (§5 ordering is a
    /// partial order; this path never touches `Committee`, `BlockPool` or `Dispatcher`).
    pub fn submit_transaction(&self, tx: crate::types::Transaction) -> crate::error::CoreResult<crate::tx_pool::Admission> {
        let next_height = self.consensus.lock().height() + 1;
        let admission = self.tx_pool.write().append(tx, next_height, self.tx_context.as_ref())?;
        if admission.is_illegal_block_tx {
            warn!("transaction {} carries illegal-block evidence", admission.hash);
        }
        Ok(admission)
    }

    /// Folds any slashing evidence accumulated by the `IllegalMonitor` into pool-internal
    /// transactions, so the next assembled block carries it (§4.4, §4.6 step 7).
    fn submit_ready_evidence(&self) {
        let ready = self.illegal_monitor.lock().take_ready();
        if ready.is_empty() {
            return;
        }
        let mut pool = self.tx_pool.write();
        for evidence in ready {
            let payload = match evidence {
                ReadyEvidence::Proposal(e) => crate::types::TxPayload::IllegalProposalEvidence(e),
                ReadyEvidence::Vote(e) => crate::types::TxPayload::IllegalVoteEvidence(e),
                ReadyEvidence::Block(e) => crate::types::TxPayload::IllegalBlockEvidence(e),
            };
            let tx = crate::types::Transaction {
                version: crate::types::TX_VERSION_WITH_OUTPUT_PAYLOAD,
                payload,
                inputs: vec![],
                outputs: vec![],
                attributes: vec![],
                programs: vec![],
            };
            pool.insert_verified(tx);
        }
    }

    /// If the local node is on-duty for the current view, assembles and broadcasts a new
    /// proposal.
    fn try_propose(&self) -> anyhow::Result<()> {
        self.submit_ready_evidence();
        let committee = self.committee.read();
        let mut consensus = self.consensus.lock();
        if consensus.role(&committee)? != HandlerRole::OnDuty {
            return Ok(());
        }
        let block = {
            let pool = self.tx_pool.read();
            self.assembler.assemble(consensus.height(), &pool)
        };
        // Lock order: Committee (held above) -> BlockPool -> Dispatcher.
        let mut block_pool = self.block_pool.lock();
        let mut dispatcher = self.dispatcher.lock();
        consensus.propose(&block, &mut dispatcher, self.network.as_ref())?;
        drop(dispatcher);
        block_pool.append_dpos_block(block, &committee);
        Ok(())
    }

    fn handle_proposal(&self, proposal: crate::types::Proposal) {
        let committee = self.committee.read();
        if !committee.is_current_arbitrator(proposal.sponsor) {
            warn!("dropping proposal from non-arbitrator {}", proposal.sponsor);
            return;
        }

        // §4.2 missing-block tie-break: a proposal for a block this node has not received
        // yet triggers a `get-block` request, tracked so a retry picks an untried peer.
        let block_hash = proposal.block_hash;
        if self.block_pool.lock().get_block(block_hash).is_none() {
            let peer_to_ask = {
                let mut consensus = self.consensus.lock();
                if consensus.pending_block_request(block_hash).is_none() {
                    let known_peers = self.network.connected_peers();
                    let request = consensus.missing_block_request(block_hash, known_peers);
                    consensus.track_missing_block_request(request);
                }
                consensus.pending_block_request(block_hash).and_then(|r| r.next_peer())
            };
            if let Some(peer) = peer_to_ask {
                if let Err(e) = self.network.send_to(peer, Message::GetBlock { block_hash }) {
                    error!("failed to request missing block {}: {}", block_hash, e);
                }
            }
        }

        {
            let mut monitor = self.illegal_monitor.lock();
            if let Some(evidence) = monitor.observe_proposal(proposal.height, proposal.clone()) {
                warn!(
                    "sponsor {} double-proposed at height {}",
                    evidence.sponsor, evidence.height
                );
            }
        }
        self.persistence.append_event(PersistedEvent::Proposal {
            height: proposal.height,
            hash: proposal.block_hash,
        });

        let mut consensus = self.consensus.lock();
        let mut dispatcher = self.dispatcher.lock();
        let outcome = consensus.handle_proposal(proposal.clone(), &mut dispatcher);
        if outcome == ProposalOutcome::Accepted {
            let accept = true;
            let vote = crate::types::Vote {
                proposal_hash: proposal.hash(),
                signer: self.own_peer_id,
                accept,
                signature: Vec::new(),
            };
            drop(dispatcher);
            drop(consensus);
            drop(committee);
            if let Err(e) = self.network.broadcast(Message::AcceptVote(vote)) {
                error!("failed to broadcast vote: {}", e);
            }
        }
    }

    fn handle_vote(&self, vote: crate::types::Vote, accept: bool) {
        let height = self.consensus.lock().height();
        {
            let mut monitor = self.illegal_monitor.lock();
            if let Some(evidence) = monitor.observe_vote(height, vote.signer, vote.clone()) {
                warn!(
                    "signer {} double-voted at height {}",
                    evidence.signer, evidence.height
                );
            }
        }
        self.persistence.append_event(PersistedEvent::Vote {
            height,
            proposal_hash: vote.proposal_hash,
            signer: vote.signer,
            accept,
        });

        let committee = self.committee.read();
        let mut consensus = self.consensus.lock();
        let mut dispatcher = self.dispatcher.lock();
        let outcome = consensus.handle_vote(vote, accept, &committee, &mut dispatcher);
        drop(dispatcher);
        if outcome == VoteOutcome::RejectThreshold {
            self.persistence.append_event(PersistedEvent::ViewChange {
                height: consensus.height(),
                view_offset: consensus.view_offset(),
            });
        }
        if let VoteOutcome::Confirmed(confirm) = outcome {
            drop(consensus);
            drop(committee);
            self.on_confirm(confirm);
        }
    }

    /// Deposits a confirm into the block pool and, if it finalizes, rotates committee duty
    /// and rearms consensus for the next height — the single path that implements §2's
    /// "on threshold produces a confirm deposited into the Block Pool; the Block Pool
    /// notifies the Committee, which rotates duty; the CSM rearms for the next height" flow.
    fn on_confirm(&self, confirm: crate::types::Confirm) {
        let block_hash = confirm.block_hash;
        let result = {
            let committee = self.committee.read();
            self.block_pool.lock().append_confirm(confirm.clone(), &committee)
        };
        if !result.inserted || !result.finalized {
            return;
        }
        let block = self.block_pool.lock().get_block(block_hash).cloned();
        if let Some(block) = block {
            // I8: a confirmed block carrying evidence payloads that do not actually verify
            // is not adopted, even though its confirm cleared the majority threshold.
            if !crate::consensus::is_block_valid(&block, &self.illegal_monitor.lock()) {
                warn!("rejecting confirmed block {} carrying invalid evidence", block_hash);
                return;
            }
            self.persistence.append_event(PersistedEvent::Confirm {
                height: block.height(),
                block_hash,
            });
            self.illegal_monitor.lock().observe_confirmed_block(block.clone());
            {
                let mut committee = self.committee.write();
                if let Err(e) = committee.on_block_confirmed(self.persistence.as_ref()) {
                    error!("committee rotation failed: {}", e);
                }
            }
            let committee_for_sweep = self.committee.read();
            self.tx_pool.write().clean_submitted(&block, |tx| {
                matches!(&tx.payload, crate::types::TxPayload::SideChainPow { .. })
                    && committee_for_sweep.is_current_arbitrator(self.own_peer_id)
            });
            drop(committee_for_sweep);

            let next_height = block.height() + 1;
            let mut consensus = self.consensus.lock();
            *consensus = std::mem::replace(&mut *consensus, Consensus::new(self.own_peer_id, 0))
                .on_confirmed_block_received(&confirm, &mut self.dispatcher.lock());
            drop(consensus);
            debug_assert_eq!(self.consensus.lock().height(), next_height);
        }
        if let Err(e) = self.try_propose() {
            error!("failed to propose after rotation: {}", e);
        }
    }

    /// Adopts a recovered consensus snapshot received in answer to the `req_con` this node
    /// broadcast at start-up (§4.2 recovery).
    fn handle_recovery_response(&self, snapshot: ConsensusSnapshot) {
        let mut consensus = self.consensus.lock();
        if snapshot.height != consensus.height() {
            debug!(
                "ignoring recovery response for height {} while at height {}",
                snapshot.height,
                consensus.height()
            );
            return;
        }
        if let Some(processing) = snapshot.processing {
            let view_offset = processing.proposal.view_offset;
            let mut dispatcher = self.dispatcher.lock();
            consensus.adopt_recovery(view_offset, &mut dispatcher, processing);
            info!("recovered consensus state at height {}", snapshot.height);
        }
    }

    fn handle_network_message(&self, from: PeerId, message: Message) {
        match message {
            Message::Proposal(proposal) => self.handle_proposal(proposal),
            Message::AcceptVote(vote) => self.handle_vote(vote, true),
            Message::RejectVote(vote) => self.handle_vote(vote, false),
            Message::ResponseConsensus(snapshot) => self.handle_recovery_response(snapshot),
            other => {
                // Lock order: BlockPool -> Dispatcher (Committee is not needed here).
                let consensus = self.consensus.lock();
                let block_pool = self.block_pool.lock();
                let dispatcher = self.dispatcher.lock();
                if let Some(response) = crate::requests::handle_request(&other, &consensus, &dispatcher, &block_pool) {
                    drop(dispatcher);
                    drop(block_pool);
                    drop(consensus);
                    if let Err(e) = self.network.send_to(from, response) {
                        error!("failed to answer request from {}: {}", from, e);
                    }
                }
            }
        }
    }

    /// The actual event-matching logic, usable from both `EventHandler::handle_event` (which
    /// the bundled `EventQueue::run`/`step` expect) and `spawn_runner`'s closure-based
    /// `run_with`, since every handler here only needs `&self` (§5's components are all
    /// lock-guarded internally).
    fn dispatch_event(&self, event: Event) {
        match event {
            Event::Network(from, message) => self.handle_network_message(from, message),
            Event::Timeout(request) => match request.kind {
                TimeoutKind::ViewChange => {
                    let mut consensus = self.consensus.lock();
                    consensus.request_view_change();
                    let height = consensus.height();
                    let view_offset = consensus.view_offset();
                    drop(consensus);
                    self.persistence.append_event(PersistedEvent::ViewChange { height, view_offset });
                    if let Err(e) = self.try_propose() {
                        error!("failed to re-propose after view change: {}", e);
                    }
                }
                TimeoutKind::Keepalive | TimeoutKind::SyncBlock | TimeoutKind::PeerLiveness(_) => {}
            },
            Event::Transaction(tx) => {
                if let Err(e) = self.submit_transaction(tx) {
                    warn!("rejected transaction: {}", e);
                }
            }
            Event::Api(_) => {}
        }
    }

    /// Spawns the background network-poller, view-change timer, and single consumer threads
    /// described in §5 over a freshly built `EventQueue` sized from `config.queues`. Producer
    /// threads only ever touch `EventSender`/`PeerNetwork::poll_inbound`; the consumer thread
    /// is the only one that owns the `EventQueue`'s receiving half, since
    /// `std::sync::mpsc::Receiver` is `Send` but not `Sync`.
    pub fn spawn_runner(self: Arc<Self>) -> RunningNode {
        let capacity = self.config.queues.event_store_capacity
            + self.config.queues.network_capacity
            + self.config.queues.transaction_capacity;
        let queue = EventQueue::bounded(capacity);
        let sender = queue.sender();
        let stop = Arc::new(AtomicBool::new(false));

        let network_node = self.clone();
        let network_sender = queue.sender();
        let network_stop = stop.clone();
        let network_thread = thread::spawn(move || {
            while !network_stop.load(Ordering::Relaxed) {
                match network_node.network.poll_inbound() {
                    Some((from, message)) => {
                        if network_sender.send(Event::Network(from, message)).is_err() {
                            break;
                        }
                    }
                    None => thread::sleep(Duration::from_millis(20)),
                }
            }
        });

        let timer_node = self.clone();
        let timer_sender = queue.sender();
        let timer_stop = stop.clone();
        let view_change_timeout = Duration::from_millis(timer_node.config.timeouts.view_change_timeout_ms);
        let chunk = Duration::from_millis(50).min(view_change_timeout);
        let timer_thread = thread::spawn(move || {
            let mut elapsed = Duration::ZERO;
            while !timer_stop.load(Ordering::Relaxed) {
                thread::sleep(chunk);
                elapsed += chunk;
                if elapsed >= view_change_timeout {
                    elapsed = Duration::ZERO;
                    let consensus = timer_node.consensus.lock();
                    let request = TimeoutRequest {
                        height: consensus.height(),
                        view_offset: consensus.view_offset(),
                        kind: TimeoutKind::ViewChange,
                    };
                    drop(consensus);
                    if timer_sender.send(Event::Timeout(request)).is_err() {
                        break;
                    }
                }
            }
        });

        let consumer_node = self;
        let consumer_thread = thread::spawn(move || {
            queue.run_with(|event| consumer_node.dispatch_event(event));
        });

        RunningNode {
            sender,
            stop,
            network_thread,
            timer_thread,
            consumer_thread,
        }
    }
}

impl EventHandler for Node {
    fn handle_event(&mut self, event: Event) {
        self.dispatch_event(event);
    }
}

/// A handle to the three background threads started by `Node::spawn_runner`.
pub struct RunningNode {
    sender: EventSender,
    stop: Arc<AtomicBool>,
    network_thread: thread::JoinHandle<()>,
    timer_thread: thread::JoinHandle<()>,
    consumer_thread: thread::JoinHandle<()>,
}

impl RunningNode {
    /// A handle producers (an API layer, a transaction submission endpoint) can clone to
    /// push events without touching the `Node` directly.
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Signals the background threads to stop, wakes the consumer loop with a shutdown
    /// event, and waits for all three to exit.
    pub fn shutdown(self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.sender.send(Event::Api(ApiRequest::Shutdown));
        let _ = self.network_thread.join();
        let _ = self.timer_thread.join();
        let _ = self.consumer_thread.join();
    }
}
