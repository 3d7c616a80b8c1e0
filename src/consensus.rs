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

//! The consensus state machine and its on-duty/off-duty handler pair (§4.2).
//!
//! This module holds only the per-height protocol logic; the `Committee`, `Dispatcher`,
//! `BlockPool` and `TxPool` it operates on are owned and lock-ordered by `node::Node` (§5) and
//! passed in by reference.

use crate::committee::Committee;
use crate::crypto::{Hash, PeerId};
use crate::dispatcher::{Dispatcher, ProposalOutcome, VoteOutcome};
use crate::error::CoreResult;
use crate::messages::Message;
use crate::network::PeerNetwork;
use crate::state::{CsmState, HeightState};
use crate::tx_pool::TxPool;
use crate::types::{Block, Confirm, Proposal, Vote};
use log::{debug, info};

/// Whether the local node is the arbitrator empowered to propose this round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerRole {
    OnDuty,
    OffDuty,
}

/// Builds a `Block` from the pool for a proposal; block assembly policy (fee ordering, size
/// limits) is left to the implementor, matching §4.6's "the pool does not sort".
pub trait BlockAssembler: Send + Sync {
    fn assemble(&self, height: u32, pool: &TxPool) -> Block;
}

/// Drives one node's consensus participation across heights.
pub struct Consensus {
    own_peer_id: PeerId,
    height_state: HeightState,
}

impl Consensus {
    pub fn new(own_peer_id: PeerId, height: u32) -> Self {
        Self {
            own_peer_id,
            height_state: HeightState::new(height),
        }
    }

    pub fn height(&self) -> u32 {
        self.height_state.height()
    }

    pub fn view_offset(&self) -> u32 {
        self.height_state.view_offset()
    }

    pub fn csm_state(&self) -> CsmState {
        self.height_state.csm_state()
    }

    /// §4.2: the handler dual switches based on whether the committee reports the local key
    /// as on-duty for the current view offset.
    pub fn role(&self, committee: &Committee) -> CoreResult<HandlerRole> {
        let on_duty = committee.get_on_duty(self.height_state.view_offset())?;
        Ok(if on_duty == self.own_peer_id {
            HandlerRole::OnDuty
        } else {
            HandlerRole::OffDuty
        })
    }

    /// `Ready | on-duty & new block -> emit proposal; broadcast -> Running`.
    pub fn propose(
        &mut self,
        block: &Block,
        dispatcher: &mut Dispatcher,
        network: &dyn PeerNetwork,
    ) -> anyhow::Result<Proposal> {
        let proposal = Proposal {
            sponsor: self.own_peer_id,
            block_hash: block.hash(),
            height: self.height_state.height(),
            view_offset: self.height_state.view_offset(),
            signature: Vec::new(),
        };
        dispatcher.process_proposal(proposal.clone());
        self.height_state.set_csm_state(CsmState::Running);
        network.broadcast(Message::Proposal(proposal.clone()))?;
        info!(
            "PROPOSED block {} at height {} view {}",
            proposal.block_hash, proposal.height, proposal.view_offset
        );
        Ok(proposal)
    }

    /// `Ready | off-duty & proposal received -> validate; begin vote collection -> Running`.
    ///
    /// A proposal with a lower view offset than the current one is ignored (§4.2 tie-break).
    /// Proposal content validation beyond the view-offset tie-break (signature, block
    /// contents) is delegated to the injected `Verifier`/`Persistence` collaborators, out of
    /// scope here.
    pub fn handle_proposal(
        &mut self,
        proposal: Proposal,
        dispatcher: &mut Dispatcher,
    ) -> ProposalOutcome {
        if proposal.height != self.height_state.height() {
            debug!(
                "ignoring proposal for height {} while at height {}",
                proposal.height,
                self.height_state.height()
            );
            return ProposalOutcome::Ignored;
        }
        let outcome = dispatcher.process_proposal(proposal.clone());
        if outcome == ProposalOutcome::Accepted {
            self.height_state.set_csm_state(CsmState::Running);
        }
        outcome
    }

    /// `Running | vote received -> dispatcher.add; on threshold emit confirm -> Finished`.
    pub fn handle_vote(
        &mut self,
        vote: Vote,
        accept: bool,
        committee: &Committee,
        dispatcher: &mut Dispatcher,
    ) -> VoteOutcome {
        let outcome = dispatcher.process_vote(vote, accept, committee);
        match &outcome {
            VoteOutcome::Confirmed(_) => self.height_state.set_csm_state(CsmState::Finished),
            VoteOutcome::RejectThreshold => self.request_view_change(),
            _ => {}
        }
        outcome
    }

    /// `Running | reject threshold reached` or `view-change timer fires -> broadcast
    /// view-change -> ViewChanging`. There is no dedicated view-change wire message (§6's
    /// command table has none); a view change is communicated by the new on-duty arbitrator
    /// re-proposing at the incremented view offset, which off-duty peers accept per the
    /// `ViewChanging | new proposal with higher view -> accept -> Running` transition.
    pub fn request_view_change(&mut self) {
        self.height_state.advance_view();
        info!(
            "view change at height {}, now view {}",
            self.height_state.height(),
            self.height_state.view_offset()
        );
    }

    /// `Finished | block-pool confirms -> rotate duty via Committee; rearm -> Ready (next
    /// height)`.
    pub fn advance_height(self, new_height: u32, dispatcher: &mut Dispatcher) -> Self {
        dispatcher.clean(true);
        Self {
            own_peer_id: self.own_peer_id,
            height_state: self.height_state.advance_height(new_height),
        }
    }

    /// `OnBlockReceived(confirmed=true)`: finish consensus and advance height regardless of
    /// local CSM state.
    pub fn on_confirmed_block_received(self, confirm: &Confirm, dispatcher: &mut Dispatcher) -> Self {
        let next_height = self.height_state.height() + 1;
        info!("block {} confirmed, advancing to height {}", confirm.block_hash, next_height);
        self.advance_height(next_height, dispatcher)
    }

    /// Builds a `request-consensus` recovery message for the current height (§4.2 recovery).
    pub fn build_recovery_request(&self) -> Message {
        Message::RequestConsensus { height: self.height_state.height() }
    }

    /// Adopts a recovered consensus snapshot verbatim (view, proposal, accumulated votes),
    /// then resumes.
    pub fn adopt_recovery(&mut self, view_offset: u32, dispatcher: &mut Dispatcher, snapshot: crate::dispatcher::ProcessingSnapshot) {
        while self.height_state.view_offset() < view_offset {
            self.height_state.advance_view();
        }
        dispatcher.adopt_snapshot(snapshot);
        self.height_state.set_csm_state(CsmState::Running);
    }

    /// A proposal for a block the local node lacks: triggers a `get-block` reply path. The
    /// returned request should be tracked via `track_missing_block_request` by the caller.
    pub fn missing_block_request(&self, block_hash: Hash, known_peers: Vec<PeerId>) -> crate::state::RequestData {
        crate::state::RequestData::new(block_hash, known_peers)
    }

    /// Records an outstanding `get-block` request so a retry can pick the next untried peer.
    pub fn track_missing_block_request(&mut self, request: crate::state::RequestData) {
        self.height_state.track_request(request);
    }

    /// The outstanding request for `block_hash`, if one is being tracked.
    pub fn pending_block_request(&mut self, block_hash: Hash) -> Option<&mut crate::state::RequestData> {
        self.height_state.pending_request_for(block_hash)
    }

    /// Stops tracking the request for `block_hash`, once it has been answered.
    pub fn clear_block_request(&mut self, block_hash: Hash) {
        self.height_state.clear_request(block_hash);
    }
}

/// Validates that a received block is safe to start consensus on: it must not carry
/// illegal-evidence payloads that fail to verify (§4.4).
pub fn is_block_valid(block: &Block, illegal_monitor: &crate::illegal::IllegalMonitor) -> bool {
    illegal_monitor.is_block_valid(block)
}
