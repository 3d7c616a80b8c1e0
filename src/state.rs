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

//! Per-height consensus bookkeeping: the CSM's state tag, the current view offset, and
//! outstanding `get-block`/`req_pro` request tracking (§4.2).

use crate::crypto::{Hash, PeerId};
use std::collections::HashSet;

/// The four CSM states (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsmState {
    Ready,
    Running,
    Finished,
    ViewChanging,
}

/// Tracks which peers have already been asked for a piece of data (a block or a proposal),
/// so retries fan out to peers that have not yet failed to answer.
#[derive(Debug, Clone)]
pub struct RequestData {
    data: Hash,
    known_peers: Vec<PeerId>,
    asked_peers: HashSet<PeerId>,
    attempts: u32,
}

impl RequestData {
    pub fn new(data: Hash, known_peers: Vec<PeerId>) -> Self {
        Self {
            data,
            known_peers,
            asked_peers: HashSet::new(),
            attempts: 0,
        }
    }

    pub fn data(&self) -> Hash {
        self.data
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Picks the next peer to ask: one that has not been asked yet this round, falling back
    /// to re-asking the least-recently-asked peer once everyone has been tried once.
    pub fn next_peer(&mut self) -> Option<PeerId> {
        let candidate = self
            .known_peers
            .iter()
            .find(|p| !self.asked_peers.contains(*p))
            .copied();
        let peer = candidate.or_else(|| self.known_peers.first().copied());
        if let Some(peer) = peer {
            self.asked_peers.insert(peer);
            self.attempts += 1;
        }
        peer
    }

    /// Learns about a newly connected peer that might have the requested data.
    pub fn add_known_peer(&mut self, peer: PeerId) {
        if !self.known_peers.contains(&peer) {
            self.known_peers.push(peer);
        }
    }
}

/// Consensus state for the current height: the CSM tag, view offset, and any outstanding
/// data requests (block or proposal) the node is waiting on.
#[derive(Debug)]
pub struct HeightState {
    height: u32,
    view_offset: u32,
    csm_state: CsmState,
    requests: Vec<RequestData>,
}

impl HeightState {
    pub fn new(height: u32) -> Self {
        Self {
            height,
            view_offset: 0,
            csm_state: CsmState::Ready,
            requests: Vec::new(),
        }
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn view_offset(&self) -> u32 {
        self.view_offset
    }

    pub fn csm_state(&self) -> CsmState {
        self.csm_state
    }

    pub fn set_csm_state(&mut self, state: CsmState) {
        self.csm_state = state;
    }

    /// I4: view offsets are monotonically non-decreasing within one height.
    pub fn advance_view(&mut self) {
        self.view_offset += 1;
        self.csm_state = CsmState::ViewChanging;
    }

    /// Resets bookkeeping for a freshly-started height; outstanding request state older than
    /// the new height is dropped (§5: "a per-height context is cancelled when the height
    /// advances").
    pub fn advance_height(self, new_height: u32) -> Self {
        Self::new(new_height)
    }

    pub fn track_request(&mut self, request: RequestData) {
        self.requests.push(request);
    }

    pub fn pending_request_for(&mut self, data: Hash) -> Option<&mut RequestData> {
        self.requests.iter_mut().find(|r| r.data() == data)
    }

    pub fn clear_request(&mut self, data: Hash) {
        self.requests.retain(|r| r.data() != data);
    }

    pub fn pending_requests(&self) -> &[RequestData] {
        &self.requests
    }
}
