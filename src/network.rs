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

//! The peer-to-peer transport: a black box behind a `PeerNetwork` trait that delivers typed
//! messages (§1 out-of-scope, §6). Framing, dialing and handshake encryption are not
//! implemented here; a production node supplies a real implementation.

use crate::crypto::PeerId;
use crate::messages::Message;
use std::collections::VecDeque;
use std::sync::Mutex;

/// What the consensus and mempool layers need from the transport: send to one peer, or
/// broadcast to the whole connect list.
pub trait PeerNetwork: Send + Sync {
    fn send_to(&self, peer: PeerId, message: Message) -> anyhow::Result<()>;
    fn broadcast(&self, message: Message) -> anyhow::Result<()>;
    /// The peers currently considered connected and live (§5: disconnect after 60s idle).
    fn connected_peers(&self) -> Vec<PeerId>;

    /// Pulls one inbound message already received from the wire, if any, for the background
    /// poller thread that feeds it into the event queue (§5). The default reports no
    /// traffic; a real transport overrides this to drain its receive queue.
    fn poll_inbound(&self) -> Option<(PeerId, Message)> {
        None
    }
}

/// A record of one outgoing call, kept by [`InMemoryNetwork`] for assertions in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    To(PeerId, Message),
    Broadcast(Message),
}

/// An in-memory `PeerNetwork` fake: records every call instead of touching a socket.
pub struct InMemoryNetwork {
    peers: Vec<PeerId>,
    sent: Mutex<VecDeque<SentMessage>>,
    inbound: Mutex<VecDeque<(PeerId, Message)>>,
}

impl InMemoryNetwork {
    pub fn new(peers: Vec<PeerId>) -> Self {
        Self {
            peers,
            sent: Mutex::new(VecDeque::new()),
            inbound: Mutex::new(VecDeque::new()),
        }
    }

    /// Drains every call recorded so far, oldest first.
    pub fn drain_sent(&self) -> Vec<SentMessage> {
        self.sent.lock().expect("network mutex poisoned").drain(..).collect()
    }

    /// Queues a message as though it had just arrived from `from`, for tests exercising the
    /// background network-poller thread.
    pub fn deliver(&self, from: PeerId, message: Message) {
        self.inbound.lock().expect("network mutex poisoned").push_back((from, message));
    }
}

impl PeerNetwork for InMemoryNetwork {
    fn send_to(&self, peer: PeerId, message: Message) -> anyhow::Result<()> {
        self.sent
            .lock()
            .expect("network mutex poisoned")
            .push_back(SentMessage::To(peer, message));
        Ok(())
    }

    fn broadcast(&self, message: Message) -> anyhow::Result<()> {
        self.sent
            .lock()
            .expect("network mutex poisoned")
            .push_back(SentMessage::Broadcast(message));
        Ok(())
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.peers.clone()
    }

    fn poll_inbound(&self) -> Option<(PeerId, Message)> {
        self.inbound.lock().expect("network mutex poisoned").pop_front()
    }
}
