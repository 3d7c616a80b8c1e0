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

//! The DPoS overlay's peer message contract (§6).
//!
//! On the wire each message is a 12-byte command plus a length-prefixed payload; here the
//! envelope is modeled directly as a tagged `Message` enum and encoded end-to-end with
//! `bincode`, which preserves the same little-endian/length-prefixed shape without a
//! separate schema compiler (see `DESIGN.md` for the rationale).

use crate::crypto::{Hash, PeerId};
use crate::dispatcher::ProcessingSnapshot;
use crate::types::{Block, Confirm, Proposal, Vote};
use serde_derive::{Deserialize, Serialize};

/// The twelve-byte command strings used by the source wire format; kept here purely as
/// documentation of which `Message` variant corresponds to which command, since this
/// implementation encodes the whole enum (tag included) with `bincode` rather than writing a
/// separate 12-byte command field by hand.
pub mod command {
    pub const VERSION: &str = "version";
    pub const VERACK: &str = "verack";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const INVENTORY: &str = "inventory";
    pub const GET_BLOCK: &str = "getblock";
    pub const PROPOSAL: &str = "proposal";
    pub const ACC_VOTE: &str = "acc_vote";
    pub const REJ_VOTE: &str = "rej_vote";
    pub const GET_BLC: &str = "get_blc";
    pub const RES_BLC: &str = "res_blc";
    pub const REQ_CON: &str = "req_con";
    pub const RES_CON: &str = "res_con";
    pub const REQ_PRO: &str = "req_pro";
    pub const ILL_PRO: &str = "ill_pro";
    pub const ILL_VOTE: &str = "ill_vote";
}

/// Handshake payload: peer id, a random nonce, and a signature over the nonce (signing
/// itself is out of scope; the signature is carried opaquely for the injected `Verifier`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPayload {
    pub peer_id: PeerId,
    pub nonce: u64,
    pub signature: Vec<u8>,
}

/// A `(block, confirm?)` pair, as exchanged by `get_blc`/`res_blc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockWithConfirm {
    pub block: Block,
    pub confirm: Option<Confirm>,
}

/// Consensus status snapshot exchanged by `req_con`/`res_con` for abnormal recovery (§4.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusSnapshot {
    pub height: u32,
    pub processing: Option<ProcessingSnapshot>,
}

/// The peer message contract: one variant per wire command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Version(VersionPayload),
    Verack,
    Ping { height: u32 },
    Pong { height: u32 },
    Inventory { block_hash: Hash },
    GetBlock { block_hash: Hash },
    Proposal(Proposal),
    AcceptVote(Vote),
    RejectVote(Vote),
    GetBlocks { from_height: u32, to_height: u32 },
    ResponseBlocks { blocks: Vec<BlockWithConfirm> },
    RequestConsensus { height: u32 },
    ResponseConsensus(ConsensusSnapshot),
    RequestProposal { proposal_hash: Hash },
    IllegalProposal(crate::illegal::ProposalEvidence),
    IllegalVote(crate::illegal::VoteEvidence),
}

impl Message {
    /// The 12-byte (conceptually; see module docs) command this message corresponds to.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Version(_) => command::VERSION,
            Self::Verack => command::VERACK,
            Self::Ping { .. } => command::PING,
            Self::Pong { .. } => command::PONG,
            Self::Inventory { .. } => command::INVENTORY,
            Self::GetBlock { .. } => command::GET_BLOCK,
            Self::Proposal(_) => command::PROPOSAL,
            Self::AcceptVote(_) => command::ACC_VOTE,
            Self::RejectVote(_) => command::REJ_VOTE,
            Self::GetBlocks { .. } => command::GET_BLC,
            Self::ResponseBlocks { .. } => command::RES_BLC,
            Self::RequestConsensus { .. } => command::REQ_CON,
            Self::ResponseConsensus(_) => command::RES_CON,
            Self::RequestProposal { .. } => command::REQ_PRO,
            Self::IllegalProposal(_) => command::ILL_PRO,
            Self::IllegalVote(_) => command::ILL_VOTE,
        }
    }

    /// Encodes the message for the wire.
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decodes a message previously produced by `to_bytes`.
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trips_through_bincode() {
        let message = Message::Ping { height: 42 };
        let bytes = message.to_bytes().unwrap();
        let restored = Message::from_bytes(&bytes).unwrap();
        match restored {
            Message::Ping { height } => assert_eq!(height, 42),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn every_variant_reports_its_command() {
        assert_eq!(Message::Verack.command(), command::VERACK);
        assert_eq!(
            Message::Inventory { block_hash: Hash::zero() }.command(),
            command::INVENTORY
        );
    }
}
