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

//! Core data model: blocks, proposals, votes, confirms, transactions and illegal evidence.
//!
//! Serialization is handled by `bincode` over the `serde`-derived shapes below; see
//! `DESIGN.md` for the wire-format rationale.

use crate::crypto::{sha256d, Hash, PeerId};
use serde_derive::{Deserialize, Serialize};

/// A signature is treated as an opaque byte blob: verifying it is an out-of-scope
/// cryptographic primitive (a `Verifier` is injected where verification is needed).
pub type Signature = Vec<u8>;

/// Reference to an unspent transaction output: `(txid, output index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash,
    pub index: u16,
}

/// Consumes a previously created `OutPoint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub sequence: u32,
}

/// A vote-type tag for vote outputs; `Delegate` is the only type defined by the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteType {
    Delegate = 0x00,
}

/// A single candidate vote entry attached to a vote output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteContent {
    pub vote_type: VoteType,
    pub candidates: Vec<PeerId>,
}

/// Per-output typed payload, introduced by transaction version 9 (§6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputPayload {
    Default,
    Vote(Vec<VoteContent>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub value: u64,
    pub program_hash: crate::crypto::ProgramHash,
    pub payload: OutputPayload,
}

/// Minimum transaction version that carries per-output typed payloads.
pub const TX_VERSION_WITH_OUTPUT_PAYLOAD: u8 = 9;

/// The fifteen known transaction payload variants (§9 design note: "dynamic payload dispatch
/// ... is a sum type over fifteen known variants").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxPayload {
    CoinBase { coinbase_data: Vec<u8> },
    RegisterProducer { owner_public_key: PeerId, node_public_key: PeerId },
    CancelProducer { owner_public_key: PeerId },
    UpdateProducer { owner_public_key: PeerId, node_public_key: PeerId },
    ReturnDepositCoin,
    SideChainPow { genesis_hash: Hash, sidechain_height: u32 },
    RegisterIdentification,
    TransferAsset,
    WithdrawFromSideChain { sidechain_tx_hashes: Vec<Hash> },
    TransferCrossChainAsset,
    IllegalProposalEvidence(crate::illegal::ProposalEvidence),
    IllegalVoteEvidence(crate::illegal::VoteEvidence),
    IllegalBlockEvidence(crate::illegal::BlockEvidence),
    IllegalSidechainEvidence,
    InactiveArbitrators,
}

impl TxPayload {
    /// The one-byte `tx_type` tag used to index the serialization table (§9).
    pub fn tx_type(&self) -> u8 {
        match self {
            Self::CoinBase { .. } => 0,
            Self::RegisterProducer { .. } => 1,
            Self::CancelProducer { .. } => 2,
            Self::UpdateProducer { .. } => 3,
            Self::ReturnDepositCoin => 4,
            Self::SideChainPow { .. } => 5,
            Self::RegisterIdentification => 6,
            Self::TransferAsset => 7,
            Self::WithdrawFromSideChain { .. } => 8,
            Self::TransferCrossChainAsset => 9,
            Self::IllegalProposalEvidence(_) => 10,
            Self::IllegalVoteEvidence(_) => 11,
            Self::IllegalBlockEvidence(_) => 12,
            Self::IllegalSidechainEvidence => 13,
            Self::InactiveArbitrators => 14,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self, Self::CoinBase { .. })
    }

    /// Whether this payload carries illegal-blocks evidence for mempool notification (§4.6
    /// step 7: "Emit an `illegal-block-tx` notification").
    pub fn is_illegal_block_tx(&self) -> bool {
        matches!(self, Self::IllegalBlockEvidence(_))
    }
}

/// A transaction: version, type-tagged payload, inputs, outputs, attributes and programs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u8,
    pub payload: TxPayload,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub attributes: Vec<u8>,
    pub programs: Vec<u8>,
}

impl Transaction {
    /// Computes the transaction's hash: sha256d of its serialized form.
    pub fn hash(&self) -> Hash {
        let bytes = bincode::serialize(self).expect("transaction serialization cannot fail");
        sha256d(&bytes)
    }

    pub fn is_coinbase(&self) -> bool {
        self.payload.is_coinbase()
    }

    /// Every `OutPoint` this transaction spends.
    pub fn referenced_inputs(&self) -> impl Iterator<Item = OutPoint> + '_ {
        self.inputs.iter().map(|input| input.previous_output)
    }
}

/// Block header fields (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub previous_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
    pub height: u32,
    /// Bitcoin auxiliary proof-of-work header; parsing it is out of scope, so it is carried
    /// opaquely.
    pub aux_pow: Vec<u8>,
}

/// A block: header plus transaction list. Hashed by double-SHA256 over the serialized header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The block hash, computed over the serialized header only (transactions are committed
    /// to via `merkle_root`).
    pub fn hash(&self) -> Hash {
        let bytes =
            bincode::serialize(&self.header).expect("block header serialization cannot fail");
        sha256d(&bytes)
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }
}

/// A proposal: one active per (height, view).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub sponsor: PeerId,
    pub block_hash: Hash,
    pub height: u32,
    pub view_offset: u32,
    pub signature: Signature,
}

impl Proposal {
    pub fn hash(&self) -> Hash {
        let bytes = bincode::serialize(&(
            self.sponsor,
            self.block_hash,
            self.height,
            self.view_offset,
        ))
        .expect("proposal serialization cannot fail");
        sha256d(&bytes)
    }
}

/// A vote on a proposal: at most one per (proposal, signer, accept-axis).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub proposal_hash: Hash,
    pub signer: PeerId,
    pub accept: bool,
    pub signature: Signature,
}

/// A confirm: the bundle of accept votes that finalizes a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirm {
    pub block_hash: Hash,
    pub sponsor: PeerId,
    pub view_offset: u32,
    /// Sorted by signer hex ascending (§4.3: "deterministic in vote order").
    pub votes: Vec<Vote>,
}

impl Confirm {
    /// Builds a confirm from accumulated votes, sorting them deterministically so that two
    /// honest nodes emit byte-identical confirms (§4.3).
    pub fn new(block_hash: Hash, sponsor: PeerId, view_offset: u32, mut votes: Vec<Vote>) -> Self {
        votes.sort_by(|a, b| a.signer.to_hex().cmp(&b.signer.to_hex()));
        Self {
            block_hash,
            sponsor,
            view_offset,
            votes,
        }
    }

    pub fn accept_count(&self) -> usize {
        self.votes.iter().filter(|v| v.accept).count()
    }

    pub fn signers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.votes.iter().map(|v| v.signer)
    }
}
