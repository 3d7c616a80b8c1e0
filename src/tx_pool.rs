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

//! Transaction pool: admission, multi-axis uniqueness enforcement, and eviction on a newly
//! confirmed block (§4.6).

use crate::crypto::{Hash, PeerId};
use crate::error::{CoreError, CoreResult};
use crate::types::{Block, OutPoint, OutputPayload, Transaction, TxPayload, VoteType};
use log::{info, warn};
use std::collections::{HashMap, HashSet};

/// Contextual validation against the chain-store: out of scope, injected at the call site.
pub trait TxContext: Send + Sync {
    /// Checks inputs exist and are unspent on-chain, signature validity, and any other
    /// chain-state-dependent rule. Context-free sanity (size, form) is handled locally.
    fn validate_context(&self, tx: &Transaction, next_height: u32) -> CoreResult<()>;
}

/// Maximum serialized transaction size the pool will admit, mirroring the source's
/// `MaxBlockContextSize`-derived per-transaction ceiling (§4.6 step 2: "size").
pub const MAX_TRANSACTION_SIZE: usize = 100_000;

fn sanity_check(tx: &Transaction) -> CoreResult<()> {
    let size = bincode::serialized_size(tx)
        .map_err(|e| CoreError::SanityFailure(format!("transaction cannot be serialized: {}", e)))?
        as usize;
    if size > MAX_TRANSACTION_SIZE {
        return Err(CoreError::SanityFailure(format!(
            "transaction size {} exceeds the {} byte limit",
            size, MAX_TRANSACTION_SIZE
        )));
    }
    if tx.inputs.is_empty() && !tx.is_coinbase() {
        return Err(CoreError::SanityFailure("transaction has no inputs".into()));
    }
    let mut seen = HashSet::new();
    for input in &tx.inputs {
        if !seen.insert(input.previous_output) {
            return Err(CoreError::SanityFailure(
                "transaction spends the same input twice".into(),
            ));
        }
    }
    Ok(())
}

/// Admission result for a transaction that was not rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub hash: Hash,
    /// Set when the admitted transaction carries illegal-blocks evidence (§4.6 step 7).
    pub is_illegal_block_tx: bool,
}

#[derive(Debug, Default)]
pub struct TxPool {
    tx_by_hash: HashMap<Hash, Transaction>,
    input_claim: HashMap<OutPoint, Hash>,
    sidechain_hash: HashMap<Hash, Hash>,
    producer_owner: HashMap<PeerId, Hash>,
    producer_node: HashMap<PeerId, Hash>,
}

impl TxPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tx_by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx_by_hash.is_empty()
    }

    pub fn contains(&self, hash: Hash) -> bool {
        self.tx_by_hash.contains_key(&hash)
    }

    /// Admits a transaction, in the order described by §4.6.
    pub fn append(
        &mut self,
        tx: Transaction,
        next_height: u32,
        context: &dyn TxContext,
    ) -> CoreResult<Admission> {
        if tx.is_coinbase() {
            return Err(CoreError::IneffectiveCoinbase);
        }
        let hash = tx.hash();
        if self.tx_by_hash.contains_key(&hash) {
            return Err(CoreError::TransactionDuplicate(hash));
        }
        sanity_check(&tx)?;
        context.validate_context(&tx, next_height)?;

        // Side-chain-pow conflict replacement: a new one for the same genesis hash evicts
        // the old one rather than being rejected.
        if let TxPayload::SideChainPow { genesis_hash, .. } = &tx.payload {
            if let Some(&old_hash) = self.sidechain_hash.get(genesis_hash) {
                self.remove(old_hash);
            }
        }

        if let TxPayload::WithdrawFromSideChain { sidechain_tx_hashes } = &tx.payload {
            for sidechain_hash in sidechain_tx_hashes {
                if self.sidechain_hash.contains_key(sidechain_hash) {
                    return Err(CoreError::SidechainTxDuplicate);
                }
            }
        }

        if let Some(owner) = producer_owner_key(&tx.payload) {
            if self.producer_owner.contains_key(&owner) {
                return Err(CoreError::ProducerProcessing(owner));
            }
        }
        if let Some(node) = producer_node_key(&tx.payload) {
            if self.producer_node.contains_key(&node) {
                return Err(CoreError::ProducerNodeProcessing(node));
            }
        }
        for outpoint in tx.referenced_inputs() {
            if self.input_claim.contains_key(&outpoint) {
                return Err(CoreError::DoubleSpend);
            }
        }

        for outpoint in tx.referenced_inputs() {
            self.input_claim.insert(outpoint, hash);
        }
        if let TxPayload::SideChainPow { genesis_hash, .. } = &tx.payload {
            self.sidechain_hash.insert(*genesis_hash, hash);
        }
        if let TxPayload::WithdrawFromSideChain { sidechain_tx_hashes } = &tx.payload {
            for sidechain_hash in sidechain_tx_hashes {
                self.sidechain_hash.insert(*sidechain_hash, hash);
            }
        }
        if let Some(owner) = producer_owner_key(&tx.payload) {
            self.producer_owner.insert(owner, hash);
        }
        if let Some(node) = producer_node_key(&tx.payload) {
            self.producer_node.insert(node, hash);
        }

        let is_illegal_block_tx = tx.payload.is_illegal_block_tx();
        self.tx_by_hash.insert(hash, tx);
        info!("admitted transaction {} (pool size {})", hash, self.tx_by_hash.len());

        Ok(Admission { hash, is_illegal_block_tx })
    }

    fn remove(&mut self, hash: Hash) -> Option<Transaction> {
        let tx = self.tx_by_hash.remove(&hash)?;
        self.input_claim.retain(|_, claimant| *claimant != hash);
        self.sidechain_hash.retain(|_, claimant| *claimant != hash);
        self.producer_owner.retain(|_, claimant| *claimant != hash);
        self.producer_node.retain(|_, claimant| *claimant != hash);
        Some(tx)
    }

    /// Evicts pool entries invalidated by a newly confirmed block.
    ///
    /// `on_duty_check` re-validates a buffered sidechain-pow transaction's consensus claim
    /// against the current on-duty arbitrator; it returns `false` when the entry should be
    /// swept.
    pub fn clean_submitted(&mut self, block: &Block, on_duty_check: impl Fn(&Transaction) -> bool) {
        let mut evict: HashSet<Hash> = HashSet::new();
        let mut cancelled_owners: HashSet<PeerId> = HashSet::new();
        let mut covered_sidechain_hashes: HashSet<Hash> = HashSet::new();

        for committed in &block.transactions {
            if committed.is_coinbase() {
                continue;
            }
            for outpoint in committed.referenced_inputs() {
                if let Some(&claimant) = self.input_claim.get(&outpoint) {
                    evict.insert(claimant);
                }
            }
            if let TxPayload::WithdrawFromSideChain { sidechain_tx_hashes } = &committed.payload {
                covered_sidechain_hashes.extend(sidechain_tx_hashes.iter().copied());
            }
            if let TxPayload::CancelProducer { owner_public_key } = &committed.payload {
                cancelled_owners.insert(*owner_public_key);
            }
        }

        for (&sidechain_hash, &claimant) in &self.sidechain_hash {
            if covered_sidechain_hashes.contains(&sidechain_hash) {
                evict.insert(claimant);
            }
        }

        for (hash, tx) in &self.tx_by_hash {
            if matches!(tx.payload, TxPayload::SideChainPow { .. }) && !on_duty_check(tx) {
                evict.insert(*hash);
            }
        }

        if !cancelled_owners.is_empty() {
            for (hash, tx) in &self.tx_by_hash {
                if tx_votes_for_owner(tx, &cancelled_owners)
                    || matches!(&tx.payload, TxPayload::UpdateProducer { owner_public_key, .. }
                        if cancelled_owners.contains(owner_public_key))
                {
                    evict.insert(*hash);
                }
            }
        }

        for hash in evict {
            if self.remove(hash).is_some() {
                warn!("evicted transaction {} on new confirmed block", hash);
            }
        }
    }

    /// Returns up to `max` transactions in unspecified order; the block assembler performs
    /// fee-based selection, the pool does not sort.
    pub fn get_pool(&self, max: usize) -> Vec<Transaction> {
        self.tx_by_hash.values().take(max).cloned().collect()
    }

    /// Inserts a transaction the protocol itself constructed and already verified (illegal-
    /// evidence payloads detected by `IllegalMonitor`), bypassing the admission checks meant
    /// for externally-submitted transactions. A no-op if the hash is already pooled.
    pub fn insert_verified(&mut self, tx: Transaction) -> Hash {
        let hash = tx.hash();
        if self.tx_by_hash.contains_key(&hash) {
            return hash;
        }
        for outpoint in tx.referenced_inputs() {
            self.input_claim.insert(outpoint, hash);
        }
        self.tx_by_hash.insert(hash, tx);
        hash
    }
}

fn producer_owner_key(payload: &TxPayload) -> Option<PeerId> {
    match payload {
        TxPayload::RegisterProducer { owner_public_key, .. } => Some(*owner_public_key),
        TxPayload::CancelProducer { owner_public_key } => Some(*owner_public_key),
        TxPayload::UpdateProducer { owner_public_key, .. } => Some(*owner_public_key),
        _ => None,
    }
}

fn producer_node_key(payload: &TxPayload) -> Option<PeerId> {
    match payload {
        TxPayload::RegisterProducer { node_public_key, .. } => Some(*node_public_key),
        TxPayload::UpdateProducer { node_public_key, .. } => Some(*node_public_key),
        _ => None,
    }
}

fn tx_votes_for_owner(tx: &Transaction, owners: &HashSet<PeerId>) -> bool {
    if !matches!(tx.payload, TxPayload::TransferAsset) {
        return false;
    }
    tx.outputs.iter().any(|output| match &output.payload {
        OutputPayload::Vote(contents) => contents.iter().any(|content| {
            content.vote_type == VoteType::Delegate
                && content.candidates.iter().any(|c| owners.contains(c))
        }),
        OutputPayload::Default => false,
    })
}
