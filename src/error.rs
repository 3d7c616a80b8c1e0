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

//! Error taxonomy for the DPoS core.
//!
//! Validation errors returned by this enum never kill the process: callers log them and
//! reject the offending message or transaction. `anyhow::Error` is used instead at the
//! orchestration boundary, where several collaborators are combined and the caller only
//! cares that *something* failed.

use crate::crypto::{Hash, PeerId};
use thiserror::Error;

/// Leaf error type covering every validation and admission failure in the core.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CoreError {
    /// A coinbase transaction was submitted directly to the mempool.
    #[error("coinbase transactions are not accepted by the transaction pool")]
    IneffectiveCoinbase,

    /// The transaction's hash already exists in the pool.
    #[error("transaction {0} is already in the pool")]
    TransactionDuplicate(Hash),

    /// One of the transaction's inputs is already claimed by another pooled transaction.
    #[error("input already claimed by a pooled transaction")]
    DoubleSpend,

    /// A sidechain withdrawal hash is already claimed by a pooled transaction.
    #[error("sidechain withdrawal hash already in pool")]
    SidechainTxDuplicate,

    /// A producer owner key is already being registered/updated/cancelled by a pooled tx.
    #[error("producer owner key {0} already being processed")]
    ProducerProcessing(PeerId),

    /// A producer node key is already being registered/updated by a pooled tx.
    #[error("producer node key {0} already being processed")]
    ProducerNodeProcessing(PeerId),

    /// Context-free sanity validation failed (malformed size, signature, form).
    #[error("transaction failed sanity validation: {0}")]
    SanityFailure(String),

    /// Contextual validation against chain state failed.
    #[error("transaction failed contextual validation: {0}")]
    ContextFailure(String),

    /// A consensus message arrived for a height/view that has already passed.
    #[error("consensus message is stale (height or view already advanced)")]
    ConsensusStale,

    /// An illegal-evidence pair failed equality or signature checks.
    #[error("illegal evidence pair is malformed")]
    EvidenceMalformed,

    /// Committee rotation was attempted without enough producers (violates I2).
    #[error("producers count ({available}) less than required arbitrators count ({required})")]
    RotationUnavailable { available: usize, required: usize },

    /// The out-of-scope persistence (chain-store) collaborator failed or is unimplemented.
    #[error("persistence error: {0}")]
    Persistence(String),
}

/// Convenience alias for core operations that can fail with a [`CoreError`].
pub type CoreResult<T> = Result<T, CoreError>;
