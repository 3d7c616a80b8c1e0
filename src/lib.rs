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

//! The core of a Delegated Proof-of-Stake node: committee rotation, the propose/vote/
//! view-change consensus state machine, the transaction pool, and illegal-behavior
//! (slashing evidence) detection.
//!
//! # Overview
//!
//! This crate contains the following APIs:
//!
//! - [`node::Node`] wires the stateful components together behind lock-ordered accessors.
//! - [`committee::Committee`] tracks the current/next arbitrator sets and on-duty derivation.
//! - [`consensus::Consensus`] and [`dispatcher::Dispatcher`] drive one round of the protocol.
//! - [`tx_pool::TxPool`] admits transactions and enforces the pool's uniqueness axes.
//! - [`illegal::IllegalMonitor`] accumulates slashing evidence.
//!
//! Persistent storage, the peer transport, and signature verification are out-of-scope
//! collaborators modeled as traits ([`persistence::Persistence`], [`network::PeerNetwork`]);
//! callers supply real implementations, tests use the in-memory fakes provided here.

#![warn(missing_debug_implementations, unsafe_code, bare_trait_objects)]

pub mod block_pool;
pub mod committee;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod illegal;
pub mod messages;
pub mod network;
pub mod node;
pub mod persistence;
pub mod requests;
pub mod state;
pub mod tx_pool;
pub mod types;

pub use crate::{
    committee::Committee,
    config::NodeConfig,
    error::{CoreError, CoreResult},
    node::Node,
};
