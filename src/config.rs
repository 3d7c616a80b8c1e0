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

//! Node configuration types.
//!
//! Loading these from a file or environment is out of scope; this module only defines the
//! in-memory shapes and their validation.

use serde_derive::{Deserialize, Serialize};

/// Committee sizing and threshold configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeConfig {
    /// `A`: number of arbitrators in the active set.
    pub arbitrators_count: u32,
    /// `C`: maximum number of standby candidates tracked alongside the active set.
    pub candidates_count: u32,
    /// `M`: majority count; confirmation requires strictly more than this many accepts.
    pub majority_count: u32,
}

impl Default for CommitteeConfig {
    fn default() -> Self {
        Self {
            arbitrators_count: 12,
            candidates_count: 24,
            majority_count: 8,
        }
    }
}

impl CommitteeConfig {
    /// Validates the configuration, mirroring the source's "majority should be less than or
    /// equal to arbitrators count" guard in `InitArbitrators`.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.majority_count <= self.arbitrators_count,
            "majority_count ({}) must be less than or equal to arbitrators_count ({})",
            self.majority_count,
            self.arbitrators_count
        );
        anyhow::ensure!(
            self.arbitrators_count > 0,
            "arbitrators_count must be strictly positive"
        );
        Ok(())
    }
}

/// Timeout and queue-capacity configuration for the consensus engine (§5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusTimeouts {
    /// View-change timer per height, in milliseconds.
    pub view_change_timeout_ms: u64,
    /// Ping/pong keepalive interval, in milliseconds.
    pub keepalive_ms: u64,
    /// Dial timeout for establishing a peer connection, in milliseconds.
    pub dial_timeout_ms: u64,
    /// Sync-block timeout that triggers a resync attempt, in milliseconds.
    pub sync_block_timeout_ms: u64,
    /// Idle duration after which a peer with no activity is declared dead.
    pub peer_liveness_timeout_ms: u64,
}

impl Default for ConsensusTimeouts {
    fn default() -> Self {
        Self {
            view_change_timeout_ms: 10_000,
            keepalive_ms: 5_000,
            dial_timeout_ms: 30_000,
            sync_block_timeout_ms: 30_000,
            peer_liveness_timeout_ms: 60_000,
        }
    }
}

/// Bounded-channel capacities for the event loop (§5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventQueueConfig {
    /// Capacity of the bounded event-store writer queue; producers block on backpressure.
    pub event_store_capacity: usize,
    /// Capacity of the network-event queue.
    pub network_capacity: usize,
    /// Capacity of the transaction-intake queue.
    pub transaction_capacity: usize,
}

impl Default for EventQueueConfig {
    fn default() -> Self {
        Self {
            event_store_capacity: 10_000,
            network_capacity: 1_024,
            transaction_capacity: 4_096,
        }
    }
}

/// Top-level node configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub committee: CommitteeConfig,
    pub timeouts: ConsensusTimeouts,
    pub queues: EventQueueConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            committee: CommitteeConfig::default(),
            timeouts: ConsensusTimeouts::default(),
            queues: EventQueueConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Validates the whole configuration, catching accidental misconfiguration (e.g.
    /// zero-sized queues) early.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.committee.validate()?;
        anyhow::ensure!(
            self.queues.event_store_capacity > 0,
            "event_store_capacity must be strictly larger than 0"
        );
        anyhow::ensure!(
            self.queues.network_capacity > 0,
            "network_capacity must be strictly larger than 0"
        );
        Ok(())
    }
}
