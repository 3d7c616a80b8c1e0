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

//! Hashing and addressing primitives used by the DPoS core.
//!
//! Signature verification itself is out of scope (see the crate-level docs); this module
//! only provides the hash and address derivations, so that two honest nodes always agree
//! on them.

use ripemd::{Digest as _, Ripemd160};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length in bytes of a compressed secp256k1-style public key.
pub const PEER_ID_LENGTH: usize = 33;

/// Identifier of an arbitrator / peer: a compressed public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub [u8; PEER_ID_LENGTH]);

// `serde`'s derive only implements (De)Serialize for fixed-size arrays up to length 32;
// `PEER_ID_LENGTH` is 33, so the array is (de)serialized manually as a byte sequence instead.
impl Serialize for PeerId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes: Vec<u8> = serde::Deserialize::deserialize(deserializer)?;
        if bytes.len() != PEER_ID_LENGTH {
            return Err(serde::de::Error::invalid_length(bytes.len(), &"33 bytes"));
        }
        let mut buf = [0_u8; PEER_ID_LENGTH];
        buf.copy_from_slice(&bytes);
        Ok(PeerId(buf))
    }
}

impl PeerId {
    /// Returns the canonical hex-lexicographic representation used to sort arbitrators.
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// Parses a `PeerId` back from its hex representation.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let mut buf = [0_u8; PEER_ID_LENGTH];
        if bytes.len() != PEER_ID_LENGTH {
            // Reuse `hex`'s own length-mismatch error variant for a simple conversion.
            return Err(hex::FromHexError::InvalidStringLength);
        }
        buf.copy_from_slice(&bytes);
        Ok(Self(buf))
    }

    /// Derives the standard program hash (address) for this key.
    pub fn program_hash(self) -> ProgramHash {
        program_hash(&self.0, AddressType::Standard)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.to_hex())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Length of a double-SHA256 digest.
pub const HASH_LENGTH: usize = 32;

/// A double-SHA256 hash, used for blocks, proposals, votes and evidence pairs.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Hash(pub [u8; HASH_LENGTH]);

impl Hash {
    /// The all-zero hash, used as the previous-hash of a genesis block.
    pub fn zero() -> Self {
        Self([0; HASH_LENGTH])
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Computes sha256d (double SHA-256) over the given bytes, the hash used throughout the
/// wire format for blocks, transactions, proposals, votes and evidence pairs.
pub fn sha256d(data: &[u8]) -> Hash {
    let first = Sha256::digest(data);
    let second = Sha256::digest(&first);
    let mut out = [0_u8; HASH_LENGTH];
    out.copy_from_slice(&second);
    Hash(out)
}

/// One-byte address type tags, used as the leading byte of a program hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressType {
    Standard,
    Multisig,
    CrossChain,
    Deposit,
}

impl AddressType {
    fn tag(self) -> u8 {
        match self {
            Self::Standard => 0x21,
            Self::Multisig => 0x12,
            Self::CrossChain => 0x4B,
            Self::Deposit => 0x1F,
        }
    }
}

/// Length of a program hash (address): one type tag byte plus a ripemd160 digest.
pub const PROGRAM_HASH_LENGTH: usize = 21;

/// A 21-byte program hash (address), derived from a public key via sha256 then ripemd160.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProgramHash(pub [u8; PROGRAM_HASH_LENGTH]);

impl fmt::Debug for ProgramHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProgramHash({})", hex::encode(self.0))
    }
}

/// Derives a program hash (address) for a public key: `sha256` then `ripemd160`, prefixed
/// by a one-byte type tag.
pub fn program_hash(public_key: &[u8], address_type: AddressType) -> ProgramHash {
    let sha = Sha256::digest(public_key);
    let ripe = Ripemd160::digest(&sha);
    let mut out = [0_u8; PROGRAM_HASH_LENGTH];
    out[0] = address_type.tag();
    out[1..].copy_from_slice(&ripe);
    ProgramHash(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256d_is_deterministic_and_differs_from_single_hash() {
        let a = sha256d(b"hello");
        let b = sha256d(b"hello");
        assert_eq!(a, b);

        let single = Sha256::digest(b"hello");
        assert_ne!(&a.0[..], &single[..]);
    }

    #[test]
    fn program_hash_has_correct_tag_and_length() {
        let key = [7_u8; PEER_ID_LENGTH];
        let hash = program_hash(&key, AddressType::Standard);
        assert_eq!(hash.0[0], 0x21);
        assert_eq!(hash.0.len(), PROGRAM_HASH_LENGTH);

        let deposit = program_hash(&key, AddressType::Deposit);
        assert_eq!(deposit.0[0], 0x1F);
        assert_ne!(hash.0, deposit.0);
    }

    #[test]
    fn peer_id_hex_round_trips() {
        let peer = PeerId([42; PEER_ID_LENGTH]);
        let hex = peer.to_hex();
        let parsed = PeerId::from_hex(&hex).unwrap();
        assert_eq!(peer, parsed);
    }
}
