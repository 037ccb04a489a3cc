//! Block references used by the chain indexes.

use alloy_eips::BlockNumHash;
use alloy_primitives::B256;
use derive_more::{Constructor, Display};
use serde::{Deserialize, Serialize};

/// An immutable stamp identifying a block at a given height.
///
/// The zero value ([`BlockSeal::default`]) is used as the "unset" marker for safety pointers
/// and for logs that are indexed but whose block is not sealed yet.
#[derive(
    Debug, Clone, Copy, Default, Display, PartialEq, Eq, Hash, Serialize, Deserialize, Constructor,
)]
#[display("number: {number}, hash: {hash}, timestamp: {timestamp}")]
#[serde(rename_all = "camelCase")]
pub struct BlockSeal {
    /// The block's hash
    pub hash: B256,
    /// The block number
    pub number: u64,
    /// The block's timestamp
    pub timestamp: u64,
}

impl BlockSeal {
    /// Returns `true` if this is the unset seal.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Returns the `(number, hash)` identifier of the sealed block.
    pub const fn id(&self) -> BlockNumHash {
        BlockNumHash { number: self.number, hash: self.hash }
    }
}

impl From<BlockInfo> for BlockSeal {
    fn from(block: BlockInfo) -> Self {
        Self { hash: block.hash, number: block.number, timestamp: block.timestamp }
    }
}

/// A block reference that also links to its parent.
///
/// Used for reference-chain (derived-from) blocks, for derived blocks and for opened blocks.
#[derive(Debug, Clone, Copy, Default, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display("number: {number}, hash: {hash}, parent_hash: {parent_hash}, timestamp: {timestamp}")]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
    /// The block hash
    pub hash: B256,
    /// The block number
    pub number: u64,
    /// The parent block hash
    pub parent_hash: B256,
    /// The block timestamp
    pub timestamp: u64,
}

impl BlockInfo {
    /// Creates a new [`BlockInfo`].
    pub const fn new(hash: B256, number: u64, parent_hash: B256, timestamp: u64) -> Self {
        Self { hash, number, parent_hash, timestamp }
    }

    /// Returns the `(number, hash)` identifier of the block.
    pub const fn id(&self) -> BlockNumHash {
        BlockNumHash { number: self.number, hash: self.hash }
    }

    /// Returns the seal of the block, dropping the parent link.
    pub const fn seal(&self) -> BlockSeal {
        BlockSeal { hash: self.hash, number: self.number, timestamp: self.timestamp }
    }

    /// Returns `true` if `self` is the direct parent of `child`.
    pub fn is_parent_of(&self, child: &Self) -> bool {
        self.number + 1 == child.number && self.hash == child.parent_hash
    }

    /// Returns `true` if this is the zero value.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}
