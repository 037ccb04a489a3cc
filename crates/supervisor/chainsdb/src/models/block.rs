//! Sealed block metadata as persisted in the [`BlockRefs`](crate::models::BlockRefs) table.
//!
//! Each block is identified by its number; the parent hash is kept so the chain can be checked
//! for continuity on every seal.

use alloy_primitives::B256;
use derive_more::Display;
use kona_supervisor_types::{BlockInfo, BlockSeal};
use reth_codecs::Compact;
use serde::{Deserialize, Serialize};

/// Metadata reference for a single block.
///
/// Stored as the value of both the [`crate::models::BlockRefs`] table (sealed blocks of a log
/// store) and of the derivation tables.
#[derive(Debug, Clone, Display, PartialEq, Eq, Default, Serialize, Deserialize, Compact)]
#[display("number: {number}, hash: {hash}, parent_hash: {parent_hash}, timestamp: {timestamp}")]
pub struct BlockRef {
    /// The height of the block.
    pub number: u64,
    /// The hash of the block itself.
    pub hash: B256,
    /// The hash of the parent block (previous block in the chain).
    pub parent_hash: B256,
    /// The timestamp of the block (seconds since Unix epoch).
    pub timestamp: u64,
}

impl BlockRef {
    /// Returns the seal of the stored block.
    pub const fn seal(&self) -> BlockSeal {
        BlockSeal { hash: self.hash, number: self.number, timestamp: self.timestamp }
    }

    /// Returns `true` if `self` directly precedes `child`.
    pub fn is_parent_of(&self, child: &Self) -> bool {
        self.number + 1 == child.number && self.hash == child.parent_hash
    }
}

impl From<BlockInfo> for BlockRef {
    fn from(block: BlockInfo) -> Self {
        Self {
            number: block.number,
            hash: block.hash,
            parent_hash: block.parent_hash,
            timestamp: block.timestamp,
        }
    }
}

impl From<BlockRef> for BlockInfo {
    fn from(block: BlockRef) -> Self {
        Self {
            number: block.number,
            hash: block.hash,
            parent_hash: block.parent_hash,
            timestamp: block.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_drops_parent_link() {
        let block = BlockRef {
            number: 42,
            hash: B256::from([1u8; 32]),
            parent_hash: B256::from([2u8; 32]),
            timestamp: 1678886400,
        };

        let seal = block.seal();
        assert_eq!(seal.number, 42);
        assert_eq!(seal.hash, block.hash);
        assert_eq!(seal.timestamp, block.timestamp);
        assert_eq!(BlockInfo::from(block.clone()).seal(), seal);
    }

    #[test]
    fn parent_link_checks_number_and_hash() {
        let parent = BlockRef { number: 1, hash: B256::from([1u8; 32]), ..Default::default() };
        let child = BlockRef { number: 2, parent_hash: parent.hash, ..Default::default() };
        assert!(parent.is_parent_of(&child));
        assert!(!child.is_parent_of(&parent));

        let stranger = BlockRef { parent_hash: B256::from([7u8; 32]), ..child.clone() };
        assert!(!parent.is_parent_of(&stranger));
    }
}
