//! Models for the derivation index.
//!
//! Two tables make up the index. [`DerivedBlocks`](crate::models::DerivedBlocks) is the primary
//! one, keyed by derived block number. [`BlockTraversal`](crate::models::BlockTraversal) is keyed
//! by derived-from number and lists the derived blocks recorded against each reference block,
//! which makes lookups along the derived-from dimension cheap.

use super::BlockRef;
use derive_more::{Deref, DerefMut};
use kona_supervisor_types::DerivedSealPair;
use reth_codecs::Compact;
use serde::{Deserialize, Serialize};

/// A derived block together with the reference block it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoredDerivedBlockPair {
    /// The reference-chain block used as input.
    pub derived_from: BlockRef,
    /// The derived block.
    pub derived: BlockRef,
}

impl StoredDerivedBlockPair {
    /// Creates a new [`StoredDerivedBlockPair`].
    pub const fn new(derived_from: BlockRef, derived: BlockRef) -> Self {
        Self { derived_from, derived }
    }

    /// Returns the stamped form of the pair.
    pub const fn seals(&self) -> DerivedSealPair {
        DerivedSealPair { derived_from: self.derived_from.seal(), derived: self.derived.seal() }
    }
}

impl Compact for StoredDerivedBlockPair {
    fn to_compact<B: bytes::BufMut + AsMut<[u8]>>(&self, buf: &mut B) -> usize {
        self.derived_from.to_compact(buf) + self.derived.to_compact(buf)
    }

    fn from_compact(buf: &[u8], _len: usize) -> (Self, &[u8]) {
        let (derived_from, rest) = BlockRef::from_compact(buf, buf.len());
        let (derived, rest) = BlockRef::from_compact(rest, rest.len());
        (Self { derived_from, derived }, rest)
    }
}

/// Wrapper for `Vec<u64>` to represent a list of block numbers.
#[derive(
    Deref, DerefMut, Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, Compact,
)]
pub struct U64List(pub Vec<u64>);

/// A reference block and the ascending numbers of the blocks derived from it.
///
/// The list is never empty: a traversal entry is only written together with a derived pair.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DerivedFromTraversal {
    /// The reference-chain block.
    pub derived_from: BlockRef,
    /// Derived block numbers recorded against it.
    pub derived_block_numbers: U64List,
}

impl DerivedFromTraversal {
    /// Creates a traversal holding a single derived block.
    pub fn new(derived_from: BlockRef, first_derived: u64) -> Self {
        Self { derived_from, derived_block_numbers: U64List(vec![first_derived]) }
    }

    /// Returns the most recent derived block number.
    pub fn last_derived(&self) -> Option<u64> {
        self.derived_block_numbers.last().copied()
    }
}

impl Compact for DerivedFromTraversal {
    fn to_compact<B: bytes::BufMut + AsMut<[u8]>>(&self, buf: &mut B) -> usize {
        self.derived_from.to_compact(buf) + self.derived_block_numbers.to_compact(buf)
    }

    fn from_compact(buf: &[u8], _len: usize) -> (Self, &[u8]) {
        let (derived_from, rest) = BlockRef::from_compact(buf, buf.len());
        let (derived_block_numbers, rest) = U64List::from_compact(rest, rest.len());
        (Self { derived_from, derived_block_numbers }, rest)
    }
}
