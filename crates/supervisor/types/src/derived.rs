//! Derivation relationships between reference-chain and derived blocks.

use crate::BlockSeal;
use alloy_eips::BlockNumHash;
use derive_more::{Constructor, Display};
use serde::{Deserialize, Serialize};

/// Links a derived (L2) block to the reference-chain (L1) block it was derived from.
///
/// This is the value delivered to cross-safe subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Constructor)]
#[serde(rename_all = "camelCase")]
pub struct DerivedPair {
    /// The reference-chain block used as input.
    pub derived_from: BlockNumHash,
    /// The derived block.
    pub derived: BlockNumHash,
}

/// Same relationship as [`DerivedPair`], with both sides stamped.
#[derive(Debug, Clone, Copy, Default, Display, PartialEq, Eq, Serialize, Deserialize, Constructor)]
#[display("derived_from: {derived_from}, derived: {derived}")]
#[serde(rename_all = "camelCase")]
pub struct DerivedSealPair {
    /// Seal of the reference-chain block.
    pub derived_from: BlockSeal,
    /// Seal of the derived block.
    pub derived: BlockSeal,
}

impl DerivedSealPair {
    /// Drops the timestamps.
    pub const fn id(&self) -> DerivedPair {
        DerivedPair { derived_from: self.derived_from.id(), derived: self.derived.id() }
    }
}

impl From<DerivedSealPair> for DerivedPair {
    fn from(pair: DerivedSealPair) -> Self {
        pair.id()
    }
}
