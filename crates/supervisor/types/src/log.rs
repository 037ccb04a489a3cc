use crate::{BlockSeal, message::ExecutingMessage};
use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

/// A reference entry representing a log observed in an L2 receipt.
///
/// The log content is not kept, only its position and checksum:
/// - `index` is the dense, zero based position of the log inside its block.
/// - `hash` is the checksum of the log, compared on every containment check.
/// - `executing_message` is present if the log is a cross-chain executing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    /// The index of the log.
    pub index: u32,
    /// The hash of the log, derived from the log address and payload.
    pub hash: B256,
    /// The parsed message, if the log matches an `ExecutingMessage` event.
    pub executing_message: Option<ExecutingMessage>,
}

/// A [`Log`] together with the sealed block that contains it.
///
/// Logs of a chain are totally ordered by `(block.number, log.index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedLog {
    /// Seal of the block the log belongs to.
    pub block: BlockSeal,
    /// The log itself.
    pub log: Log,
}

impl IndexedLog {
    /// Position of the log as `(block number, log index)`.
    pub const fn position(&self) -> (u64, u32) {
        (self.block.number, self.log.index)
    }
}
