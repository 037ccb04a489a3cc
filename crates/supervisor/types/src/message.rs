use alloy_primitives::{B256, ChainId};
use serde::{Deserialize, Serialize};

/// Cross-chain reference carried by an executing log.
///
/// Points at the initiating log on the source chain and carries the checksum the initiating log
/// must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutingMessage {
    /// Source chain of the referenced log.
    pub chain_id: ChainId,
    /// Block on the source chain that contains the referenced log.
    pub block_number: u64,
    /// Index of the referenced log within that block.
    pub log_index: u32,
    /// Timestamp of the source block.
    pub timestamp: u64,
    /// Checksum of the referenced log.
    pub hash: B256,
}
