//! Log entries as persisted in the dup-sorted [`LogEntries`](crate::models::LogEntries) table.
//!
//! Entries are keyed by block number with the log index as sub-key, so one block's logs are
//! stored next to each other in index order. The logs of the open (unsealed) block live under
//! the key `latest_sealed + 1` until the block is sealed or rewound.

use alloy_primitives::B256;
use bytes::{Buf, BufMut};
use kona_supervisor_types::{ExecutingMessage, Log};
use reth_codecs::Compact;
use reth_db::DatabaseError;
use reth_db_api::table::Decompress;
use serde::{Deserialize, Serialize};

const HASH_LEN: usize = 32;
const ENTRY_HEADER_LEN: usize = 4 + 1 + HASH_LEN;
const MESSAGE_LEN: usize = 8 + 8 + 4 + 8 + HASH_LEN;

/// One indexed log of a block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position of the log within its block.
    pub index: u32,
    /// Checksum of the log.
    pub hash: B256,
    /// Set when the log executes a cross-chain message.
    pub executing_message: Option<ExecutingMessageEntry>,
}

impl LogEntry {
    /// Returns `true` if the entry stores the given checksum.
    pub fn matches(&self, hash: &B256) -> bool {
        self.hash == *hash
    }

    /// Length of the entry encoded at the start of `buf`, or `None` if `buf` is truncated.
    pub fn encoded_len(buf: &[u8]) -> Option<usize> {
        let has_msg = *buf.get(4)? != 0;
        let len = if has_msg { ENTRY_HEADER_LEN + MESSAGE_LEN } else { ENTRY_HEADER_LEN };
        (buf.len() >= len).then_some(len)
    }
}

/// Layout: `index` (big-endian `u32`, doubles as the dup sub-key), a presence flag for the
/// executing message, the 32 byte hash, then the message if present.
impl Compact for LogEntry {
    fn to_compact<B>(&self, buf: &mut B) -> usize
    where
        B: BufMut + AsMut<[u8]>,
    {
        let start_len = buf.remaining_mut();

        buf.put_u32(self.index);
        buf.put_u8(self.executing_message.is_some() as u8);
        buf.put_slice(self.hash.as_slice());
        if let Some(msg) = &self.executing_message {
            msg.to_compact(buf);
        }

        start_len - buf.remaining_mut()
    }

    /// Expects a buffer checked with [`LogEntry::encoded_len`].
    fn from_compact(mut buf: &[u8], _len: usize) -> (Self, &[u8]) {
        let index = buf.get_u32();
        let has_msg = buf.get_u8() != 0;

        let hash = B256::from_slice(&buf[..HASH_LEN]);
        buf.advance(HASH_LEN);

        let executing_message = has_msg.then(|| {
            let (msg, rest) = ExecutingMessageEntry::from_compact(buf, buf.len());
            buf = rest;
            msg
        });

        (Self { index, hash, executing_message }, buf)
    }
}

impl Decompress for LogEntry {
    fn decompress(value: &[u8]) -> Result<Self, DatabaseError> {
        if Self::encoded_len(value).is_none() {
            return Err(DatabaseError::Decode);
        }
        Ok(Self::from_compact(value, value.len()).0)
    }
}

impl From<Log> for LogEntry {
    fn from(log: Log) -> Self {
        Self {
            index: log.index,
            hash: log.hash,
            executing_message: log.executing_message.map(Into::into),
        }
    }
}

impl From<LogEntry> for Log {
    fn from(entry: LogEntry) -> Self {
        Self {
            index: entry.index,
            hash: entry.hash,
            executing_message: entry.executing_message.map(Into::into),
        }
    }
}

/// Storage form of an [`ExecutingMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutingMessageEntry {
    /// Source chain of the referenced log.
    pub chain_id: u64,
    /// Source block number.
    pub block_number: u64,
    /// Index of the referenced log in the source block.
    pub log_index: u32,
    /// Timestamp of the source block.
    pub timestamp: u64,
    /// Checksum of the referenced log.
    pub hash: B256,
}

/// Fixed width layout: `chain_id`, `block_number`, `log_index`, `timestamp`, `hash`.
impl Compact for ExecutingMessageEntry {
    fn to_compact<B>(&self, buf: &mut B) -> usize
    where
        B: BufMut + AsMut<[u8]>,
    {
        let start_len = buf.remaining_mut();

        buf.put_u64(self.chain_id);
        buf.put_u64(self.block_number);
        buf.put_u32(self.log_index);
        buf.put_u64(self.timestamp);
        buf.put_slice(self.hash.as_slice());

        start_len - buf.remaining_mut()
    }

    fn from_compact(mut buf: &[u8], _len: usize) -> (Self, &[u8]) {
        let chain_id = buf.get_u64();
        let block_number = buf.get_u64();
        let log_index = buf.get_u32();
        let timestamp = buf.get_u64();

        let hash = B256::from_slice(&buf[..HASH_LEN]);
        buf.advance(HASH_LEN);

        (Self { chain_id, block_number, log_index, timestamp, hash }, buf)
    }
}

impl From<ExecutingMessage> for ExecutingMessageEntry {
    fn from(msg: ExecutingMessage) -> Self {
        Self {
            chain_id: msg.chain_id,
            block_number: msg.block_number,
            log_index: msg.log_index,
            timestamp: msg.timestamp,
            hash: msg.hash,
        }
    }
}

impl From<ExecutingMessageEntry> for ExecutingMessage {
    fn from(msg: ExecutingMessageEntry) -> Self {
        Self {
            chain_id: msg.chain_id,
            block_number: msg.block_number,
            log_index: msg.log_index,
            timestamp: msg.timestamp,
            hash: msg.hash,
        }
    }
}
