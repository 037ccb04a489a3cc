use crate::StorageError;
use alloy_eips::eip1898::BlockNumHash;
use alloy_primitives::B256;
use kona_supervisor_metrics::MetricsReporter;
use kona_supervisor_types::{BlockInfo, BlockSeal, DerivedSealPair, ExecutingMessage, IndexedLog};
use std::{collections::HashMap, fmt::Debug};

/// A sealed block opened for cross-chain validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedBlock {
    /// The block reference, including its parent hash.
    pub block: BlockInfo,
    /// Total number of logs in the block.
    pub log_count: u32,
    /// The logs of the block that execute a cross-chain message, keyed by log index.
    pub executing_messages: HashMap<u32, ExecutingMessage>,
}

/// A lazy iterator over the sealed logs of one chain.
///
/// Yields logs in `(block number, log index)` order. `None` means the iterator reached the open
/// block; calling [`Iterator::next`] again later continues once more blocks are sealed.
pub trait LogIterator: Iterator<Item = Result<IndexedLog, StorageError>> + Send + Debug {
    /// Returns the `(sealed block number, logs since)` arguments of
    /// [`LogStorageReader::iterator_starting_at`] that resume at the current position.
    fn checkpoint(&self) -> (u64, u32);
}

/// Provides an interface for querying the event log of a chain.
///
/// Implementations are expected to provide persistent and thread-safe access to block logs.
pub trait LogStorageReader: Send + Sync + Debug {
    /// Returns the number of the latest sealed block, or `None` if nothing was sealed yet.
    fn latest_sealed_block_num(&self) -> Result<Option<u64>, StorageError>;

    /// Returns the seal recorded for the given block number.
    ///
    /// # Errors
    /// * [`StorageError::FutureData`] if `number` is beyond the latest sealed block.
    /// * [`StorageError::EntryNotFound`] if `number` is before the first sealed block.
    fn find_sealed_block(&self, number: u64) -> Result<BlockSeal, StorageError>;

    /// Checks that the log at `(block_num, log_index)` has checksum `log_hash`.
    ///
    /// # Returns
    /// * The seal of the block containing the log.
    /// * The zero seal if the log is part of the open block and matches.
    ///
    /// # Errors
    /// * [`StorageError::FutureData`] if the position is beyond current knowledge.
    /// * [`StorageError::ConflictError`] if the position is known but holds a different log.
    /// * [`StorageError::EntryNotFound`] if the block predates the indexed range.
    fn contains(
        &self,
        block_num: u64,
        log_index: u32,
        log_hash: B256,
    ) -> Result<BlockSeal, StorageError>;

    /// Returns an iterator positioned right after sealed block `sealed_num`, skipping the first
    /// `logs_since` logs of block `sealed_num + 1`.
    fn iterator_starting_at(
        &self,
        sealed_num: u64,
        logs_since: u32,
    ) -> Result<Box<dyn LogIterator>, StorageError>;

    /// Returns the reference, log count and executing messages of a sealed block.
    fn open_block(&self, block_num: u64) -> Result<OpenedBlock, StorageError>;
}

/// Provides an interface for appending to and truncating the event log of a chain.
pub trait LogStorageWriter: Send + Sync + Debug {
    /// Appends a log to the open block.
    ///
    /// `parent_block` must be the latest sealed block and `log_index` the next index of the open
    /// block.
    ///
    /// # Errors
    /// * [`StorageError::DatabaseNotInitialised`] if no block is sealed yet.
    /// * [`StorageError::BlockOutOfOrder`] if `parent_block` is not the latest sealed block.
    /// * [`StorageError::LogOutOfOrder`] if `log_index` skips or repeats an index.
    fn add_log(
        &self,
        log_hash: B256,
        parent_block: BlockNumHash,
        log_index: u32,
        executing_message: Option<ExecutingMessage>,
    ) -> Result<(), StorageError>;

    /// Seals the open block and opens the next one.
    ///
    /// The first seal of an empty store is accepted as the anchor.
    ///
    /// # Errors
    /// * [`StorageError::BlockOutOfOrder`] if `block` does not extend the latest sealed block.
    /// * [`StorageError::ConflictError`] if `block.number` is sealed with a different hash.
    fn seal_block(
        &self,
        parent_hash: B256,
        block: BlockNumHash,
        timestamp: u64,
    ) -> Result<(), StorageError>;

    /// Drops every sealed block and log after `new_head`, reopening block `new_head + 1`.
    ///
    /// Rewinding to the current head only discards the open block.
    fn rewind(&self, new_head: u64) -> Result<(), StorageError>;

    /// Releases the store. Every later call fails with [`StorageError::Closed`].
    fn close(&self) -> Result<(), StorageError>;
}

/// Combines reading and writing capabilities of an event log store.
///
/// Any type that implements [`LogStorageReader`], [`LogStorageWriter`] and [`MetricsReporter`]
/// automatically implements this trait.
pub trait LogStorage: LogStorageReader + LogStorageWriter + MetricsReporter {}

impl<T: LogStorageReader + LogStorageWriter + MetricsReporter> LogStorage for T {}

/// Provides an interface for querying the derivation index of a chain.
///
/// Lookups fail with [`StorageError::FutureData`] past the latest entry,
/// [`StorageError::EntryNotFound`] before the first entry and [`StorageError::ConflictError`]
/// when the number is known under a different hash.
pub trait DerivationStorageReader: Send + Sync + Debug {
    /// Returns the earliest recorded pair.
    fn first(&self) -> Result<DerivedSealPair, StorageError>;

    /// Returns the most recent recorded pair.
    fn latest(&self) -> Result<DerivedSealPair, StorageError>;

    /// Returns the latest derived block recorded against exactly `derived_from`.
    fn last_derived_at(&self, derived_from: BlockNumHash) -> Result<BlockSeal, StorageError>;

    /// Returns the latest derived block whose derived-from block is at or before `derived_from`.
    fn last_derived_as_of(&self, derived_from: BlockNumHash) -> Result<BlockSeal, StorageError>;

    /// Returns the derived-from block recorded for `derived`.
    fn derived_from(&self, derived: BlockNumHash) -> Result<BlockSeal, StorageError>;

    /// Returns the pair recorded right after `(derived_from, derived)`.
    fn first_after(
        &self,
        derived_from: BlockNumHash,
        derived: BlockNumHash,
    ) -> Result<DerivedSealPair, StorageError>;

    /// Returns the derived-from block recorded after `derived_from`.
    fn next_derived_from(&self, derived_from: BlockNumHash) -> Result<BlockSeal, StorageError>;

    /// Returns the block derived after `derived`, with its derived-from block.
    fn next_derived(&self, derived: BlockNumHash) -> Result<DerivedSealPair, StorageError>;

    /// Returns the derived-from block recorded before `derived_from`, `None` at the first one.
    fn previous_derived_from(
        &self,
        derived_from: BlockNumHash,
    ) -> Result<Option<BlockSeal>, StorageError>;

    /// Returns the block derived before `derived`, `None` at the first one.
    fn previous_derived(&self, derived: BlockNumHash) -> Result<Option<BlockSeal>, StorageError>;
}

/// Provides an interface for appending to and truncating the derivation index of a chain.
pub trait DerivationStorageWriter: Send + Sync + Debug {
    /// Records that `derived` was derived from `derived_from`.
    ///
    /// # Errors
    /// * [`StorageError::BlockOutOfOrder`] if `derived` is not the next block after the latest
    ///   derived block, or `derived_from` goes backwards or breaks the parent link.
    /// * [`StorageError::ConflictError`] if the data contradicts a recorded entry.
    fn add_derived(&self, derived_from: BlockInfo, derived: BlockInfo) -> Result<(), StorageError>;

    /// Drops every pair whose derived block is after `new_head`.
    fn rewind(&self, new_head: u64) -> Result<(), StorageError>;

    /// Releases the store. Every later call fails with [`StorageError::Closed`].
    fn close(&self) -> Result<(), StorageError>;
}

/// Local derivation index: derivation recorded against reference-chain input.
///
/// Any type that implements [`DerivationStorageReader`], [`DerivationStorageWriter`] and
/// [`MetricsReporter`] automatically implements this trait.
pub trait LocalDerivedFromStorage:
    DerivationStorageReader + DerivationStorageWriter + MetricsReporter
{
}

impl<T: DerivationStorageReader + DerivationStorageWriter + MetricsReporter>
    LocalDerivedFromStorage for T
{
}

/// Cross derivation index: derivation recorded and cross-chain validated.
///
/// Shares the contract of [`LocalDerivedFromStorage`] for now. It is a separate capability so
/// that reorg-aware conflict handling can diverge without touching the local index.
pub trait CrossDerivedFromStorage: LocalDerivedFromStorage {}
