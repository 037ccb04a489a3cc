//! Provider for derivation-related database operations.
//!
//! The index is kept in two tables. [`DerivedBlocks`] maps each derived block number to the pair
//! it belongs to and is the source of truth. [`BlockTraversal`] maps each derived-from number to
//! the derived blocks recorded against it and answers derived-from lookups.
use crate::{
    error::{EntryNotFoundError, StorageError},
    models::{BlockRef, BlockTraversal, DerivedBlocks, DerivedFromTraversal, StoredDerivedBlockPair},
};
use alloy_eips::eip1898::BlockNumHash;
use alloy_primitives::ChainId;
use kona_supervisor_types::{BlockInfo, BlockSeal, DerivedSealPair};
use reth_db_api::{
    cursor::DbCursorRO,
    transaction::{DbTx, DbTxMut},
};
use std::collections::BTreeSet;
use tracing::{debug, error, info, trace, warn};

const DEFAULT_LOG_INTERVAL: u64 = 100;

/// Provides access to derivation storage operations within a transaction.
#[derive(Debug)]
pub(crate) struct DerivationProvider<'tx, TX> {
    tx: &'tx TX,
    chain_id: ChainId,
    #[doc(hidden)]
    observability_interval: u64,
}

impl<'tx, TX> DerivationProvider<'tx, TX> {
    pub(crate) const fn new(tx: &'tx TX, chain_id: ChainId) -> Self {
        Self::new_with_observability_interval(tx, chain_id, DEFAULT_LOG_INTERVAL)
    }

    pub(crate) const fn new_with_observability_interval(
        tx: &'tx TX,
        chain_id: ChainId,
        observability_interval: u64,
    ) -> Self {
        Self { tx, chain_id, observability_interval }
    }
}

impl<TX> DerivationProvider<'_, TX>
where
    TX: DbTx,
{
    fn first_pair_opt(&self) -> Result<Option<StoredDerivedBlockPair>, StorageError> {
        let mut cursor = self.tx.cursor_read::<DerivedBlocks>().inspect_err(|err| {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                %err,
                "Failed to get cursor for DerivedBlocks"
            );
        })?;
        Ok(cursor.first()?.map(|(_, pair)| pair))
    }

    fn latest_pair_opt(&self) -> Result<Option<StoredDerivedBlockPair>, StorageError> {
        let mut cursor = self.tx.cursor_read::<DerivedBlocks>().inspect_err(|err| {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                %err,
                "Failed to get cursor for DerivedBlocks"
            );
        })?;
        Ok(cursor.last()?.map(|(_, pair)| pair))
    }

    /// Returns the earliest recorded pair.
    pub(crate) fn first_pair(&self) -> Result<StoredDerivedBlockPair, StorageError> {
        self.first_pair_opt()?.ok_or(StorageError::FutureData)
    }

    /// Returns the latest recorded pair.
    pub(crate) fn latest_pair(&self) -> Result<StoredDerivedBlockPair, StorageError> {
        self.latest_pair_opt()?.ok_or(StorageError::FutureData)
    }

    fn pair_by_number(
        &self,
        derived_block_number: u64,
    ) -> Result<Option<StoredDerivedBlockPair>, StorageError> {
        let pair = self.tx.get::<DerivedBlocks>(derived_block_number).inspect_err(|err| {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                derived_block_number,
                %err,
                "Failed to get derived block pair"
            );
        })?;
        Ok(pair)
    }

    fn traversal_by_number(
        &self,
        derived_from_number: u64,
    ) -> Result<Option<DerivedFromTraversal>, StorageError> {
        let traversal = self.tx.get::<BlockTraversal>(derived_from_number).inspect_err(|err| {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                derived_from_number,
                %err,
                "Failed to get block traversal"
            );
        })?;
        Ok(traversal)
    }

    /// Returns the pair of the given derived block, verifying its hash.
    pub(crate) fn pair_by_derived(
        &self,
        derived: BlockNumHash,
    ) -> Result<StoredDerivedBlockPair, StorageError> {
        if let Some(pair) = self.pair_by_number(derived.number)? {
            if pair.derived.hash != derived.hash {
                warn!(
                    target: "supervisor::storage",
                    chain_id = %self.chain_id,
                    derived_block_number = derived.number,
                    expected_hash = %derived.hash,
                    stored_hash = %pair.derived.hash,
                    "Derived block hash mismatch"
                );
                return Err(StorageError::ConflictError);
            }
            return Ok(pair);
        }

        let latest = self.latest_pair()?;
        if derived.number > latest.derived.number {
            return Err(StorageError::FutureData);
        }
        Err(EntryNotFoundError::DerivedBlockNotFound(derived.number).into())
    }

    /// Returns the traversal of the given derived-from block, verifying its hash.
    pub(crate) fn traversal_by_derived_from(
        &self,
        derived_from: BlockNumHash,
    ) -> Result<DerivedFromTraversal, StorageError> {
        if let Some(traversal) = self.traversal_by_number(derived_from.number)? {
            if traversal.derived_from.hash != derived_from.hash {
                warn!(
                    target: "supervisor::storage",
                    chain_id = %self.chain_id,
                    derived_from_number = derived_from.number,
                    expected_hash = %derived_from.hash,
                    stored_hash = %traversal.derived_from.hash,
                    "Derived-from block hash mismatch"
                );
                return Err(StorageError::ConflictError);
            }
            return Ok(traversal);
        }

        let latest = self.latest_pair()?;
        if derived_from.number > latest.derived_from.number {
            return Err(StorageError::FutureData);
        }
        Err(EntryNotFoundError::DerivedFromBlockNotFound(derived_from.number).into())
    }

    fn derived_seal(&self, derived_block_number: u64) -> Result<BlockSeal, StorageError> {
        let pair = self
            .pair_by_number(derived_block_number)?
            .ok_or(EntryNotFoundError::DerivedBlockNotFound(derived_block_number))?;
        Ok(pair.derived.seal())
    }

    pub(crate) fn last_derived_at(
        &self,
        derived_from: BlockNumHash,
    ) -> Result<BlockSeal, StorageError> {
        let traversal = self.traversal_by_derived_from(derived_from)?;
        let last = traversal
            .last_derived()
            .ok_or(EntryNotFoundError::MissingDerivedBlocks(derived_from))?;
        self.derived_seal(last)
    }

    /// Latest derived block whose derived-from block is at or before `derived_from`.
    pub(crate) fn last_derived_as_of(
        &self,
        derived_from: BlockNumHash,
    ) -> Result<BlockSeal, StorageError> {
        debug!(
            target: "supervisor::storage",
            chain_id = %self.chain_id,
            derived_from_number = derived_from.number,
            "Fetching last derived block as of derived-from block"
        );

        if self.latest_pair_opt()?.is_none() {
            return Err(StorageError::FutureData);
        }

        let mut cursor = self.tx.cursor_read::<BlockTraversal>()?;
        let traversal = match cursor.seek(derived_from.number)? {
            Some((number, traversal)) if number == derived_from.number => {
                if traversal.derived_from.hash != derived_from.hash {
                    warn!(
                        target: "supervisor::storage",
                        chain_id = %self.chain_id,
                        derived_from_number = derived_from.number,
                        expected_hash = %derived_from.hash,
                        stored_hash = %traversal.derived_from.hash,
                        "Derived-from block hash mismatch"
                    );
                    return Err(StorageError::ConflictError);
                }
                Some(traversal)
            }
            Some(_) => cursor.prev()?.map(|(_, traversal)| traversal),
            None => cursor.last()?.map(|(_, traversal)| traversal),
        };

        let last = traversal
            .and_then(|traversal| traversal.last_derived())
            .ok_or(EntryNotFoundError::MissingDerivedBlocks(derived_from))?;
        self.derived_seal(last)
    }

    pub(crate) fn derived_from(&self, derived: BlockNumHash) -> Result<BlockSeal, StorageError> {
        Ok(self.pair_by_derived(derived)?.derived_from.seal())
    }

    pub(crate) fn first_after(
        &self,
        derived_from: BlockNumHash,
        derived: BlockNumHash,
    ) -> Result<DerivedSealPair, StorageError> {
        let pair = self.pair_by_derived(derived)?;
        if pair.derived_from.number != derived_from.number ||
            pair.derived_from.hash != derived_from.hash
        {
            warn!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                derived_block_number = derived.number,
                expected_derived_from = ?derived_from,
                stored_derived_from = %pair.derived_from,
                "Derived block was recorded against another derived-from block"
            );
            return Err(StorageError::ConflictError);
        }
        self.next_pair(derived.number)
    }

    fn next_pair(&self, derived_block_number: u64) -> Result<DerivedSealPair, StorageError> {
        self.pair_by_number(derived_block_number + 1)?
            .map(|pair| pair.seals())
            .ok_or(StorageError::FutureData)
    }

    pub(crate) fn next_derived(
        &self,
        derived: BlockNumHash,
    ) -> Result<DerivedSealPair, StorageError> {
        self.pair_by_derived(derived)?;
        self.next_pair(derived.number)
    }

    pub(crate) fn next_derived_from(
        &self,
        derived_from: BlockNumHash,
    ) -> Result<BlockSeal, StorageError> {
        self.traversal_by_derived_from(derived_from)?;

        let mut cursor = self.tx.cursor_read::<BlockTraversal>()?;
        cursor
            .seek(derived_from.number + 1)?
            .map(|(_, traversal)| traversal.derived_from.seal())
            .ok_or(StorageError::FutureData)
    }

    pub(crate) fn previous_derived_from(
        &self,
        derived_from: BlockNumHash,
    ) -> Result<Option<BlockSeal>, StorageError> {
        self.traversal_by_derived_from(derived_from)?;

        let mut cursor = self.tx.cursor_read::<BlockTraversal>()?;
        cursor.seek_exact(derived_from.number)?;
        Ok(cursor.prev()?.map(|(_, traversal)| traversal.derived_from.seal()))
    }

    pub(crate) fn previous_derived(
        &self,
        derived: BlockNumHash,
    ) -> Result<Option<BlockSeal>, StorageError> {
        self.pair_by_derived(derived)?;

        let Some(previous) = derived.number.checked_sub(1) else {
            return Ok(None);
        };
        Ok(self.pair_by_number(previous)?.map(|pair| pair.derived.seal()))
    }
}

impl<TX> DerivationProvider<'_, TX>
where
    TX: DbTxMut + DbTx,
{
    /// Records a derived block. The first pair of an empty store becomes the anchor.
    pub(crate) fn add_derived(
        &self,
        derived_from: BlockInfo,
        derived: BlockInfo,
    ) -> Result<(), StorageError> {
        debug!(
            target: "supervisor::storage",
            chain_id = %self.chain_id,
            derived_from = %derived_from,
            derived = %derived,
            "Saving derived block"
        );

        let incoming = StoredDerivedBlockPair::new(derived_from.into(), derived.into());

        let Some(latest) = self.latest_pair_opt()? else {
            info!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                derived_from = %derived_from,
                derived = %derived,
                "Saving anchor derived block"
            );
            return self.put_pair(incoming, None);
        };

        if incoming.derived.number <= latest.derived.number {
            return match self.pair_by_number(incoming.derived.number)? {
                Some(stored_pair) if stored_pair != incoming => {
                    warn!(
                        target: "supervisor::storage",
                        chain_id = %self.chain_id,
                        stored_derived = %stored_pair.derived,
                        stored_derived_from = %stored_pair.derived_from,
                        incoming_derived = %incoming.derived,
                        incoming_derived_from = %incoming.derived_from,
                        "Incoming derived block is not consistent with the stored derived block"
                    );
                    Err(StorageError::ConflictError)
                }
                _ => {
                    warn!(
                        target: "supervisor::storage",
                        chain_id = %self.chain_id,
                        latest_derived = %latest.derived,
                        incoming_derived = %incoming.derived,
                        "Incoming derived block is not newer than the latest derived block"
                    );
                    Err(StorageError::BlockOutOfOrder)
                }
            };
        }

        if !latest.derived.is_parent_of(&incoming.derived) {
            warn!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                latest_derived = %latest.derived,
                incoming_derived = %incoming.derived,
                "Latest stored derived block is not parent of the incoming derived block"
            );
            return Err(StorageError::BlockOutOfOrder);
        }

        self.check_derived_from(&latest.derived_from, &incoming.derived_from)?;

        let traversal = if incoming.derived_from.number == latest.derived_from.number {
            self.traversal_by_number(latest.derived_from.number)?
        } else {
            None
        };
        self.put_pair(incoming, traversal)
    }

    /// Derived-from blocks may repeat or move forward with gaps, but never go back.
    fn check_derived_from(
        &self,
        latest: &BlockRef,
        incoming: &BlockRef,
    ) -> Result<(), StorageError> {
        if incoming.number < latest.number {
            warn!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                latest_derived_from = %latest,
                incoming_derived_from = %incoming,
                "Incoming derived-from block is older than the latest one"
            );
            return Err(StorageError::BlockOutOfOrder);
        }

        if incoming.number == latest.number && incoming.hash != latest.hash {
            warn!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                latest_derived_from = %latest,
                incoming_derived_from = %incoming,
                "Incoming derived-from block conflicts with the latest one"
            );
            return Err(StorageError::ConflictError);
        }

        if incoming.number == latest.number + 1 && !latest.is_parent_of(incoming) {
            warn!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                latest_derived_from = %latest,
                incoming_derived_from = %incoming,
                "Latest derived-from block is not parent of the incoming one"
            );
            return Err(StorageError::BlockOutOfOrder);
        }

        Ok(())
    }

    /// Writes a pair and appends it to the traversal of its derived-from block.
    fn put_pair(
        &self,
        pair: StoredDerivedBlockPair,
        traversal: Option<DerivedFromTraversal>,
    ) -> Result<(), StorageError> {
        let derived_number = pair.derived.number;
        let derived_from_number = pair.derived_from.number;

        let traversal = match traversal {
            Some(mut traversal) => {
                traversal.derived_block_numbers.push(derived_number);
                traversal
            }
            None => DerivedFromTraversal::new(pair.derived_from.clone(), derived_number),
        };

        self.tx.put::<DerivedBlocks>(derived_number, pair).inspect_err(|err| {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                derived_block_number = derived_number,
                %err,
                "Failed to save derived block pair"
            );
        })?;

        self.tx.put::<BlockTraversal>(derived_from_number, traversal).inspect_err(|err| {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                derived_from_number,
                %err,
                "Failed to save derived block numbers for derived-from block"
            );
        })?;

        Ok(())
    }

    /// Deletes every pair whose derived block is after `new_head` and trims the traversals.
    pub(crate) fn rewind(&self, new_head: u64) -> Result<(), StorageError> {
        info!(
            target: "supervisor::storage",
            chain_id = %self.chain_id,
            target_block_number = new_head,
            "Starting rewind of derivation storage"
        );

        let latest = self.latest_pair()?;
        if new_head > latest.derived.number {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                target_block_number = new_head,
                latest_block = latest.derived.number,
                "Cannot rewind to future block"
            );
            return Err(StorageError::FutureData);
        }

        let first = self.first_pair()?;
        if new_head < first.derived.number {
            warn!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                target_block_number = new_head,
                first_block = first.derived.number,
                "Cannot rewind before the anchor block"
            );
            return Err(EntryNotFoundError::DerivedBlockNotFound(new_head).into());
        }

        let total_blocks = latest.derived.number - new_head;
        let mut processed_blocks = 0;
        let mut touched_derived_from = BTreeSet::new();

        trace!(
            target: "supervisor::storage",
            chain_id = %self.chain_id,
            target_block_number = new_head,
            latest_block = latest.derived.number,
            total_blocks,
            observability_interval = %self.observability_interval,
            "Rewinding derived block storage..."
        );

        for block_number in new_head + 1..=latest.derived.number {
            if let Some(pair) = self.pair_by_number(block_number)? {
                touched_derived_from.insert(pair.derived_from.number);
            }
            self.tx.delete::<DerivedBlocks>(block_number, None).inspect_err(|err| {
                error!(
                    target: "supervisor::storage",
                    chain_id = %self.chain_id,
                    block_number,
                    %err,
                    "Failed to delete derived block pair"
                );
            })?;

            processed_blocks += 1;

            if processed_blocks % self.observability_interval == 0 ||
                processed_blocks == total_blocks
            {
                let percentage =
                    (processed_blocks as f64 / total_blocks as f64 * 100.0).min(100.0);

                info!(
                    target: "supervisor::storage",
                    chain_id = %self.chain_id,
                    block_number,
                    percentage = %format!("{:.2}%", percentage),
                    processed_blocks,
                    total_blocks,
                    "Rewind progress"
                );
            }
        }

        for derived_from_number in touched_derived_from {
            let Some(mut traversal) = self.traversal_by_number(derived_from_number)? else {
                continue;
            };
            traversal.derived_block_numbers.retain(|&number| number <= new_head);

            if traversal.derived_block_numbers.is_empty() {
                self.tx.delete::<BlockTraversal>(derived_from_number, None)?;
            } else {
                self.tx.put::<BlockTraversal>(derived_from_number, traversal).inspect_err(
                    |err| {
                        error!(
                            target: "supervisor::storage",
                            chain_id = %self.chain_id,
                            derived_from_number,
                            %err,
                            "Failed to update block traversal"
                        );
                    },
                )?;
            }
        }

        info!(
            target: "supervisor::storage",
            chain_id = %self.chain_id,
            target_block_number = new_head,
            total_blocks,
            "Rewind completed successfully"
        );
        Ok(())
    }
}
