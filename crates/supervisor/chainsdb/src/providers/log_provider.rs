//! Reth's MDBX-backed implementation of the event log of a single chain.
//!
//! The [`LogProvider`] wraps one transaction and implements:
//! - appending logs to the open block and sealing it
//! - looking up sealed blocks and single logs, checking containment
//! - stepping an iterator through sealed logs
//! - truncating the tail of the log on rewind
//!
//! Logs are stored in [`LogEntries`] under dup-sorted tables, with log index used as the subkey.
//! The logs of the open block are stored under `latest_sealed + 1`. Sealed blocks are stored in
//! [`BlockRefs`].

use crate::{
    error::{EntryNotFoundError, StorageError},
    models::{BlockRef, BlockRefs, LogEntries, LogEntry},
    traits::OpenedBlock,
};
use alloy_eips::BlockNumHash;
use alloy_primitives::{B256, ChainId};
use kona_supervisor_types::{BlockSeal, ExecutingMessage, IndexedLog};
use reth_db_api::{
    cursor::{DbCursorRO, DbDupCursorRO, DbDupCursorRW},
    transaction::{DbTx, DbTxMut},
};
use std::collections::HashMap;
use tracing::{debug, error, info, trace, warn};

const DEFAULT_LOG_INTERVAL: u64 = 100;

/// Position of a log iterator between two read snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LogCursor {
    /// Block whose logs are read next.
    pub(crate) block: u64,
    /// Index of the next log to yield in `block`.
    pub(crate) next_index: u32,
    /// Hash of the sealed block right before `block`.
    pub(crate) parent_hash: B256,
    /// Hash of `block`, once the iterator has seen it sealed.
    pub(crate) block_hash: Option<B256>,
}

impl LogCursor {
    /// `(sealed block, logs since)` pair that resumes at this position.
    pub(crate) const fn checkpoint(&self) -> (u64, u32) {
        (self.block - 1, self.next_index)
    }
}

/// A log storage that wraps a transactional reference to the MDBX backend.
#[derive(Debug)]
pub(crate) struct LogProvider<'tx, TX> {
    tx: &'tx TX,
    chain_id: ChainId,
    #[doc(hidden)]
    observability_interval: u64,
}

impl<'tx, TX> LogProvider<'tx, TX> {
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

impl<TX> LogProvider<'_, TX>
where
    TX: DbTxMut + DbTx,
{
    /// Appends a log to the open block.
    pub(crate) fn add_log(
        &self,
        log_hash: B256,
        parent_block: BlockNumHash,
        log_index: u32,
        executing_message: Option<ExecutingMessage>,
    ) -> Result<(), StorageError> {
        let latest = self.latest_block()?.ok_or_else(|| {
            warn!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                log_index,
                "Cannot add log before the first sealed block"
            );
            StorageError::DatabaseNotInitialised
        })?;

        if latest.number != parent_block.number || latest.hash != parent_block.hash {
            warn!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                latest_block = %latest,
                incoming_parent = ?parent_block,
                "Incoming log does not build on latest sealed block"
            );
            return Err(StorageError::BlockOutOfOrder);
        }

        let open_block = latest.number + 1;
        let expected = self.open_log_count(open_block)?;
        if log_index != expected {
            warn!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                block_number = open_block,
                expected,
                got = log_index,
                "Incoming log is out of order"
            );
            return Err(StorageError::LogOutOfOrder { expected, got: log_index });
        }

        let mut cursor = self.tx.cursor_dup_write::<LogEntries>().inspect_err(|err| {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                %err,
                "Failed to get dup cursor"
            );
        })?;

        let entry = LogEntry {
            index: log_index,
            hash: log_hash,
            executing_message: executing_message.map(Into::into),
        };
        cursor.append_dup(open_block, entry).inspect_err(|err| {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                block_number = open_block,
                log_index,
                %err,
                "Failed to append log"
            );
        })?;

        trace!(
            target: "supervisor::storage",
            chain_id = %self.chain_id,
            block_number = open_block,
            log_index,
            "Added log"
        );
        Ok(())
    }

    /// Seals the open block. The first seal of an empty store becomes the anchor.
    pub(crate) fn seal_block(
        &self,
        parent_hash: B256,
        block: BlockNumHash,
        timestamp: u64,
    ) -> Result<(), StorageError> {
        debug!(
            target: "supervisor::storage",
            chain_id = %self.chain_id,
            block_number = block.number,
            block_hash = %block.hash,
            "Sealing block"
        );

        let incoming = BlockRef { number: block.number, hash: block.hash, parent_hash, timestamp };

        let Some(latest) = self.latest_block()? else {
            info!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                anchor = %incoming,
                "Sealing anchor block"
            );
            return self.put_block(incoming);
        };

        if incoming.number <= latest.number {
            if let Some(stored_block) = self.block_ref(incoming.number)? {
                if stored_block.hash == incoming.hash &&
                    stored_block.parent_hash == incoming.parent_hash
                {
                    return Ok(());
                }
                warn!(
                    target: "supervisor::storage",
                    chain_id = %self.chain_id,
                    %stored_block,
                    incoming_block = %incoming,
                    "Incoming block is not consistent with the stored block"
                );
                return Err(StorageError::ConflictError);
            }
        }

        if !latest.is_parent_of(&incoming) {
            warn!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                latest_block = %latest,
                incoming_block = %incoming,
                "Incoming block does not follow latest sealed block"
            );
            return Err(StorageError::BlockOutOfOrder);
        }

        self.put_block(incoming)
    }

    fn put_block(&self, block: BlockRef) -> Result<(), StorageError> {
        let block_number = block.number;
        self.tx.put::<BlockRefs>(block_number, block).inspect_err(|err| {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                block_number,
                %err,
                "Failed to insert block"
            );
        })?;
        Ok(())
    }

    /// Deletes every sealed block after `new_head` and all logs from `new_head + 1` onward.
    pub(crate) fn rewind(&self, new_head: u64) -> Result<(), StorageError> {
        info!(
            target: "supervisor::storage",
            chain_id = %self.chain_id,
            target_block_number = new_head,
            "Starting rewind of log storage"
        );

        let Some(latest) = self.latest_block()? else {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                target_block_number = new_head,
                "Cannot rewind empty log storage"
            );
            return Err(StorageError::FutureData);
        };

        if new_head > latest.number {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                target_block_number = new_head,
                latest_block = latest.number,
                "Cannot rewind to future block"
            );
            return Err(StorageError::FutureData);
        }

        if self.block_ref(new_head)?.is_none() {
            warn!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                target_block_number = new_head,
                "Cannot rewind before the anchor block"
            );
            return Err(EntryNotFoundError::SealedBlockNotFound(new_head).into());
        }

        // the open block at `latest + 1` is always dropped
        let total_blocks = latest.number - new_head + 1;
        let mut processed_blocks = 0;

        trace!(
            target: "supervisor::storage",
            chain_id = %self.chain_id,
            target_block_number = new_head,
            latest_block = latest.number,
            total_blocks,
            observability_interval = %self.observability_interval,
            "Rewinding log storage..."
        );

        for block_number in new_head + 1..=latest.number + 1 {
            self.tx.delete::<BlockRefs>(block_number, None).inspect_err(|err| {
                error!(
                    target: "supervisor::storage",
                    chain_id = %self.chain_id,
                    block_number,
                    %err,
                    "Failed to delete block"
                );
            })?;
            self.tx.delete::<LogEntries>(block_number, None).inspect_err(|err| {
                error!(
                    target: "supervisor::storage",
                    chain_id = %self.chain_id,
                    block_number,
                    %err,
                    "Failed to delete logs"
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

impl<TX> LogProvider<'_, TX>
where
    TX: DbTx,
{
    /// Returns the latest sealed block, `None` if the store is empty.
    pub(crate) fn latest_block(&self) -> Result<Option<BlockRef>, StorageError> {
        let mut cursor = self.tx.cursor_read::<BlockRefs>().inspect_err(|err| {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                %err,
                "Failed to get cursor"
            );
        })?;

        let result = cursor.last().inspect_err(|err| {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                %err,
                "Failed to seek to last block"
            );
        })?;
        Ok(result.map(|(_, block)| block))
    }

    /// Returns the anchor block, `None` if the store is empty.
    pub(crate) fn first_block(&self) -> Result<Option<BlockRef>, StorageError> {
        let mut cursor = self.tx.cursor_read::<BlockRefs>().inspect_err(|err| {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                %err,
                "Failed to get cursor"
            );
        })?;

        let result = cursor.first().inspect_err(|err| {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                %err,
                "Failed to seek to first block"
            );
        })?;
        Ok(result.map(|(_, block)| block))
    }

    pub(crate) fn block_ref(&self, block_number: u64) -> Result<Option<BlockRef>, StorageError> {
        let block = self.tx.get::<BlockRefs>(block_number).inspect_err(|err| {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                block_number,
                %err,
                "Failed to read block",
            );
        })?;
        Ok(block)
    }

    /// Returns a sealed block, distinguishing blocks after the head from blocks before the
    /// anchor.
    pub(crate) fn get_block(&self, block_number: u64) -> Result<BlockRef, StorageError> {
        debug!(
            target: "supervisor::storage",
            chain_id = %self.chain_id,
            block_number,
            "Fetching block"
        );

        if let Some(block) = self.block_ref(block_number)? {
            return Ok(block);
        }

        match self.latest_block()? {
            Some(latest) if block_number <= latest.number => {
                warn!(
                    target: "supervisor::storage",
                    chain_id = %self.chain_id,
                    block_number,
                    "Block not found"
                );
                Err(EntryNotFoundError::SealedBlockNotFound(block_number).into())
            }
            _ => Err(StorageError::FutureData),
        }
    }

    /// Returns the log at `(block_number, log_index)`, sealed or not.
    pub(crate) fn log_entry(
        &self,
        block_number: u64,
        log_index: u32,
    ) -> Result<Option<LogEntry>, StorageError> {
        let mut cursor = self.tx.cursor_dup_read::<LogEntries>().inspect_err(|err| {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                %err,
                "Failed to get cursor for LogEntries"
            );
        })?;

        let result = cursor.seek_by_key_subkey(block_number, log_index).inspect_err(|err| {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                block_number,
                log_index,
                %err,
                "Failed to read log entry"
            );
        })?;

        // the cursor lands on the first entry at or after the subkey
        Ok(result.filter(|entry| entry.index == log_index))
    }

    pub(crate) fn get_logs(&self, block_number: u64) -> Result<Vec<LogEntry>, StorageError> {
        debug!(
            target: "supervisor::storage",
            chain_id = %self.chain_id,
            block_number,
            "Fetching logs"
        );

        let mut cursor = self.tx.cursor_dup_read::<LogEntries>().inspect_err(|err| {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                %err,
                "Failed to get dup cursor"
            );
        })?;

        let walker = cursor.walk_range(block_number..=block_number).inspect_err(|err| {
            error!(
                target: "supervisor::storage",
                chain_id = %self.chain_id,
                block_number,
                %err,
                "Failed to walk dup range",
            );
        })?;

        let mut logs = Vec::new();
        for row in walker {
            match row {
                Ok((_, entry)) => logs.push(entry),
                Err(err) => {
                    error!(
                        target: "supervisor::storage",
                        chain_id = %self.chain_id,
                        block_number,
                        %err,
                        "Failed to read log entry",
                    );
                    return Err(StorageError::Database(err));
                }
            }
        }
        Ok(logs)
    }

    /// Number of logs accumulated in the open block.
    fn open_log_count(&self, open_block: u64) -> Result<u32, StorageError> {
        let mut cursor = self.tx.cursor_read::<LogEntries>()?;
        // the open block holds the highest key, so the last row is its last log
        match cursor.last()? {
            Some((block_number, entry)) if block_number == open_block => Ok(entry.index + 1),
            _ => Ok(0),
        }
    }

    /// Checks a log by position and checksum.
    pub(crate) fn contains(
        &self,
        block_number: u64,
        log_index: u32,
        log_hash: B256,
    ) -> Result<BlockSeal, StorageError> {
        debug!(
            target: "supervisor::storage",
            chain_id = %self.chain_id,
            block_number,
            log_index,
            %log_hash,
            "Checking log"
        );

        let (Some(anchor), Some(latest)) = (self.first_block()?, self.latest_block()?) else {
            return Err(StorageError::FutureData);
        };

        if block_number <= anchor.number {
            return Err(EntryNotFoundError::LogNotFound { block_number, log_index }.into());
        }
        if block_number > latest.number + 1 {
            return Err(StorageError::FutureData);
        }

        let entry = self.log_entry(block_number, log_index)?;

        if block_number == latest.number + 1 {
            return match entry {
                Some(entry) if entry.matches(&log_hash) => Ok(BlockSeal::default()),
                Some(entry) => {
                    warn!(
                        target: "supervisor::storage",
                        chain_id = %self.chain_id,
                        block_number,
                        log_index,
                        stored_hash = %entry.hash,
                        %log_hash,
                        "Log in open block does not match"
                    );
                    Err(StorageError::ConflictError)
                }
                None => Err(StorageError::FutureData),
            };
        }

        match entry {
            Some(entry) if entry.matches(&log_hash) => Ok(self.get_block(block_number)?.seal()),
            entry => {
                warn!(
                    target: "supervisor::storage",
                    chain_id = %self.chain_id,
                    block_number,
                    log_index,
                    stored_hash = ?entry.map(|entry| entry.hash),
                    %log_hash,
                    "Sealed block does not contain the log"
                );
                Err(StorageError::ConflictError)
            }
        }
    }

    /// Validates an iterator start position and returns its cursor.
    pub(crate) fn log_cursor(
        &self,
        sealed_num: u64,
        logs_since: u32,
    ) -> Result<LogCursor, StorageError> {
        let sealed = self.get_block(sealed_num)?;
        let next_block = sealed_num + 1;

        if logs_since > 0 {
            let Some(next_sealed) = self.block_ref(next_block)? else {
                return Err(StorageError::FutureData);
            };
            let log_count = self.get_logs(next_block)?.len() as u32;
            if logs_since > log_count {
                return Err(EntryNotFoundError::LogNotFound {
                    block_number: next_block,
                    log_index: logs_since,
                }
                .into());
            }
            if next_sealed.parent_hash != sealed.hash {
                return Err(StorageError::ConflictError);
            }
            return Ok(LogCursor {
                block: next_block,
                next_index: logs_since,
                parent_hash: sealed.hash,
                block_hash: Some(next_sealed.hash),
            });
        }

        Ok(LogCursor {
            block: next_block,
            next_index: 0,
            parent_hash: sealed.hash,
            block_hash: None,
        })
    }

    /// Advances `cursor` to the next sealed log.
    ///
    /// Returns `None` when the cursor reached a block that is not sealed yet.
    pub(crate) fn next_sealed_log(
        &self,
        cursor: &mut LogCursor,
    ) -> Result<Option<IndexedLog>, StorageError> {
        loop {
            let Some(block) = self.block_ref(cursor.block)? else {
                return Ok(None);
            };

            match cursor.block_hash {
                Some(seen) if seen != block.hash => {
                    warn!(
                        target: "supervisor::storage",
                        chain_id = %self.chain_id,
                        block_number = cursor.block,
                        %seen,
                        stored = %block.hash,
                        "Block under iterator was replaced"
                    );
                    return Err(StorageError::ConflictError);
                }
                Some(_) => {}
                None if block.parent_hash != cursor.parent_hash => {
                    warn!(
                        target: "supervisor::storage",
                        chain_id = %self.chain_id,
                        block_number = cursor.block,
                        expected_parent = %cursor.parent_hash,
                        stored_parent = %block.parent_hash,
                        "Block after iterator does not link"
                    );
                    return Err(StorageError::ConflictError);
                }
                None => cursor.block_hash = Some(block.hash),
            }

            if let Some(entry) = self.log_entry(cursor.block, cursor.next_index)? {
                cursor.next_index += 1;
                return Ok(Some(IndexedLog { block: block.seal(), log: entry.into() }));
            }

            *cursor = LogCursor {
                block: cursor.block + 1,
                next_index: 0,
                parent_hash: block.hash,
                block_hash: None,
            };
        }
    }

    /// Returns a sealed block with its log count and executing messages.
    pub(crate) fn open_block(&self, block_number: u64) -> Result<OpenedBlock, StorageError> {
        let block = self.get_block(block_number)?;
        let logs = self.get_logs(block_number)?;

        let executing_messages = logs
            .iter()
            .filter_map(|entry| {
                entry.executing_message.map(|msg| (entry.index, ExecutingMessage::from(msg)))
            })
            .collect::<HashMap<_, _>>();

        Ok(OpenedBlock {
            block: block.into(),
            log_count: logs.len() as u32,
            executing_messages,
        })
    }
}
