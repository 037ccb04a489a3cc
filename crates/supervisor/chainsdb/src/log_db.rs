//! MDBX-backed event log of a single chain.

use crate::{
    Metrics, StoreKind,
    env::StoreEnv,
    error::StorageError,
    providers::{LogCursor, LogProvider},
    traits::{LogIterator, LogStorageReader, LogStorageWriter, OpenedBlock},
};
use alloy_eips::eip1898::BlockNumHash;
use alloy_primitives::{B256, ChainId};
use kona_supervisor_metrics::{MetricsReporter, observe_metrics_for_result};
use kona_supervisor_types::{BlockSeal, ExecutingMessage, IndexedLog};
use std::{path::Path, sync::Arc};

/// Event log of one chain, stored in its own database environment.
///
/// Accumulates the logs of the open block and seals blocks in order. Reads see only committed
/// state; every write validates and writes within one transaction.
#[derive(Debug)]
pub struct LogDb {
    chain_id: ChainId,
    metrics_enabled: Option<bool>,

    env: Arc<StoreEnv>,
}

impl LogDb {
    /// Creates or opens a log store at the given path.
    pub fn new(chain_id: ChainId, path: &Path) -> Result<Self, StorageError> {
        let env = StoreEnv::open(chain_id, StoreKind::Log, path)?;
        Ok(Self { chain_id, metrics_enabled: None, env: Arc::new(env) })
    }

    /// Enables metrics on the store.
    pub fn with_metrics(mut self) -> Self {
        self.metrics_enabled = Some(true);
        Metrics::init(self.chain_id, StoreKind::Log);
        self
    }

    /// The chain this store belongs to.
    pub const fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn observe_call<T, E, F: FnOnce() -> Result<T, E>>(
        &self,
        name: &'static str,
        f: F,
    ) -> Result<T, E> {
        if self.metrics_enabled.unwrap_or(false) {
            observe_metrics_for_result!(
                Metrics::STORAGE_REQUESTS_SUCCESS_TOTAL,
                Metrics::STORAGE_REQUESTS_ERROR_TOTAL,
                Metrics::STORAGE_REQUEST_DURATION_SECONDS,
                name,
                f(),
                "chain_id" => self.chain_id.to_string(),
                "store" => StoreKind::Log.to_string()
            )
        } else {
            f()
        }
    }
}

impl LogStorageReader for LogDb {
    fn latest_sealed_block_num(&self) -> Result<Option<u64>, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_LATEST_SEALED_BLOCK_NUM, || {
            self.env.view(|tx| {
                Ok(LogProvider::new(tx, self.chain_id).latest_block()?.map(|block| block.number))
            })
        })
    }

    fn find_sealed_block(&self, number: u64) -> Result<BlockSeal, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_FIND_SEALED_BLOCK, || {
            self.env.view(|tx| Ok(LogProvider::new(tx, self.chain_id).get_block(number)?.seal()))
        })
    }

    fn contains(
        &self,
        block_num: u64,
        log_index: u32,
        log_hash: B256,
    ) -> Result<BlockSeal, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_CONTAINS, || {
            self.env.view(|tx| {
                LogProvider::new(tx, self.chain_id).contains(block_num, log_index, log_hash)
            })
        })
    }

    fn iterator_starting_at(
        &self,
        sealed_num: u64,
        logs_since: u32,
    ) -> Result<Box<dyn LogIterator>, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_ITERATOR_STARTING_AT, || {
            let cursor = self.env.view(|tx| {
                LogProvider::new(tx, self.chain_id).log_cursor(sealed_num, logs_since)
            })?;
            Ok(Box::new(LogDbIterator {
                chain_id: self.chain_id,
                env: Arc::clone(&self.env),
                cursor,
            }) as Box<dyn LogIterator>)
        })
    }

    fn open_block(&self, block_num: u64) -> Result<OpenedBlock, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_OPEN_BLOCK, || {
            self.env.view(|tx| LogProvider::new(tx, self.chain_id).open_block(block_num))
        })
    }
}

impl LogStorageWriter for LogDb {
    fn add_log(
        &self,
        log_hash: B256,
        parent_block: BlockNumHash,
        log_index: u32,
        executing_message: Option<ExecutingMessage>,
    ) -> Result<(), StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_ADD_LOG, || {
            self.env.update(|tx| {
                LogProvider::new(tx, self.chain_id).add_log(
                    log_hash,
                    parent_block,
                    log_index,
                    executing_message,
                )
            })
        })
    }

    fn seal_block(
        &self,
        parent_hash: B256,
        block: BlockNumHash,
        timestamp: u64,
    ) -> Result<(), StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_SEAL_BLOCK, || {
            self.env.update(|tx| {
                LogProvider::new(tx, self.chain_id).seal_block(parent_hash, block, timestamp)
            })
        })
    }

    fn rewind(&self, new_head: u64) -> Result<(), StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_REWIND, || {
            self.env.update(|tx| LogProvider::new(tx, self.chain_id).rewind(new_head))
        })
    }

    fn close(&self) -> Result<(), StorageError> {
        self.env.close()
    }
}

impl MetricsReporter for LogDb {
    fn report_metrics(&self) {
        self.env.report_table_metrics();
    }
}

/// Iterator over the sealed logs of a [`LogDb`].
///
/// Holds no transaction between steps; each call to `next` reads from a fresh snapshot.
#[derive(Debug)]
pub struct LogDbIterator {
    chain_id: ChainId,
    env: Arc<StoreEnv>,
    cursor: LogCursor,
}

impl Iterator for LogDbIterator {
    type Item = Result<IndexedLog, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let Self { chain_id, env, cursor } = self;
        env.view(|tx| LogProvider::new(tx, *chain_id).next_sealed_log(cursor)).transpose()
    }
}

impl LogIterator for LogDbIterator {
    fn checkpoint(&self) -> (u64, u32) {
        self.cursor.checkpoint()
    }
}
