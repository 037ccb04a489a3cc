//! The multi-chain orchestrator owning the stores, safety pointers and feeds of every chain.

use crate::{
    ChainStores, ChainsDbError, CloseErrors, CrossDerivedFromStorage, DerivationStorageReader,
    DerivationStorageWriter, Feed, LocalDerivedFromStorage, LogIterator, LogStorage,
    LogStorageReader, LogStorageWriter, OpenedBlock, RwMap, RwValue, StorageConfig, StorageError,
    StoreKind, Subscription, open_chain_stores,
};
use alloy_eips::eip1898::BlockNumHash;
use alloy_primitives::{B256, ChainId};
use kona_supervisor_metrics::MetricsReporter;
use kona_supervisor_types::{
    BlockInfo, BlockSeal, DependencySet, DerivedPair, DerivedSealPair, ExecutingMessage,
    SafetyLevel,
};
use std::{fmt, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Stores, safety pointers and subscription feeds of every chain in the dependency set.
///
/// Each collection is its own lock-guarded map keyed by chain id, so registering or querying one
/// collection never blocks another. Map locks are released before a store is called.
#[derive(Debug)]
pub struct ChainsDb {
    log_dbs: RwMap<ChainId, Arc<dyn LogStorage>>,
    local_dbs: RwMap<ChainId, Arc<dyn LocalDerivedFromStorage>>,
    cross_dbs: RwMap<ChainId, Arc<dyn CrossDerivedFromStorage>>,
    cross_unsafe: RwMap<ChainId, Arc<RwValue<BlockSeal>>>,

    cross_safe_feeds: RwMap<ChainId, Arc<Feed<DerivedPair>>>,
    finality_feeds: RwMap<ChainId, Arc<Feed<BlockNumHash>>>,

    /// Shared across chains. In-memory only, not persisted.
    finalized_l1: RwValue<BlockInfo>,
    dependency_set: DependencySet,
}

impl ChainsDb {
    /// Creates an orchestrator without any registered chain.
    pub fn new(dependency_set: DependencySet) -> Self {
        Self {
            log_dbs: RwMap::new(),
            local_dbs: RwMap::new(),
            cross_dbs: RwMap::new(),
            cross_unsafe: RwMap::new(),
            cross_safe_feeds: RwMap::new(),
            finality_feeds: RwMap::new(),
            finalized_l1: RwValue::default(),
            dependency_set,
        }
    }

    /// Opens the stores of every chain in `dependency_set` under `config.datadir` and registers
    /// them.
    pub fn open(
        config: &StorageConfig,
        dependency_set: DependencySet,
    ) -> Result<Self, ChainsDbError> {
        let db = Self::new(dependency_set);
        for chain_id in db.dependency_set.chain_ids() {
            let stores = open_chain_stores(config, chain_id)?;
            db.register_chain(chain_id, stores)?;
        }
        Ok(db)
    }

    /// Registers every collection of a chain: its three stores, a fresh cross-unsafe tracker and
    /// its feeds.
    pub fn register_chain(
        &self,
        chain_id: ChainId,
        stores: ChainStores,
    ) -> Result<(), ChainsDbError> {
        self.add_log_db(chain_id, stores.log_db)?;
        self.add_local_derived_from_db(chain_id, stores.local_db)?;
        self.add_cross_derived_from_db(chain_id, stores.cross_db)?;
        self.add_cross_unsafe_tracker(chain_id)?;
        self.add_subscriptions(chain_id)
    }

    /// Registers the event log of a chain, replacing any previous one.
    pub fn add_log_db(
        &self,
        chain_id: ChainId,
        db: Arc<dyn LogStorage>,
    ) -> Result<(), ChainsDbError> {
        register(&self.log_dbs, chain_id, db, "log db")
    }

    /// Registers the local derivation index of a chain, replacing any previous one.
    pub fn add_local_derived_from_db(
        &self,
        chain_id: ChainId,
        db: Arc<dyn LocalDerivedFromStorage>,
    ) -> Result<(), ChainsDbError> {
        register(&self.local_dbs, chain_id, db, "local derived-from db")
    }

    /// Registers the cross derivation index of a chain, replacing any previous one.
    pub fn add_cross_derived_from_db(
        &self,
        chain_id: ChainId,
        db: Arc<dyn CrossDerivedFromStorage>,
    ) -> Result<(), ChainsDbError> {
        register(&self.cross_dbs, chain_id, db, "cross derived-from db")
    }

    /// Registers an unset cross-unsafe pointer for a chain, replacing any previous one.
    pub fn add_cross_unsafe_tracker(&self, chain_id: ChainId) -> Result<(), ChainsDbError> {
        register(&self.cross_unsafe, chain_id, Arc::default(), "cross-unsafe tracker")
    }

    /// Registers the cross-safe and finality feeds of a chain.
    ///
    /// Feeds that are already registered are kept along with their subscribers.
    pub fn add_subscriptions(&self, chain_id: ChainId) -> Result<(), ChainsDbError> {
        let finality = self.finality_feeds.get(&chain_id)?;
        let cross_safe = self.cross_safe_feeds.get(&chain_id)?;
        if finality.is_some() || cross_safe.is_some() {
            warn!(
                target: "supervisor::storage",
                chain_id = %chain_id,
                finality_subscribers = finality.map(|feed| feed.subscriber_count()),
                cross_safe_subscribers = cross_safe.map(|feed| feed.subscriber_count()),
                "Subscriptions already registered, keeping existing feeds"
            );
            return Ok(());
        }
        register(&self.cross_safe_feeds, chain_id, Arc::new(Feed::new()), "cross-safe feed")?;
        register(&self.finality_feeds, chain_id, Arc::new(Feed::new()), "finality feed")
    }

    /// Discards the unsealed tail of every event log by rewinding it to its latest sealed block.
    ///
    /// Call once at startup, before ingestion. Chains are processed in ascending id order and the
    /// first failure aborts the resume: ingesting on top of an unresolved tail is not safe.
    pub fn resume_from_last_sealed_block(&self) -> Result<(), ChainsDbError> {
        let mut log_dbs = self.log_dbs.entries()?;
        log_dbs.sort_unstable_by_key(|(chain_id, _)| *chain_id);

        for (chain_id, db) in log_dbs {
            let latest = db.latest_sealed_block_num().map_err(|source| {
                error!(
                    target: "supervisor::storage",
                    chain_id = %chain_id,
                    err = %source,
                    "Failed to read latest sealed block during resume"
                );
                ChainsDbError::ResumeHead { chain_id, source }
            })?;
            let Some(block_number) = latest else {
                info!(
                    target: "supervisor::storage",
                    chain_id = %chain_id,
                    "No sealed block, nothing to resume"
                );
                continue;
            };

            info!(
                target: "supervisor::storage",
                chain_id = %chain_id,
                block_number,
                "Resuming from last sealed block"
            );
            db.rewind(block_number).map_err(|source| {
                error!(
                    target: "supervisor::storage",
                    chain_id = %chain_id,
                    block_number,
                    err = %source,
                    "Failed to rewind to last sealed block"
                );
                ChainsDbError::Resume { chain_id, block_number, source }
            })?;
        }
        Ok(())
    }

    /// Delivers every cross-safe advance of `chain_id` to `sink` until the subscription is
    /// released.
    pub fn subscribe_cross_safe(
        &self,
        chain_id: ChainId,
        sink: mpsc::Sender<DerivedPair>,
    ) -> Result<Subscription<DerivedPair>, ChainsDbError> {
        Ok(lookup(&self.cross_safe_feeds, chain_id)?.subscribe(sink)?)
    }

    /// Delivers every finality advance of `chain_id` to `sink` until the subscription is
    /// released.
    pub fn subscribe_finalized(
        &self,
        chain_id: ChainId,
        sink: mpsc::Sender<BlockNumHash>,
    ) -> Result<Subscription<BlockNumHash>, ChainsDbError> {
        Ok(lookup(&self.finality_feeds, chain_id)?.subscribe(sink)?)
    }

    /// The chains known to this supervisor and how they relate.
    pub const fn dependency_set(&self) -> &DependencySet {
        &self.dependency_set
    }

    /// Closes every registered store.
    ///
    /// Keeps going past failures and reports all of them together.
    pub fn close(&self) -> Result<(), ChainsDbError> {
        let mut failures = CloseErrors::default();

        for (chain_id, db) in sorted(self.log_dbs.entries()?) {
            record_close(&mut failures, chain_id, StoreKind::Log, db.close());
        }
        for (chain_id, db) in sorted(self.local_dbs.entries()?) {
            record_close(&mut failures, chain_id, StoreKind::LocalSafe, db.close());
        }
        for (chain_id, db) in sorted(self.cross_dbs.entries()?) {
            record_close(&mut failures, chain_id, StoreKind::CrossSafe, db.close());
        }

        if failures.is_empty() { Ok(()) } else { Err(failures.into()) }
    }

    /// The event log of `chain_id`.
    pub fn log_db(&self, chain_id: ChainId) -> Result<Arc<dyn LogStorage>, ChainsDbError> {
        lookup(&self.log_dbs, chain_id)
    }

    /// The local derivation index of `chain_id`.
    pub fn local_db(
        &self,
        chain_id: ChainId,
    ) -> Result<Arc<dyn LocalDerivedFromStorage>, ChainsDbError> {
        lookup(&self.local_dbs, chain_id)
    }

    /// The cross derivation index of `chain_id`.
    pub fn cross_db(
        &self,
        chain_id: ChainId,
    ) -> Result<Arc<dyn CrossDerivedFromStorage>, ChainsDbError> {
        lookup(&self.cross_dbs, chain_id)
    }

    /// Appends a log to the open block of `chain_id`. See [`LogStorageWriter::add_log`].
    pub fn add_log(
        &self,
        chain_id: ChainId,
        log_hash: B256,
        parent_block: BlockNumHash,
        log_index: u32,
        executing_message: Option<ExecutingMessage>,
    ) -> Result<(), ChainsDbError> {
        Ok(self.log_db(chain_id)?.add_log(log_hash, parent_block, log_index, executing_message)?)
    }

    /// Seals the open block of `chain_id`. See [`LogStorageWriter::seal_block`].
    pub fn seal_block(
        &self,
        chain_id: ChainId,
        parent_hash: B256,
        block: BlockNumHash,
        timestamp: u64,
    ) -> Result<(), ChainsDbError> {
        Ok(self.log_db(chain_id)?.seal_block(parent_hash, block, timestamp)?)
    }

    /// Rewinds the event log of `chain_id` to `new_head`.
    pub fn rewind(&self, chain_id: ChainId, new_head: u64) -> Result<(), ChainsDbError> {
        Ok(self.log_db(chain_id)?.rewind(new_head)?)
    }

    /// Records a local-safe derivation of `chain_id`.
    pub fn update_local_safe(
        &self,
        chain_id: ChainId,
        derived_from: BlockInfo,
        derived: BlockInfo,
    ) -> Result<(), ChainsDbError> {
        Ok(self.local_db(chain_id)?.add_derived(derived_from, derived)?)
    }

    /// Records a cross-safe derivation of `chain_id` and publishes it to the chain's cross-safe
    /// subscribers.
    pub fn update_cross_safe(
        &self,
        chain_id: ChainId,
        derived_from: BlockInfo,
        derived: BlockInfo,
    ) -> Result<(), ChainsDbError> {
        self.cross_db(chain_id)?.add_derived(derived_from, derived)?;

        let pair = DerivedPair::new(derived_from.id(), derived.id());
        let feed = match self.cross_safe_feeds.get(&chain_id) {
            Ok(feed) => feed,
            Err(err) => {
                error!(
                    target: "supervisor::storage",
                    chain_id = %chain_id,
                    %err,
                    "Failed to look up cross-safe feed"
                );
                None
            }
        };
        if let Some(feed) = feed {
            publish(&feed, chain_id, pair, "cross-safe");
        }
        Ok(())
    }

    /// Moves the cross-unsafe pointer of `chain_id` to `block`.
    pub fn update_cross_unsafe(
        &self,
        chain_id: ChainId,
        block: BlockSeal,
    ) -> Result<(), ChainsDbError> {
        lookup(&self.cross_unsafe, chain_id)?.set(block)?;
        debug!(target: "supervisor::storage", chain_id = %chain_id, %block, "Updated cross-unsafe");
        Ok(())
    }

    /// Advances the finalized reference-chain block and publishes the resulting finalized block
    /// of every chain to its finality subscribers.
    ///
    /// # Errors
    /// * [`StorageError::BlockOutOfOrder`] if `block` is older than the current finalized block.
    /// * [`StorageError::ConflictError`] if `block` has the current number but another hash.
    pub fn update_finalized_l1(&self, block: BlockInfo) -> Result<(), ChainsDbError> {
        let advanced = self.finalized_l1.update(|current| {
            if current.is_zero() || block.number > current.number {
                *current = block;
                return Ok(true);
            }
            if block.number < current.number {
                warn!(
                    target: "supervisor::storage",
                    current_block_number = current.number,
                    new_block_number = block.number,
                    "New finalized block number is older than current finalized block number"
                );
                return Err(StorageError::BlockOutOfOrder);
            }
            if block.hash != current.hash {
                warn!(
                    target: "supervisor::storage",
                    block_number = block.number,
                    current_hash = %current.hash,
                    new_hash = %block.hash,
                    "New finalized block conflicts with current finalized block"
                );
                return Err(StorageError::ConflictError);
            }
            Ok(false)
        })?;

        if !advanced {
            return Ok(());
        }
        info!(target: "supervisor::storage", finalized_l1 = %block, "Updated finalized L1");

        let feeds = match self.finality_feeds.entries() {
            Ok(feeds) => feeds,
            Err(err) => {
                error!(target: "supervisor::storage", %err, "Failed to read finality feeds");
                return Ok(());
            }
        };
        for (chain_id, feed) in sorted(feeds) {
            match self.finalized(chain_id) {
                Ok(finalized) => publish(&feed, chain_id, finalized.id(), "finality"),
                Err(err) => {
                    debug!(
                        target: "supervisor::storage",
                        chain_id = %chain_id,
                        %err,
                        "No finalized block to publish"
                    );
                }
            }
        }
        Ok(())
    }

    /// See [`LogStorageReader::latest_sealed_block_num`].
    pub fn latest_sealed_block_num(&self, chain_id: ChainId) -> Result<Option<u64>, ChainsDbError> {
        Ok(self.log_db(chain_id)?.latest_sealed_block_num()?)
    }

    /// See [`LogStorageReader::find_sealed_block`].
    pub fn find_sealed_block(
        &self,
        chain_id: ChainId,
        number: u64,
    ) -> Result<BlockSeal, ChainsDbError> {
        Ok(self.log_db(chain_id)?.find_sealed_block(number)?)
    }

    /// See [`LogStorageReader::contains`].
    pub fn contains(
        &self,
        chain_id: ChainId,
        block_num: u64,
        log_index: u32,
        log_hash: B256,
    ) -> Result<BlockSeal, ChainsDbError> {
        Ok(self.log_db(chain_id)?.contains(block_num, log_index, log_hash)?)
    }

    /// See [`LogStorageReader::iterator_starting_at`].
    pub fn iterator_starting_at(
        &self,
        chain_id: ChainId,
        sealed_num: u64,
        logs_since: u32,
    ) -> Result<Box<dyn LogIterator>, ChainsDbError> {
        Ok(self.log_db(chain_id)?.iterator_starting_at(sealed_num, logs_since)?)
    }

    /// See [`LogStorageReader::open_block`].
    pub fn open_block(
        &self,
        chain_id: ChainId,
        block_num: u64,
    ) -> Result<OpenedBlock, ChainsDbError> {
        Ok(self.log_db(chain_id)?.open_block(block_num)?)
    }

    /// The latest sealed block of `chain_id`.
    pub fn local_unsafe(&self, chain_id: ChainId) -> Result<BlockSeal, ChainsDbError> {
        let db = self.log_db(chain_id)?;
        let latest = db.latest_sealed_block_num()?.ok_or(StorageError::FutureData)?;
        Ok(db.find_sealed_block(latest)?)
    }

    /// The cross-unsafe block of `chain_id`, or its cross-safe block while the pointer is unset.
    pub fn cross_unsafe(&self, chain_id: ChainId) -> Result<BlockSeal, ChainsDbError> {
        let block = lookup(&self.cross_unsafe, chain_id)?.get()?;
        if block.is_zero() {
            return Ok(self.cross_safe(chain_id)?.derived);
        }
        Ok(block)
    }

    /// The latest local-safe pair of `chain_id`.
    pub fn local_safe(&self, chain_id: ChainId) -> Result<DerivedSealPair, ChainsDbError> {
        Ok(self.local_db(chain_id)?.latest()?)
    }

    /// The latest cross-safe pair of `chain_id`.
    pub fn cross_safe(&self, chain_id: ChainId) -> Result<DerivedSealPair, ChainsDbError> {
        Ok(self.cross_db(chain_id)?.latest()?)
    }

    /// The finalized reference-chain block.
    ///
    /// Fails with [`StorageError::FutureData`] until it is first set.
    pub fn finalized_l1(&self) -> Result<BlockInfo, ChainsDbError> {
        let block = self.finalized_l1.get()?;
        if block.is_zero() {
            return Err(StorageError::FutureData.into());
        }
        Ok(block)
    }

    /// The latest cross-safe block of `chain_id` derived from finalized reference-chain input.
    pub fn finalized(&self, chain_id: ChainId) -> Result<BlockSeal, ChainsDbError> {
        let finalized_l1 = self.finalized_l1()?;
        let cross_db = self.cross_db(chain_id)?;

        let latest = cross_db.latest()?;
        if finalized_l1.number >= latest.derived_from.number {
            return Ok(latest.derived);
        }
        Ok(cross_db.last_derived_as_of(finalized_l1.id())?)
    }

    /// The head of `chain_id` at the given safety level.
    pub fn safety_head(
        &self,
        chain_id: ChainId,
        level: SafetyLevel,
    ) -> Result<BlockSeal, ChainsDbError> {
        match level {
            SafetyLevel::LocalUnsafe => self.local_unsafe(chain_id),
            SafetyLevel::CrossUnsafe => self.cross_unsafe(chain_id),
            SafetyLevel::LocalSafe => Ok(self.local_safe(chain_id)?.derived),
            SafetyLevel::CrossSafe => Ok(self.cross_safe(chain_id)?.derived),
            SafetyLevel::Finalized => self.finalized(chain_id),
        }
    }
}

impl MetricsReporter for ChainsDb {
    fn report_metrics(&self) {
        let stores = (self.log_dbs.entries(), self.local_dbs.entries(), self.cross_dbs.entries());
        let (Ok(log_dbs), Ok(local_dbs), Ok(cross_dbs)) = stores else {
            error!(
                target: "supervisor::storage",
                "Failed to acquire read lock for metrics reporting"
            );
            return;
        };

        for (_, db) in log_dbs {
            db.report_metrics();
        }
        for (_, db) in local_dbs {
            db.report_metrics();
        }
        for (_, db) in cross_dbs {
            db.report_metrics();
        }
    }
}

fn register<V: Clone>(
    map: &RwMap<ChainId, V>,
    chain_id: ChainId,
    value: V,
    what: &'static str,
) -> Result<(), ChainsDbError> {
    if map.insert(chain_id, value)?.is_some() {
        warn!(
            target: "supervisor::storage",
            chain_id = %chain_id,
            what,
            "Chain already registered, replacing"
        );
    } else {
        debug!(target: "supervisor::storage", chain_id = %chain_id, what, "Registered chain");
    }
    Ok(())
}

/// Offers `value` to the subscribers of `feed`.
///
/// The update that triggered it is already committed, so a failure is logged and not returned.
fn publish<T: Clone + fmt::Debug>(
    feed: &Feed<T>,
    chain_id: ChainId,
    value: T,
    what: &'static str,
) {
    match feed.send(value) {
        Ok(delivered) => {
            debug!(
                target: "supervisor::storage",
                chain_id = %chain_id,
                what,
                delivered,
                "Published update"
            );
        }
        Err(err) => {
            error!(
                target: "supervisor::storage",
                chain_id = %chain_id,
                what,
                %err,
                "Failed to publish update"
            );
        }
    }
}

fn lookup<V: Clone>(map: &RwMap<ChainId, V>, chain_id: ChainId) -> Result<V, ChainsDbError> {
    map.get(&chain_id)?.ok_or(ChainsDbError::UnknownChain(chain_id))
}

fn sorted<V>(mut entries: Vec<(ChainId, V)>) -> Vec<(ChainId, V)> {
    entries.sort_unstable_by_key(|(chain_id, _)| *chain_id);
    entries
}

fn record_close(
    failures: &mut CloseErrors,
    chain_id: ChainId,
    kind: StoreKind,
    result: Result<(), StorageError>,
) {
    if let Err(err) = result {
        error!(
            target: "supervisor::storage",
            chain_id = %chain_id,
            store = %kind,
            %err,
            "Failed to close database"
        );
        failures.push(chain_id, kind, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_tracing;
    use kona_supervisor_types::{ChainDependency, IndexedLog};
    use mockall::mock;
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        thread,
    };
    use tempfile::TempDir;
    use tokio::sync::mpsc::error::TryRecvError;

    mock! {
        #[derive(Debug)]
        pub LogStore {}

        impl LogStorageReader for LogStore {
            fn latest_sealed_block_num(&self) -> Result<Option<u64>, StorageError>;
            fn find_sealed_block(&self, number: u64) -> Result<BlockSeal, StorageError>;
            fn contains(&self, block_num: u64, log_index: u32, log_hash: B256) -> Result<BlockSeal, StorageError>;
            fn iterator_starting_at(&self, sealed_num: u64, logs_since: u32) -> Result<Box<dyn LogIterator>, StorageError>;
            fn open_block(&self, block_num: u64) -> Result<OpenedBlock, StorageError>;
        }

        impl LogStorageWriter for LogStore {
            fn add_log(&self, log_hash: B256, parent_block: BlockNumHash, log_index: u32, executing_message: Option<ExecutingMessage>) -> Result<(), StorageError>;
            fn seal_block(&self, parent_hash: B256, block: BlockNumHash, timestamp: u64) -> Result<(), StorageError>;
            fn rewind(&self, new_head: u64) -> Result<(), StorageError>;
            fn close(&self) -> Result<(), StorageError>;
        }

        impl MetricsReporter for LogStore {
            fn report_metrics(&self);
        }
    }

    mock! {
        #[derive(Debug)]
        pub DerivationStore {}

        impl DerivationStorageReader for DerivationStore {
            fn first(&self) -> Result<DerivedSealPair, StorageError>;
            fn latest(&self) -> Result<DerivedSealPair, StorageError>;
            fn last_derived_at(&self, derived_from: BlockNumHash) -> Result<BlockSeal, StorageError>;
            fn last_derived_as_of(&self, derived_from: BlockNumHash) -> Result<BlockSeal, StorageError>;
            fn derived_from(&self, derived: BlockNumHash) -> Result<BlockSeal, StorageError>;
            fn first_after(&self, derived_from: BlockNumHash, derived: BlockNumHash) -> Result<DerivedSealPair, StorageError>;
            fn next_derived_from(&self, derived_from: BlockNumHash) -> Result<BlockSeal, StorageError>;
            fn next_derived(&self, derived: BlockNumHash) -> Result<DerivedSealPair, StorageError>;
            fn previous_derived_from(&self, derived_from: BlockNumHash) -> Result<Option<BlockSeal>, StorageError>;
            fn previous_derived(&self, derived: BlockNumHash) -> Result<Option<BlockSeal>, StorageError>;
        }

        impl DerivationStorageWriter for DerivationStore {
            fn add_derived(&self, derived_from: BlockInfo, derived: BlockInfo) -> Result<(), StorageError>;
            fn rewind(&self, new_head: u64) -> Result<(), StorageError>;
            fn close(&self) -> Result<(), StorageError>;
        }

        impl MetricsReporter for DerivationStore {
            fn report_metrics(&self);
        }
    }

    impl CrossDerivedFromStorage for MockDerivationStore {}

    fn dependency_set(chain_ids: &[ChainId]) -> DependencySet {
        DependencySet {
            dependencies: chain_ids
                .iter()
                .enumerate()
                .map(|(index, chain_id)| {
                    (*chain_id, ChainDependency { chain_index: index as u32, ..Default::default() })
                })
                .collect(),
            override_message_expiry_window: None,
        }
    }

    fn open_chains(dir: &TempDir) -> ChainsDb {
        let config = StorageConfig::new(dir.path().to_path_buf(), false);
        ChainsDb::open(&config, dependency_set(&[1, 2])).expect("open chains db")
    }

    fn l1(number: u64) -> BlockInfo {
        BlockInfo::new(
            B256::from([0x10 + number as u8; 32]),
            number,
            B256::from([0x10 + number as u8 - 1; 32]),
            1_000 + number * 12,
        )
    }

    fn l2(number: u64) -> BlockInfo {
        BlockInfo::new(
            B256::from([0x40 + number as u8; 32]),
            number,
            B256::from([0x40 + number as u8 - 1; 32]),
            1_000 + number * 2,
        )
    }

    fn log_hash(block: u64, index: u32) -> B256 {
        B256::from([0x80 + (block as u8) * 8 + index as u8; 32])
    }

    fn seal(db: &ChainsDb, chain_id: ChainId, number: u64) {
        let block = l2(number);
        db.seal_block(chain_id, block.parent_hash, block.id(), block.timestamp)
            .expect("seal block");
    }

    const FORK_A: u8 = 0xA0;
    const FORK_B: u8 = 0xB0;
    const FORK_POINT: u64 = 3;

    fn numbered(fill: u8, number: u64) -> B256 {
        let mut bytes = [fill; 32];
        bytes[24..].copy_from_slice(&number.to_be_bytes());
        B256::from(bytes)
    }

    /// Block `number` of `fork`. Blocks up to `FORK_POINT` are shared by every fork.
    fn fork_block(fork: u8, number: u64) -> BlockNumHash {
        let fill = if number <= FORK_POINT { FORK_A } else { fork };
        BlockNumHash { number, hash: numbered(fill, number) }
    }

    fn fork_log(fork: u8, number: u64, index: u32) -> B256 {
        let fill = if number <= FORK_POINT { FORK_A } else { fork };
        numbered(fill + 1, number * 8 + index as u64)
    }

    fn fork_seal(fork: u8, number: u64) -> BlockSeal {
        BlockSeal::new(fork_block(fork, number).hash, number, 1_000 + number)
    }

    fn seal_fork_anchor(db: &ChainsDb, chain_id: ChainId) {
        db.seal_block(chain_id, B256::ZERO, fork_block(FORK_A, 1), 1_001).expect("seal anchor");
    }

    /// Adds two logs to every block in `from..=to` of `fork` and seals it.
    fn extend_fork(db: &ChainsDb, chain_id: ChainId, fork: u8, from: u64, to: u64) {
        for number in from..=to {
            let parent = fork_block(fork, number - 1);
            for index in 0..2 {
                db.add_log(chain_id, fork_log(fork, number, index), parent, index, None)
                    .expect("add log");
            }
            db.seal_block(chain_id, parent.hash, fork_block(fork, number), 1_000 + number)
                .expect("seal block");
        }
    }

    fn closing_log_store(result: Result<(), StorageError>) -> MockLogStore {
        let mut store = MockLogStore::new();
        store.expect_close().times(1).return_once(move || result);
        store
    }

    fn closing_derivation_store(result: Result<(), StorageError>) -> MockDerivationStore {
        let mut store = MockDerivationStore::new();
        store.expect_close().times(1).return_once(move || result);
        store
    }

    #[test]
    fn open_registers_every_chain_of_the_dependency_set() {
        init_test_tracing();
        let dir = TempDir::new().expect("create temp dir");
        let db = open_chains(&dir);

        assert!(db.dependency_set().has_chain(2));
        for chain_id in [1, 2] {
            assert_eq!(db.latest_sealed_block_num(chain_id), Ok(None));
            assert_eq!(
                db.local_safe(chain_id),
                Err(ChainsDbError::Storage(StorageError::FutureData))
            );
        }
        assert_eq!(db.log_db(3).err(), Some(ChainsDbError::UnknownChain(3)));
        assert_eq!(db.cross_unsafe(3), Err(ChainsDbError::UnknownChain(3)));
    }

    #[test]
    fn resume_discards_the_unsealed_tail() {
        init_test_tracing();
        let dir = TempDir::new().expect("create temp dir");
        let pending = log_hash(4, 0);
        {
            let db = open_chains(&dir);
            seal(&db, 1, 1);
            db.add_log(1, log_hash(2, 0), l2(1).id(), 0, None).expect("log on block 2");
            seal(&db, 1, 2);
            db.add_log(1, log_hash(3, 0), l2(2).id(), 0, None).expect("log on block 3");
            seal(&db, 1, 3);
            db.add_log(1, pending, l2(3).id(), 0, None).expect("pending log on block 4");
            assert_eq!(db.latest_sealed_block_num(1), Ok(Some(3)));
        }

        // restart
        let db = open_chains(&dir);
        assert_eq!(db.contains(1, 4, 0, pending), Ok(BlockSeal::default()));
        assert_eq!(
            db.add_log(1, log_hash(4, 1), l2(3).id(), 0, None),
            Err(StorageError::LogOutOfOrder { expected: 1, got: 0 }.into())
        );

        db.resume_from_last_sealed_block().expect("resume");
        assert_eq!(db.latest_sealed_block_num(1), Ok(Some(3)));
        assert_eq!(db.latest_sealed_block_num(2), Ok(None));
        assert_eq!(db.contains(1, 4, 0, pending), Err(StorageError::FutureData.into()));
        assert_eq!(db.contains(1, 3, 0, log_hash(3, 0)), Ok(l2(3).seal()));

        db.add_log(1, log_hash(4, 1), l2(3).id(), 0, None).expect("fresh log on block 4");
    }

    #[test]
    fn resume_stops_at_the_first_failing_chain() {
        init_test_tracing();
        let db = ChainsDb::new(dependency_set(&[1, 2, 3]));

        let mut empty = MockLogStore::new();
        empty.expect_latest_sealed_block_num().times(1).returning(|| Ok(None));
        empty.expect_rewind().never();

        let mut failing = MockLogStore::new();
        failing.expect_latest_sealed_block_num().times(1).returning(|| Ok(Some(5)));
        failing
            .expect_rewind()
            .withf(|head| *head == 5)
            .times(1)
            .returning(|_| Err(StorageError::Closed));

        let mut untouched = MockLogStore::new();
        untouched.expect_latest_sealed_block_num().never();
        untouched.expect_rewind().never();

        db.add_log_db(1, Arc::new(empty)).unwrap();
        db.add_log_db(2, Arc::new(failing)).unwrap();
        db.add_log_db(3, Arc::new(untouched)).unwrap();

        let err = db.resume_from_last_sealed_block().unwrap_err();
        assert_eq!(
            err,
            ChainsDbError::Resume { chain_id: 2, block_number: 5, source: StorageError::Closed }
        );
        assert_eq!(err.to_string(), "failed to rewind chain 2 to sealed block 5: store is closed");
    }

    #[test]
    fn resume_names_the_chain_whose_head_cannot_be_read() {
        init_test_tracing();
        let db = ChainsDb::new(dependency_set(&[1, 2]));

        let mut unreadable = MockLogStore::new();
        unreadable
            .expect_latest_sealed_block_num()
            .times(1)
            .returning(|| Err(StorageError::Closed));
        unreadable.expect_rewind().never();

        let mut untouched = MockLogStore::new();
        untouched.expect_latest_sealed_block_num().never();

        db.add_log_db(1, Arc::new(unreadable)).unwrap();
        db.add_log_db(2, Arc::new(untouched)).unwrap();

        let err = db.resume_from_last_sealed_block().unwrap_err();
        assert_eq!(err, ChainsDbError::ResumeHead { chain_id: 1, source: StorageError::Closed });
        assert_eq!(
            err.to_string(),
            "failed to read last sealed block of chain 1: store is closed"
        );
    }

    #[test]
    fn close_reports_every_failure() {
        init_test_tracing();
        let db = ChainsDb::new(dependency_set(&[1, 2]));

        db.add_log_db(1, Arc::new(closing_log_store(Err(StorageError::Closed)))).unwrap();
        db.add_log_db(2, Arc::new(closing_log_store(Ok(())))).unwrap();
        db.add_local_derived_from_db(1, Arc::new(closing_derivation_store(Ok(())))).unwrap();
        db.add_local_derived_from_db(2, Arc::new(closing_derivation_store(Ok(())))).unwrap();
        db.add_cross_derived_from_db(1, Arc::new(closing_derivation_store(Ok(())))).unwrap();
        let lock_poisoned = closing_derivation_store(Err(StorageError::LockPoisoned));
        db.add_cross_derived_from_db(2, Arc::new(lock_poisoned)).unwrap();

        let Err(ChainsDbError::Close(errors)) = db.close() else {
            panic!("expected close errors");
        };
        assert_eq!(
            errors.failures,
            vec![
                (1, StoreKind::Log, StorageError::Closed),
                (2, StoreKind::CrossSafe, StorageError::LockPoisoned),
            ]
        );
    }

    #[test]
    fn closing_twice_fails_for_every_store() {
        init_test_tracing();
        let dir = TempDir::new().expect("create temp dir");
        let db = open_chains(&dir);

        db.close().expect("first close");
        let Err(ChainsDbError::Close(errors)) = db.close() else {
            panic!("expected close errors");
        };
        assert_eq!(errors.len(), 6);
        assert!(errors.failures.iter().all(|(_, _, err)| *err == StorageError::Closed));
        assert_eq!(db.latest_sealed_block_num(1), Err(StorageError::Closed.into()));
    }

    #[test]
    fn registering_twice_replaces_the_store() {
        init_test_tracing();
        let db = ChainsDb::new(DependencySet::default());

        let mut first = MockLogStore::new();
        first.expect_latest_sealed_block_num().never();
        let mut second = MockLogStore::new();
        second.expect_latest_sealed_block_num().times(1).returning(|| Ok(Some(9)));

        db.add_log_db(1, Arc::new(first)).unwrap();
        db.add_log_db(1, Arc::new(second)).unwrap();
        assert_eq!(db.latest_sealed_block_num(1), Ok(Some(9)));
    }

    #[test]
    fn registering_subscriptions_twice_keeps_live_subscribers() {
        init_test_tracing();
        let dir = TempDir::new().expect("create temp dir");
        let db = open_chains(&dir);

        let (tx, mut rx) = mpsc::channel(2);
        let _subscription = db.subscribe_cross_safe(1, tx).expect("subscribe");

        db.add_subscriptions(1).expect("second registration");
        db.update_cross_safe(1, l1(1), l2(1)).expect("cross-safe update");
        assert_eq!(rx.try_recv(), Ok(DerivedPair::new(l1(1).id(), l2(1).id())));

        // a chain without feeds gets fresh ones
        db.add_subscriptions(3).expect("new chain");
        let (tx, _rx) = mpsc::channel(1);
        assert!(db.subscribe_finalized(3, tx).is_ok());
    }

    #[test]
    fn poisoned_feed_does_not_stop_publishing() {
        init_test_tracing();
        let dir = TempDir::new().expect("create temp dir");
        let db = open_chains(&dir);

        db.update_cross_safe(1, l1(1), l2(1)).unwrap();
        db.update_cross_safe(2, l1(1), l2(1)).unwrap();

        let (tx, mut rx) = mpsc::channel(1);
        let _subscription = db.subscribe_finalized(2, tx).expect("subscribe");
        db.finality_feeds.get(&1).unwrap().expect("chain 1 feed").poison();

        db.update_finalized_l1(l1(1)).expect("finality update");
        assert_eq!(db.finalized_l1(), Ok(l1(1)));
        assert_eq!(rx.try_recv(), Ok(l2(1).id()));

        // the derivation is committed even though nobody can be told about it
        db.cross_safe_feeds.get(&1).unwrap().expect("chain 1 feed").poison();
        db.update_cross_safe(1, l1(1), l2(2)).expect("cross-safe update");
        assert_eq!(db.cross_safe(1), Ok(DerivedSealPair::new(l1(1).seal(), l2(2).seal())));
        assert_eq!(
            db.update_cross_safe(1, l1(1), l2(2)),
            Err(StorageError::BlockOutOfOrder.into())
        );
    }

    #[test]
    fn subscribing_to_an_unknown_chain_fails() {
        init_test_tracing();
        let dir = TempDir::new().expect("create temp dir");
        let db = open_chains(&dir);

        let (tx, mut rx) = mpsc::channel(1);
        assert_eq!(db.subscribe_cross_safe(99, tx).err(), Some(ChainsDbError::UnknownChain(99)));
        let (tx, _) = mpsc::channel(1);
        assert_eq!(db.subscribe_finalized(99, tx).err(), Some(ChainsDbError::UnknownChain(99)));

        db.update_cross_safe(1, l1(1), l2(1)).expect("cross-safe update");
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn cross_safe_updates_reach_subscribers_without_blocking() {
        init_test_tracing();
        let dir = TempDir::new().expect("create temp dir");
        let db = open_chains(&dir);

        let (tx, mut rx) = mpsc::channel(1);
        let subscription = db.subscribe_cross_safe(1, tx).expect("subscribe");

        db.update_cross_safe(1, l1(1), l2(1)).expect("first update");
        // never drained, the second update is dropped for this subscriber
        db.update_cross_safe(1, l1(1), l2(2)).expect("second update");

        assert_eq!(rx.try_recv(), Ok(DerivedPair::new(l1(1).id(), l2(1).id())));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(db.cross_safe(1), Ok(DerivedSealPair::new(l1(1).seal(), l2(2).seal())));

        subscription.unsubscribe();
        db.update_cross_safe(1, l1(2), l2(3)).expect("third update");
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));

        // the other chain is unaffected
        assert_eq!(db.cross_safe(2), Err(StorageError::FutureData.into()));
    }

    #[test]
    fn finalized_follows_the_finalized_l1() {
        init_test_tracing();
        let dir = TempDir::new().expect("create temp dir");
        let db = open_chains(&dir);

        db.update_cross_safe(1, l1(1), l2(1)).unwrap();
        db.update_cross_safe(1, l1(1), l2(2)).unwrap();
        db.update_cross_safe(1, l1(2), l2(3)).unwrap();
        db.update_cross_safe(1, l1(4), l2(4)).unwrap();

        let (tx, mut rx) = mpsc::channel(1);
        let _subscription = db.subscribe_finalized(1, tx).expect("subscribe");
        let (tx_other, mut rx_other) = mpsc::channel(1);
        let _other = db.subscribe_finalized(2, tx_other).expect("subscribe");

        assert_eq!(db.finalized_l1(), Err(StorageError::FutureData.into()));
        assert_eq!(db.finalized(1), Err(StorageError::FutureData.into()));

        db.update_finalized_l1(l1(1)).expect("finalize L1 block 1");
        assert_eq!(db.finalized_l1(), Ok(l1(1)));
        assert_eq!(db.finalized(1), Ok(l2(2).seal()));
        assert_eq!(rx.try_recv(), Ok(l2(2).id()));
        // chain 2 has no cross-safe data yet
        assert_eq!(rx_other.try_recv(), Err(TryRecvError::Empty));

        // repeating the same block changes nothing
        db.update_finalized_l1(l1(1)).expect("same block");
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        let fork = BlockInfo { hash: B256::from([0xEE; 32]), ..l1(1) };
        assert_eq!(db.update_finalized_l1(fork), Err(StorageError::ConflictError.into()));

        db.update_finalized_l1(l1(3)).expect("finalize L1 block 3");
        assert_eq!(db.finalized(1), Ok(l2(3).seal()));
        assert_eq!(rx.try_recv(), Ok(l2(3).id()));

        assert_eq!(db.update_finalized_l1(l1(2)), Err(StorageError::BlockOutOfOrder.into()));
        assert_eq!(db.finalized_l1(), Ok(l1(3)));

        db.update_finalized_l1(l1(6)).expect("finalize past the cross-safe input");
        assert_eq!(db.safety_head(1, SafetyLevel::Finalized), Ok(l2(4).seal()));
    }

    #[test]
    fn safety_heads_of_a_chain() {
        init_test_tracing();
        let dir = TempDir::new().expect("create temp dir");
        let db = open_chains(&dir);

        assert_eq!(db.local_unsafe(1), Err(StorageError::FutureData.into()));
        assert_eq!(db.cross_unsafe(1), Err(StorageError::FutureData.into()));

        for number in 1..=4 {
            seal(&db, 1, number);
        }
        db.update_local_safe(1, l1(1), l2(1)).unwrap();
        db.update_local_safe(1, l1(2), l2(2)).unwrap();
        db.update_local_safe(1, l1(2), l2(3)).unwrap();
        db.update_cross_safe(1, l1(1), l2(1)).unwrap();

        assert_eq!(db.safety_head(1, SafetyLevel::LocalUnsafe), Ok(l2(4).seal()));
        // unset cross-unsafe falls back to cross-safe
        assert_eq!(db.safety_head(1, SafetyLevel::CrossUnsafe), Ok(l2(1).seal()));
        assert_eq!(db.safety_head(1, SafetyLevel::LocalSafe), Ok(l2(3).seal()));
        assert_eq!(db.safety_head(1, SafetyLevel::CrossSafe), Ok(l2(1).seal()));
        assert_eq!(
            db.safety_head(1, SafetyLevel::Finalized),
            Err(StorageError::FutureData.into())
        );

        db.update_cross_unsafe(1, l2(2).seal()).unwrap();
        assert_eq!(db.safety_head(1, SafetyLevel::CrossUnsafe), Ok(l2(2).seal()));
        assert_eq!(db.update_cross_unsafe(5, l2(2).seal()), Err(ChainsDbError::UnknownChain(5)));

        let opened = db.open_block(1, 3).expect("open block");
        assert_eq!(opened.block, l2(3));
        assert_eq!(opened.log_count, 0);
    }

    #[test]
    fn ingestion_through_the_orchestrator() {
        init_test_tracing();
        let dir = TempDir::new().expect("create temp dir");
        let db = open_chains(&dir);

        seal(&db, 2, 1);
        db.add_log(2, log_hash(2, 0), l2(1).id(), 0, None).unwrap();
        db.add_log(2, log_hash(2, 1), l2(1).id(), 1, None).unwrap();
        seal(&db, 2, 2);
        db.add_log(2, log_hash(3, 0), l2(2).id(), 0, None).unwrap();
        seal(&db, 2, 3);
        assert_eq!(db.find_sealed_block(2, 2), Ok(l2(2).seal()));

        let positions: Vec<_> = db
            .iterator_starting_at(2, 1, 1)
            .expect("iterator")
            .map(|log| log.expect("log").position())
            .collect();
        assert_eq!(positions, vec![(2, 1), (3, 0)]);

        db.rewind(2, 1).expect("rewind");
        db.rewind(2, 1).expect("rewind again");
        assert_eq!(db.latest_sealed_block_num(2), Ok(Some(1)));
        assert_eq!(db.contains(2, 2, 0, log_hash(2, 0)), Err(StorageError::FutureData.into()));

        // block 2 is re-sealed with other logs
        db.add_log(2, log_hash(2, 7), l2(1).id(), 0, None).unwrap();
        seal(&db, 2, 2);
        assert_eq!(db.contains(2, 2, 0, log_hash(2, 7)), Ok(l2(2).seal()));
        assert_eq!(db.contains(2, 2, 0, log_hash(2, 0)), Err(StorageError::ConflictError.into()));
    }

    #[test]
    fn chains_progress_independently_across_threads() {
        init_test_tracing();
        let dir = TempDir::new().expect("create temp dir");
        let db = open_chains(&dir);

        seal_fork_anchor(&db, 1);
        seal_fork_anchor(&db, 2);
        extend_fork(&db, 2, FORK_A, 2, 2);
        let sealed = fork_seal(FORK_A, 2);

        thread::scope(|s| {
            s.spawn(|| extend_fork(&db, 1, FORK_A, 2, 40));
            s.spawn(|| {
                let mut last_head = 1;
                for _ in 0..200 {
                    assert_eq!(db.contains(2, 2, 1, fork_log(FORK_A, 2, 1)), Ok(sealed));
                    assert_eq!(db.find_sealed_block(2, 2), Ok(sealed));

                    let store = db.log_db(2).expect("chain 2 store");
                    db.add_log_db(2, store).expect("re-register chain 2");

                    let head = db.latest_sealed_block_num(1).expect("chain 1 head");
                    let head = head.expect("chain 1 anchor");
                    assert!(head >= last_head, "chain 1 head went back to {head}");
                    last_head = head;
                }
            });
        });

        assert_eq!(db.latest_sealed_block_num(1), Ok(Some(40)));
        assert_eq!(db.contains(1, 40, 1, fork_log(FORK_A, 40, 1)), Ok(fork_seal(FORK_A, 40)));
        assert_eq!(db.latest_sealed_block_num(2), Ok(Some(2)));
        assert_eq!(db.find_sealed_block(2, 2), Ok(sealed));
    }

    #[test]
    fn iterator_sees_a_single_history_while_another_thread_rewinds() {
        const TIP: u64 = 8;

        init_test_tracing();
        let dir = TempDir::new().expect("create temp dir");
        let db = open_chains(&dir);

        seal_fork_anchor(&db, 1);
        extend_fork(&db, 1, FORK_A, 2, TIP);

        let writer_done = AtomicBool::new(false);
        let (seen, failure) = thread::scope(|s| {
            let reader = s.spawn(|| {
                let mut iter = db.iterator_starting_at(1, 1, 0).expect("iterator");
                let mut seen = Vec::new();
                loop {
                    let done = writer_done.load(Ordering::Acquire);
                    match iter.next() {
                        Some(Ok(log)) => seen.push(log),
                        Some(Err(err)) => return (seen, Some(err)),
                        None if done => return (seen, None),
                        None => thread::yield_now(),
                    }
                }
            });
            s.spawn(|| {
                db.rewind(1, FORK_POINT).expect("rewind to fork point");
                extend_fork(&db, 1, FORK_B, FORK_POINT + 1, TIP);
                writer_done.store(true, Ordering::Release);
            });
            reader.join().expect("reader thread")
        });

        let expected: Vec<(u64, u32)> =
            (2..=TIP).flat_map(|number| [(number, 0), (number, 1)]).collect();
        let positions: Vec<_> = seen.iter().map(IndexedLog::position).collect();
        match failure {
            Some(err) => {
                assert_eq!(err, StorageError::ConflictError);
                assert_eq!(positions.as_slice(), &expected[..positions.len()]);
            }
            None => assert_eq!(positions, expected),
        }

        let mut on_fork_b = false;
        for log in &seen {
            let (number, index) = log.position();
            let fork =
                if log.block.hash == fork_block(FORK_B, number).hash { FORK_B } else { FORK_A };
            assert_eq!(log.block, fork_seal(fork, number));
            assert_eq!(log.log.hash, fork_log(fork, number, index));
            if number > FORK_POINT {
                assert!(!(on_fork_b && fork == FORK_A), "fork A log after fork B at {number}");
                on_fork_b |= fork == FORK_B;
            }
        }

        assert_eq!(db.latest_sealed_block_num(1), Ok(Some(TIP)));
        assert_eq!(db.find_sealed_block(1, TIP), Ok(fork_seal(FORK_B, TIP)));
        let rewritten = db
            .iterator_starting_at(1, FORK_POINT, 0)
            .expect("iterator")
            .collect::<Result<Vec<_>, _>>()
            .expect("logs after the fork point");
        assert_eq!(rewritten.len(), 2 * (TIP - FORK_POINT) as usize);
        for log in rewritten {
            let (number, index) = log.position();
            assert_eq!(log.log.hash, fork_log(FORK_B, number, index));
        }
    }

    #[test]
    fn metrics_are_reported_for_every_store() {
        init_test_tracing();
        let db = ChainsDb::new(DependencySet::default());

        let mut log_store = MockLogStore::new();
        log_store.expect_report_metrics().times(1).return_const(());
        let mut local = MockDerivationStore::new();
        local.expect_report_metrics().times(1).return_const(());
        let mut cross = MockDerivationStore::new();
        cross.expect_report_metrics().times(1).return_const(());

        db.add_log_db(1, Arc::new(log_store)).unwrap();
        db.add_local_derived_from_db(1, Arc::new(local)).unwrap();
        db.add_cross_derived_from_db(1, Arc::new(cross)).unwrap();
        db.report_metrics();
    }
}
