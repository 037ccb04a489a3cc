//! MDBX-backed derivation index of a single chain.

use crate::{
    Metrics, StoreKind,
    env::StoreEnv,
    error::StorageError,
    providers::DerivationProvider,
    traits::{CrossDerivedFromStorage, DerivationStorageReader, DerivationStorageWriter},
};
use alloy_eips::eip1898::BlockNumHash;
use alloy_primitives::ChainId;
use kona_supervisor_metrics::{MetricsReporter, observe_metrics_for_result};
use kona_supervisor_types::{BlockInfo, BlockSeal, DerivedSealPair};
use std::path::Path;

/// Derivation index of one chain: which derived blocks came from which reference blocks.
///
/// The same backend serves the local-safe and the cross-safe index; `kind` only labels logs and
/// metrics.
#[derive(Debug)]
pub struct DerivationDb {
    chain_id: ChainId,
    kind: StoreKind,
    metrics_enabled: Option<bool>,

    env: StoreEnv,
}

impl DerivationDb {
    /// Creates or opens a derivation index at the given path.
    pub fn new(chain_id: ChainId, kind: StoreKind, path: &Path) -> Result<Self, StorageError> {
        let env = StoreEnv::open(chain_id, kind, path)?;
        Ok(Self { chain_id, kind, metrics_enabled: None, env })
    }

    /// Enables metrics on the store.
    pub fn with_metrics(mut self) -> Self {
        self.metrics_enabled = Some(true);
        Metrics::init(self.chain_id, self.kind);
        self
    }

    /// The chain this store belongs to.
    pub const fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Whether this is the local or the cross index.
    pub const fn kind(&self) -> StoreKind {
        self.kind
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
                "store" => self.kind.to_string()
            )
        } else {
            f()
        }
    }
}

impl DerivationStorageReader for DerivationDb {
    fn first(&self) -> Result<DerivedSealPair, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_FIRST, || {
            self.env.view(|tx| Ok(DerivationProvider::new(tx, self.chain_id).first_pair()?.seals()))
        })
    }

    fn latest(&self) -> Result<DerivedSealPair, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_LATEST, || {
            self.env
                .view(|tx| Ok(DerivationProvider::new(tx, self.chain_id).latest_pair()?.seals()))
        })
    }

    fn last_derived_at(&self, derived_from: BlockNumHash) -> Result<BlockSeal, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_LAST_DERIVED_AT, || {
            self.env.view(|tx| {
                DerivationProvider::new(tx, self.chain_id).last_derived_at(derived_from)
            })
        })
    }

    fn last_derived_as_of(&self, derived_from: BlockNumHash) -> Result<BlockSeal, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_LAST_DERIVED_AS_OF, || {
            self.env.view(|tx| {
                DerivationProvider::new(tx, self.chain_id).last_derived_as_of(derived_from)
            })
        })
    }

    fn derived_from(&self, derived: BlockNumHash) -> Result<BlockSeal, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_DERIVED_FROM, || {
            self.env.view(|tx| DerivationProvider::new(tx, self.chain_id).derived_from(derived))
        })
    }

    fn first_after(
        &self,
        derived_from: BlockNumHash,
        derived: BlockNumHash,
    ) -> Result<DerivedSealPair, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_FIRST_AFTER, || {
            self.env.view(|tx| {
                DerivationProvider::new(tx, self.chain_id).first_after(derived_from, derived)
            })
        })
    }

    fn next_derived_from(&self, derived_from: BlockNumHash) -> Result<BlockSeal, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_NEXT_DERIVED_FROM, || {
            self.env.view(|tx| {
                DerivationProvider::new(tx, self.chain_id).next_derived_from(derived_from)
            })
        })
    }

    fn next_derived(&self, derived: BlockNumHash) -> Result<DerivedSealPair, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_NEXT_DERIVED, || {
            self.env.view(|tx| DerivationProvider::new(tx, self.chain_id).next_derived(derived))
        })
    }

    fn previous_derived_from(
        &self,
        derived_from: BlockNumHash,
    ) -> Result<Option<BlockSeal>, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_PREVIOUS_DERIVED_FROM, || {
            self.env.view(|tx| {
                DerivationProvider::new(tx, self.chain_id).previous_derived_from(derived_from)
            })
        })
    }

    fn previous_derived(&self, derived: BlockNumHash) -> Result<Option<BlockSeal>, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_PREVIOUS_DERIVED, || {
            self.env
                .view(|tx| DerivationProvider::new(tx, self.chain_id).previous_derived(derived))
        })
    }
}

impl DerivationStorageWriter for DerivationDb {
    fn add_derived(&self, derived_from: BlockInfo, derived: BlockInfo) -> Result<(), StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_ADD_DERIVED, || {
            self.env.update(|tx| {
                DerivationProvider::new(tx, self.chain_id).add_derived(derived_from, derived)
            })
        })
    }

    fn rewind(&self, new_head: u64) -> Result<(), StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_REWIND_DERIVED, || {
            self.env.update(|tx| DerivationProvider::new(tx, self.chain_id).rewind(new_head))
        })
    }

    fn close(&self) -> Result<(), StorageError> {
        self.env.close()
    }
}

impl CrossDerivedFromStorage for DerivationDb {}

impl MetricsReporter for DerivationDb {
    fn report_metrics(&self) {
        self.env.report_table_metrics();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_tracing;
    use alloy_primitives::B256;
    use tempfile::TempDir;

    fn block(prefix: u8, number: u64) -> BlockInfo {
        BlockInfo::new(
            B256::from([prefix + number as u8; 32]),
            number,
            B256::from([prefix + number as u8 - 1; 32]),
            number * 2,
        )
    }

    fn open_db(kind: StoreKind) -> (TempDir, DerivationDb) {
        let dir = TempDir::new().expect("create temp dir");
        let db = DerivationDb::new(7, kind, dir.path()).expect("open derivation db");
        (dir, db)
    }

    #[test]
    fn derivation_round_trip() {
        init_test_tracing();
        let (_dir, db) = open_db(StoreKind::LocalSafe);
        assert_eq!(db.kind(), StoreKind::LocalSafe);
        assert_eq!(db.latest(), Err(StorageError::FutureData));

        let l1_a = block(0x10, 100);
        let l1_b = block(0x10, 101);
        db.add_derived(l1_a, block(0x40, 1)).expect("anchor");
        db.add_derived(l1_a, block(0x40, 2)).expect("same source");
        db.add_derived(l1_b, block(0x40, 3)).expect("next source");

        assert_eq!(db.derived_from(block(0x40, 2).id()), Ok(l1_a.seal()));
        assert_eq!(db.last_derived_at(l1_a.id()), Ok(block(0x40, 2).seal()));
        assert_eq!(db.last_derived_at(l1_b.id()), Ok(block(0x40, 3).seal()));
        assert_eq!(db.first().map(|pair| pair.derived), Ok(block(0x40, 1).seal()));
        assert_eq!(
            db.latest(),
            Ok(DerivedSealPair::new(l1_b.seal(), block(0x40, 3).seal()))
        );
    }

    #[test]
    fn cross_store_uses_the_same_contract() {
        init_test_tracing();
        let (_dir, db) = open_db(StoreKind::CrossSafe);
        let store: &dyn CrossDerivedFromStorage = &db;

        store.add_derived(block(0x10, 5), block(0x40, 9)).expect("anchor");
        assert_eq!(store.previous_derived(block(0x40, 9).id()), Ok(None));
        store.rewind(9).expect("rewind to anchor");
        assert_eq!(store.latest().map(|pair| pair.derived.number), Ok(9));

        store.close().expect("close");
        assert_eq!(store.latest(), Err(StorageError::Closed));
    }
}
