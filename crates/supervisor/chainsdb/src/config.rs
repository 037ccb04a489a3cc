//! On-disk layout of the per-chain stores.

use crate::{DerivationDb, LogDb, StorageError, StoreKind};
use alloy_primitives::ChainId;
use derive_more::Constructor;
use std::{path::PathBuf, sync::Arc};
use tracing::info;

/// Storage settings shared by every chain.
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct StorageConfig {
    /// Root directory; each chain gets `<datadir>/<chain_id>/`.
    pub datadir: PathBuf,
    /// Record call metrics on every store.
    pub metrics_enabled: bool,
}

impl StorageConfig {
    /// Directory holding the stores of `chain_id`.
    pub fn chain_dir(&self, chain_id: ChainId) -> PathBuf {
        self.datadir.join(chain_id.to_string())
    }

    /// Directory of one store of `chain_id`.
    pub fn store_dir(&self, chain_id: ChainId, kind: StoreKind) -> PathBuf {
        self.chain_dir(chain_id).join(kind.to_string())
    }
}

/// The three stores of one chain.
#[derive(Debug, Clone)]
pub struct ChainStores {
    /// Event log.
    pub log_db: Arc<LogDb>,
    /// Local-safe derivation index.
    pub local_db: Arc<DerivationDb>,
    /// Cross-safe derivation index.
    pub cross_db: Arc<DerivationDb>,
}

/// Creates or opens the stores of `chain_id` under `config.datadir`.
pub fn open_chain_stores(
    config: &StorageConfig,
    chain_id: ChainId,
) -> Result<ChainStores, StorageError> {
    let open_derivation = |kind: StoreKind| -> Result<Arc<DerivationDb>, StorageError> {
        let mut db = DerivationDb::new(chain_id, kind, &config.store_dir(chain_id, kind))?;
        if config.metrics_enabled {
            db = db.with_metrics();
        }
        Ok(Arc::new(db))
    };

    let mut log_db = LogDb::new(chain_id, &config.store_dir(chain_id, StoreKind::Log))?;
    if config.metrics_enabled {
        log_db = log_db.with_metrics();
    }

    let stores = ChainStores {
        log_db: Arc::new(log_db),
        local_db: open_derivation(StoreKind::LocalSafe)?,
        cross_db: open_derivation(StoreKind::CrossSafe)?,
    };

    info!(
        target: "supervisor::storage",
        chain_id = %chain_id,
        path = %config.chain_dir(chain_id).display(),
        "Opened chain stores"
    );
    Ok(stores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DerivationStorageReader, LogStorageReader, test_utils::init_test_tracing};
    use tempfile::TempDir;

    #[test]
    fn stores_live_in_per_chain_directories() {
        init_test_tracing();
        let dir = TempDir::new().expect("create temp dir");
        let config = StorageConfig::new(dir.path().to_path_buf(), false);

        assert_eq!(config.store_dir(10, StoreKind::Log), dir.path().join("10").join("log"));
        assert_eq!(
            config.store_dir(10, StoreKind::CrossSafe),
            dir.path().join("10").join("cross_safe")
        );

        let stores = open_chain_stores(&config, 10).expect("open stores");
        assert_eq!(stores.log_db.chain_id(), 10);
        assert_eq!(stores.local_db.kind(), StoreKind::LocalSafe);
        assert_eq!(stores.cross_db.kind(), StoreKind::CrossSafe);
        assert_eq!(stores.log_db.latest_sealed_block_num(), Ok(None));
        assert_eq!(stores.local_db.latest(), Err(StorageError::FutureData));

        assert!(config.store_dir(10, StoreKind::LocalSafe).is_dir());
    }
}
