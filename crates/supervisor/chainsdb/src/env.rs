//! Shared MDBX environment handle of a single store.

use crate::{StoreKind, error::StorageError, models::Tables};
use alloy_primitives::ChainId;
use metrics::{Label, gauge};
use reth_db::{
    DatabaseEnv,
    mdbx::{DatabaseArguments, init_db_for},
};
use reth_db_api::{database::Database, transaction::DbTx};
use std::{path::Path, sync::RwLock};
use tracing::{error, info, warn};

/// Read-only transaction type of the environment.
pub(crate) type RoTx = <DatabaseEnv as Database>::TX;

/// Read-write transaction type of the environment.
pub(crate) type RwTx = <DatabaseEnv as Database>::TXMut;

/// Owns the database environment of one store.
///
/// Every operation holds the read side of the lock for the duration of a single transaction.
/// [`StoreEnv::close`] takes the write side, so it waits for in-flight transactions and every
/// later call fails with [`StorageError::Closed`].
#[derive(Debug)]
pub(crate) struct StoreEnv {
    chain_id: ChainId,
    kind: StoreKind,
    env: RwLock<Option<DatabaseEnv>>,
}

impl StoreEnv {
    /// Creates or opens the environment at `path`.
    pub(crate) fn open(
        chain_id: ChainId,
        kind: StoreKind,
        path: &Path,
    ) -> Result<Self, StorageError> {
        let env = init_db_for::<_, Tables>(path, DatabaseArguments::default()).inspect_err(|err| {
            error!(
                target: "supervisor::storage",
                chain_id = %chain_id,
                store = %kind,
                path = %path.display(),
                %err,
                "Failed to open database"
            );
        })?;
        info!(
            target: "supervisor::storage",
            chain_id = %chain_id,
            store = %kind,
            path = %path.display(),
            "Opened database"
        );
        Ok(Self { chain_id, kind, env: RwLock::new(Some(env)) })
    }

    /// Runs `f` in a read-only transaction.
    pub(crate) fn view<T>(
        &self,
        f: impl FnOnce(&RoTx) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let guard = self.env.read().map_err(|_| StorageError::LockPoisoned)?;
        let env = guard.as_ref().ok_or(StorageError::Closed)?;
        env.view(f)?
    }

    /// Runs `f` in a read-write transaction.
    ///
    /// The transaction is committed only if `f` succeeds; otherwise it is aborted and nothing
    /// `f` wrote becomes visible.
    pub(crate) fn update<T>(
        &self,
        f: impl FnOnce(&RwTx) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let guard = self.env.read().map_err(|_| StorageError::LockPoisoned)?;
        let env = guard.as_ref().ok_or(StorageError::Closed)?;

        let tx = env.tx_mut()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.abort();
                Err(err)
            }
        }
    }

    /// Drops the environment. Fails with [`StorageError::Closed`] if already closed.
    pub(crate) fn close(&self) -> Result<(), StorageError> {
        let mut guard = self.env.write().map_err(|_| StorageError::LockPoisoned)?;
        match guard.take() {
            Some(env) => {
                drop(env);
                info!(
                    target: "supervisor::storage",
                    chain_id = %self.chain_id,
                    store = %self.kind,
                    "Closed database"
                );
                Ok(())
            }
            None => Err(StorageError::Closed),
        }
    }

    /// Publishes size, page and entry gauges for every table.
    pub(crate) fn report_table_metrics(&self) {
        let mut metrics = Vec::new();
        let chain_id = self.chain_id.to_string();
        let store = self.kind.to_string();

        let _ = self
            .view(|tx| {
                for table in Tables::ALL.iter().map(Tables::name) {
                    let table_db = tx.inner.open_db(Some(table)).map_err(|err| {
                        StorageError::DatabaseInit(eyre::eyre!("failed to open table {table}: {err}"))
                    })?;
                    let stats = tx.inner.db_stat(&table_db).map_err(|err| {
                        StorageError::DatabaseInit(eyre::eyre!("failed to stat table {table}: {err}"))
                    })?;

                    let page_size = stats.page_size() as usize;
                    let leaf_pages = stats.leaf_pages();
                    let branch_pages = stats.branch_pages();
                    let overflow_pages = stats.overflow_pages();
                    let table_size = page_size * (leaf_pages + branch_pages + overflow_pages);

                    let labels = |extra: Option<(&'static str, &'static str)>| {
                        let mut labels = vec![
                            Label::new("table", table),
                            Label::new("chain_id", chain_id.clone()),
                            Label::new("store", store.clone()),
                        ];
                        if let Some((key, value)) = extra {
                            labels.push(Label::new(key, value));
                        }
                        labels
                    };

                    metrics.push((
                        "kona_supervisor_storage.table_size",
                        table_size as f64,
                        labels(None),
                    ));
                    metrics.push((
                        "kona_supervisor_storage.table_pages",
                        leaf_pages as f64,
                        labels(Some(("type", "leaf"))),
                    ));
                    metrics.push((
                        "kona_supervisor_storage.table_pages",
                        branch_pages as f64,
                        labels(Some(("type", "branch"))),
                    ));
                    metrics.push((
                        "kona_supervisor_storage.table_pages",
                        overflow_pages as f64,
                        labels(Some(("type", "overflow"))),
                    ));
                    metrics.push((
                        "kona_supervisor_storage.table_entries",
                        stats.entries() as f64,
                        labels(None),
                    ));
                }
                Ok(())
            })
            .inspect_err(|err| {
                warn!(
                    target: "supervisor::storage",
                    chain_id = %self.chain_id,
                    store = %self.kind,
                    %err,
                    "Failed to collect database metrics"
                );
            });

        for (name, value, labels) in metrics {
            gauge!(name, labels).set(value);
        }
    }
}
