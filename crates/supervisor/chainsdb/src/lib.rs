//! Persistent chain indexes for the Supervisor.
//!
//! This crate stores, per tracked chain, an append-only event log and two derivation indexes,
//! and exposes them behind storage traits so that the orchestrator does not depend on the
//! storage engine.
//!
//! The stores are built on top of [`reth-db`], using MDBX, and define schemas for:
//! - Sealed block references and the logs of each block
//! - Derived blocks and the reference-chain blocks they were derived from
//!
//! ## Capabilities
//!
//! - Append logs of the open block and seal blocks in order
//! - Check log checksums for cross-chain message validation
//! - Record local-safe and cross-safe derivation
//! - Rewind logs and derivation during reorgs
//! - Track safety heads and publish cross-safe and finality updates to subscribers
//!
//! [`ChainsDb`] owns the stores of every chain in the dependency set.

pub mod models;

mod error;
pub use error::{ChainsDbError, CloseErrors, EntryNotFoundError, StorageError, StoreKind};

mod env;

mod metrics;
pub(crate) use metrics::Metrics;

mod providers;

mod traits;
pub use traits::{
    CrossDerivedFromStorage, DerivationStorageReader, DerivationStorageWriter,
    LocalDerivedFromStorage, LogIterator, LogStorage, LogStorageReader, LogStorageWriter,
    OpenedBlock,
};

mod log_db;
pub use log_db::{LogDb, LogDbIterator};

mod derivation_db;
pub use derivation_db::DerivationDb;

mod sync;
pub use sync::{RwMap, RwValue};

mod feed;
pub use feed::{Feed, Subscription};

mod config;
pub use config::{ChainStores, StorageConfig, open_chain_stores};

mod chains_db;
pub use chains_db::ChainsDb;

#[cfg(test)]
mod test_utils;
