use alloy_eips::BlockNumHash;
use alloy_primitives::ChainId;
use derive_more::Display;
use reth_db::DatabaseError;
use std::fmt;
use thiserror::Error;

/// Errors that may occur while interacting with a single chain store.
///
/// This enum is used across all implementations of the storage traits.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Represents a database error that occurred while interacting with storage.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Represents an error that occurred while initializing the database.
    #[error(transparent)]
    DatabaseInit(#[from] eyre::Report),

    /// A lock guarding shared state was poisoned by a panicking holder.
    #[error("lock poisoned")]
    LockPoisoned,

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// The requested entry is older than anything the store knows about.
    #[error(transparent)]
    EntryNotFound(#[from] EntryNotFoundError),

    /// The requested entry is beyond the current head and may become available later.
    #[error("data not yet available")]
    FutureData,

    /// An append was attempted on a store that has no anchor block yet.
    #[error("database not initialized")]
    DatabaseNotInitialised,

    /// The incoming data contradicts what is already stored.
    #[error("conflicting data")]
    ConflictError,

    /// The incoming block does not extend the latest stored block.
    #[error("latest stored block is not parent of the incoming block")]
    BlockOutOfOrder,

    /// The incoming log index is not the next index of the open block.
    #[error("log out of order, expected index {expected}, got {got}")]
    LogOutOfOrder {
        /// The next index of the open block.
        expected: u32,
        /// The index that was submitted.
        got: u32,
    },
}

impl PartialEq for StorageError {
    fn eq(&self, other: &Self) -> bool {
        use StorageError::*;
        match (self, other) {
            (Database(a), Database(b)) => a == b,
            (DatabaseInit(a), DatabaseInit(b)) => format!("{a}") == format!("{b}"),
            (EntryNotFound(a), EntryNotFound(b)) => a == b,
            (
                LogOutOfOrder { expected: a, got: b },
                LogOutOfOrder { expected: c, got: d },
            ) => a == c && b == d,
            (LockPoisoned, LockPoisoned) |
            (Closed, Closed) |
            (FutureData, FutureData) |
            (DatabaseNotInitialised, DatabaseNotInitialised) |
            (ConflictError, ConflictError) |
            (BlockOutOfOrder, BlockOutOfOrder) => true,
            _ => false,
        }
    }
}

impl Eq for StorageError {}

/// Entry not found error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntryNotFoundError {
    /// No derived blocks recorded at or before the given reference block.
    #[error("no derived blocks for derived-from block, number: {}, hash: {}", .0.number, .0.hash)]
    MissingDerivedBlocks(BlockNumHash),

    /// Expected derived-from block not found.
    #[error("derived-from block not found, number: {0}")]
    DerivedFromBlockNotFound(u64),

    /// Expected derived block not found.
    #[error("derived block not found, number: {0}")]
    DerivedBlockNotFound(u64),

    /// Expected sealed block not found.
    #[error("sealed block not found, number: {0}")]
    SealedBlockNotFound(u64),

    /// Expected log not found.
    #[error("log not found at block {block_number} index {log_index}")]
    LogNotFound {
        /// Block number.
        block_number: u64,
        /// Log index within the block.
        log_index: u32,
    },
}

/// Kind of per-chain store, used to label errors, logs and metrics.
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// The event log store.
    #[display("log")]
    Log,
    /// The local derivation store.
    #[display("local_safe")]
    LocalSafe,
    /// The cross derivation store.
    #[display("cross_safe")]
    CrossSafe,
}

/// Errors raised by [`ChainsDb`](crate::ChainsDb).
#[derive(Debug, Error)]
pub enum ChainsDbError {
    /// No store or feed is registered for the chain.
    #[error("unknown chain: {0}")]
    UnknownChain(ChainId),

    /// A store operation failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Rewinding a chain to its last sealed block failed during resume.
    #[error("failed to rewind chain {chain_id} to sealed block {block_number}: {source}")]
    Resume {
        /// The chain that failed.
        chain_id: ChainId,
        /// The sealed block the chain was rewound to.
        block_number: u64,
        /// The underlying error.
        #[source]
        source: StorageError,
    },

    /// Reading the last sealed block of a chain failed during resume.
    #[error("failed to read last sealed block of chain {chain_id}: {source}")]
    ResumeHead {
        /// The chain that failed.
        chain_id: ChainId,
        /// The underlying error.
        #[source]
        source: StorageError,
    },

    /// One or more stores failed to close.
    #[error(transparent)]
    Close(#[from] CloseErrors),
}

impl PartialEq for ChainsDbError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::UnknownChain(a), Self::UnknownChain(b)) => a == b,
            (Self::Storage(a), Self::Storage(b)) => a == b,
            (
                Self::Resume { chain_id: a, block_number: b, source: c },
                Self::Resume { chain_id: d, block_number: e, source: f },
            ) => a == d && b == e && c == f,
            (
                Self::ResumeHead { chain_id: a, source: b },
                Self::ResumeHead { chain_id: c, source: d },
            ) => a == c && b == d,
            (Self::Close(a), Self::Close(b)) => a == b,
            _ => false,
        }
    }
}

/// Every failure collected while closing the stores of all chains.
#[derive(Debug, Default, PartialEq)]
pub struct CloseErrors {
    /// The failed `(chain, store, error)` triples, in the order they were closed.
    pub failures: Vec<(ChainId, StoreKind, StorageError)>,
}

impl CloseErrors {
    /// Records a failure.
    pub(crate) fn push(&mut self, chain_id: ChainId, kind: StoreKind, err: StorageError) {
        self.failures.push((chain_id, kind, err));
    }

    /// Returns `true` if no store failed.
    pub const fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of stores that failed to close.
    pub const fn len(&self) -> usize {
        self.failures.len()
    }
}

impl fmt::Display for CloseErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to close {} store(s)", self.failures.len())?;
        for (chain_id, kind, err) in &self.failures {
            write!(f, "; failed to close {kind} db for chain {chain_id}: {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CloseErrors {}
