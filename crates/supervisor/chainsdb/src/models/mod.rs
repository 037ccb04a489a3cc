//! Database table schemas of the chain indexes.
//!
//! Every store opens its own MDBX environment with the full [`Tables`] set. A log store only
//! writes [`BlockRefs`] and [`LogEntries`]; a derivation store only writes [`DerivedBlocks`] and
//! [`BlockTraversal`].

use reth_db_api::{
    TableSet, TableType, TableViewer,
    table::{DupSort, TableInfo},
    tables,
};
use std::fmt;

mod log;
pub use log::{ExecutingMessageEntry, LogEntry};

mod block;
pub use block::BlockRef;

mod derivation;
pub use derivation::{DerivedFromTraversal, StoredDerivedBlockPair, U64List};

/// Implements [`reth_db_api::table::Compress`] and [`reth_db_api::table::Decompress`] for types
/// that implement [`reth_codecs::Compact`].
macro_rules! impl_compression_for_compact {
    ($($name:ident),+) => {
        $(
            impl reth_db_api::table::Compress for $name {
                type Compressed = Vec<u8>;

                fn compress_to_buf<B: bytes::BufMut + AsMut<[u8]>>(&self, buf: &mut B) {
                    let _ = reth_codecs::Compact::to_compact(self, buf);
                }
            }

            impl reth_db_api::table::Decompress for $name {
                fn decompress(value: &[u8]) -> Result<$name, reth_db_api::DatabaseError> {
                    let (obj, _) = reth_codecs::Compact::from_compact(value, value.len());
                    Ok(obj)
                }
            }
        )+
    };
}

impl_compression_for_compact!(BlockRef, StoredDerivedBlockPair, DerivedFromTraversal);

impl reth_db_api::table::Compress for LogEntry {
    type Compressed = Vec<u8>;

    fn compress_to_buf<B: bytes::BufMut + AsMut<[u8]>>(&self, buf: &mut B) {
        let _ = reth_codecs::Compact::to_compact(self, buf);
    }
}

tables! {
    /// Logs of every indexed block, dup-sorted by log index.
    /// - Key: `u64`: block number (the open block is `latest_sealed + 1`)
    /// - SubKey: `u32`: log index
    /// - Value: [`LogEntry`]
    table LogEntries {
        type Key = u64;
        type Value = LogEntry;
        type SubKey = u32;
    }

    /// Sealed blocks of a log store.
    /// - Key: `u64`: block number
    /// - Value: [`BlockRef`]
    table BlockRefs {
        type Key = u64;
        type Value = BlockRef;
    }

    /// Derived blocks and the reference block each was derived from.
    /// - Key: `u64`: derived block number
    /// - Value: [`StoredDerivedBlockPair`]
    table DerivedBlocks {
        type Key = u64;
        type Value = StoredDerivedBlockPair;
    }

    /// Reference blocks and the derived block numbers recorded against them.
    /// - Key: `u64`: derived-from block number
    /// - Value: [`DerivedFromTraversal`]
    table BlockTraversal {
        type Key = u64;
        type Value = DerivedFromTraversal;
    }
}
