//! The static dependency set: which chains are tracked and how they relate.

use alloy_primitives::ChainId;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs::File, io::BufReader, path::Path};
use thiserror::Error;

/// Default expiry window for cross-chain messages: 7 days, in seconds.
pub const MESSAGE_EXPIRY_WINDOW: u64 = 7 * 24 * 60 * 60;

/// Configuration for a dependency of a chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainDependency {
    /// Position of the chain inside the set.
    pub chain_index: u32,
    /// Timestamp from which the chain may execute messages.
    pub activation_time: u64,
    /// Oldest timestamp of messages the chain may initiate.
    pub history_min_time: u64,
}

/// Configuration for the dependency set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencySet {
    /// Dependencies information per chain.
    pub dependencies: HashMap<ChainId, ChainDependency>,

    /// Override message expiry window to use for this dependency set.
    #[serde(default)]
    pub override_message_expiry_window: Option<u64>,
}

/// Errors raised while loading a [`DependencySet`].
#[derive(Debug, Error)]
pub enum DependencySetError {
    /// The file could not be read.
    #[error("failed to read dependency set: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a valid dependency set document.
    #[error("failed to decode dependency set: {0}")]
    Json(#[from] serde_json::Error),
}

impl DependencySet {
    /// Loads a dependency set from a JSON document on disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DependencySetError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Returns the ids of all chains in the set, in ascending order.
    pub fn chain_ids(&self) -> Vec<ChainId> {
        let mut ids: Vec<_> = self.dependencies.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns `true` if the chain is part of the set.
    pub fn has_chain(&self, chain_id: ChainId) -> bool {
        self.dependencies.contains_key(&chain_id)
    }

    /// Returns `true` if the chain may execute messages in a block with the given timestamp.
    pub fn can_execute_at(&self, chain_id: ChainId, timestamp: u64) -> bool {
        self.dependencies.get(&chain_id).is_some_and(|dep| timestamp >= dep.activation_time)
    }

    /// Returns `true` if the chain may initiate messages in a block with the given timestamp.
    pub fn can_initiate_at(&self, chain_id: ChainId, timestamp: u64) -> bool {
        self.dependencies.get(&chain_id).is_some_and(|dep| timestamp >= dep.history_min_time)
    }

    /// Returns the message expiry window associated with this dependency set.
    pub const fn message_expiry_window(&self) -> u64 {
        match self.override_message_expiry_window {
            Some(window) if window > 0 => window,
            _ => MESSAGE_EXPIRY_WINDOW,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const DEPSET_JSON: &str = r#"{
        "dependencies": {
            "900": { "chainIndex": 0, "activationTime": 10, "historyMinTime": 5 },
            "901": { "chainIndex": 1, "activationTime": 0, "historyMinTime": 0 }
        }
    }"#;

    #[test]
    fn decodes_from_json_file() {
        let mut file = NamedTempFile::new().expect("create temp file");
        file.write_all(DEPSET_JSON.as_bytes()).expect("write depset");

        let depset = DependencySet::from_json_file(file.path()).expect("load depset");
        assert_eq!(depset.chain_ids(), vec![900, 901]);
        assert_eq!(depset.dependencies[&901].chain_index, 1);
        assert_eq!(depset.override_message_expiry_window, None);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let result = DependencySet::from_json_file(dir.path().join("missing.json"));
        assert!(matches!(result, Err(DependencySetError::Io(_))));
    }

    #[test]
    fn malformed_document_is_json_error() {
        let mut file = NamedTempFile::new().expect("create temp file");
        file.write_all(b"{ not json").expect("write depset");
        let result = DependencySet::from_json_file(file.path());
        assert!(matches!(result, Err(DependencySetError::Json(_))));
    }

    #[test]
    fn activation_and_history_bounds() {
        let depset: DependencySet = serde_json::from_str(DEPSET_JSON).unwrap();

        assert!(!depset.can_execute_at(900, 9));
        assert!(depset.can_execute_at(900, 10));
        assert!(!depset.can_initiate_at(900, 4));
        assert!(depset.can_initiate_at(900, 5));

        assert!(!depset.has_chain(902));
        assert!(!depset.can_execute_at(902, u64::MAX));
    }

    #[test]
    fn expiry_window_defaults_when_override_is_zero() {
        let mut depset = DependencySet::default();
        assert_eq!(depset.message_expiry_window(), MESSAGE_EXPIRY_WINDOW);

        depset.override_message_expiry_window = Some(0);
        assert_eq!(depset.message_expiry_window(), MESSAGE_EXPIRY_WINDOW);

        depset.override_message_expiry_window = Some(12345);
        assert_eq!(depset.message_expiry_window(), 12345);
    }
}
