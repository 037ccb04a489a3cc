//! Core types shared across supervisor components.
//!
//! This crate defines the value types exchanged with the chain indexes: block seals and
//! references, indexed logs and their executing messages, derivation pairs, safety levels and
//! the static dependency set.

mod block;
pub use block::{BlockInfo, BlockSeal};

mod log;
pub use log::{IndexedLog, Log};

mod message;
pub use message::ExecutingMessage;

mod derived;
pub use derived::{DerivedPair, DerivedSealPair};

mod safety;
pub use safety::SafetyLevel;

mod depset;
pub use depset::{ChainDependency, DependencySet, DependencySetError, MESSAGE_EXPIRY_WINDOW};
