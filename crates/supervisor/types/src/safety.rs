use derive_more::Display;
use serde::{Deserialize, Serialize};

/// The safety levels a block of a tracked chain advances through.
///
/// Ordered from least to most safe.
#[derive(
    Debug, Clone, Copy, Display, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    /// Observed, not yet cross-validated.
    #[display("local_unsafe")]
    LocalUnsafe,
    /// Observed and passed the cross-chain dependency check.
    #[display("cross_unsafe")]
    CrossUnsafe,
    /// Derivation recorded against reference-chain input.
    #[display("local_safe")]
    LocalSafe,
    /// Derivation recorded and cross-chain validated.
    #[display("cross_safe")]
    CrossSafe,
    /// Irreversible per the reference chain's finality.
    #[display("finalized")]
    Finalized,
}
