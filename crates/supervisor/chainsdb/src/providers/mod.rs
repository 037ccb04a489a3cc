//! Transaction-scoped providers over the chain store tables.
//!
//! A provider wraps one MDBX transaction and implements the validation and table access of a
//! single store kind:
//! - Sealed blocks and their logs (via [`LogProvider`])
//! - Derived blocks and the reference blocks they came from (via [`DerivationProvider`])
mod derivation_provider;
pub(crate) use derivation_provider::DerivationProvider;

mod log_provider;
pub(crate) use log_provider::{LogCursor, LogProvider};
