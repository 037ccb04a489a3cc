//! Metrics plumbing shared by the supervisor chain indexes.
//!
//! [`observe_metrics_for_result!`] wraps a fallible call and records a success or error counter
//! plus a duration histogram, labelled by method. [`MetricsReporter`] is implemented by types that
//! publish gauges on demand, such as database table statistics.

mod macros;

mod reporter;
pub use reporter::MetricsReporter;

#[doc(hidden)]
pub use metrics as __metrics;
