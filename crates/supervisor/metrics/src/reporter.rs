/// Implemented by components that publish point-in-time gauges.
///
/// Unlike the request counters, which are recorded as calls happen, reporters are polled: the
/// owner calls [`MetricsReporter::report_metrics`] periodically and the implementation samples
/// its current state.
pub trait MetricsReporter {
    /// Samples the current state and publishes it to the installed recorder.
    fn report_metrics(&self);
}
