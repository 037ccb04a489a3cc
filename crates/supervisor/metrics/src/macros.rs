/// Runs a fallible expression and records its outcome.
///
/// Increments `$success_metric` or `$error_metric` depending on the result and records the
/// elapsed seconds in `$duration_metric`. Every metric is labelled with `method` and the
/// optional extra `key => value` labels. Evaluates to the result of `$block`.
#[macro_export]
macro_rules! observe_metrics_for_result {
    (
        $success_metric:expr,
        $error_metric:expr,
        $duration_metric:expr,
        $method_name:expr,
        $block:expr $(, $tag_key:expr => $tag_val:expr )*
    ) => {{
        let start_time = std::time::Instant::now();
        let result = $block;
        let elapsed = start_time.elapsed().as_secs_f64();

        let outcome_metric = if result.is_ok() { $success_metric } else { $error_metric };
        $crate::__metrics::counter!(
            outcome_metric,
            "method" => $method_name
            $(, $tag_key => $tag_val )*
        )
        .increment(1);

        $crate::__metrics::histogram!(
            $duration_metric,
            "method" => $method_name
            $(, $tag_key => $tag_val )*
        )
        .record(elapsed);

        result
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn passes_result_through() {
        let ok: Result<u32, &str> =
            observe_metrics_for_result!("test_success", "test_error", "test_duration", "ok", Ok(7));
        assert_eq!(ok, Ok(7));

        let err: Result<u32, &str> = observe_metrics_for_result!(
            "test_success",
            "test_error",
            "test_duration",
            "err",
            Err("boom"),
            "chain_id" => "10"
        );
        assert_eq!(err, Err("boom"));
    }
}
