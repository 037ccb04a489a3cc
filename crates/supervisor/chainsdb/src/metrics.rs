use crate::StoreKind;
use alloy_primitives::ChainId;

/// Container for chain store metrics.
#[derive(Debug, Clone)]
pub(crate) struct Metrics;

impl Metrics {
    pub(crate) const STORAGE_REQUESTS_SUCCESS_TOTAL: &'static str =
        "kona_supervisor_storage_success_total";
    pub(crate) const STORAGE_REQUESTS_ERROR_TOTAL: &'static str =
        "kona_supervisor_storage_error_total";
    pub(crate) const STORAGE_REQUEST_DURATION_SECONDS: &'static str =
        "kona_supervisor_storage_duration_seconds";

    // log store
    pub(crate) const STORAGE_METHOD_ADD_LOG: &'static str = "add_log";
    pub(crate) const STORAGE_METHOD_SEAL_BLOCK: &'static str = "seal_block";
    pub(crate) const STORAGE_METHOD_REWIND: &'static str = "rewind";
    pub(crate) const STORAGE_METHOD_LATEST_SEALED_BLOCK_NUM: &'static str =
        "latest_sealed_block_num";
    pub(crate) const STORAGE_METHOD_FIND_SEALED_BLOCK: &'static str = "find_sealed_block";
    pub(crate) const STORAGE_METHOD_CONTAINS: &'static str = "contains";
    pub(crate) const STORAGE_METHOD_ITERATOR_STARTING_AT: &'static str = "iterator_starting_at";
    pub(crate) const STORAGE_METHOD_OPEN_BLOCK: &'static str = "open_block";

    // derivation stores
    pub(crate) const STORAGE_METHOD_FIRST: &'static str = "first";
    pub(crate) const STORAGE_METHOD_LATEST: &'static str = "latest";
    pub(crate) const STORAGE_METHOD_ADD_DERIVED: &'static str = "add_derived";
    pub(crate) const STORAGE_METHOD_LAST_DERIVED_AT: &'static str = "last_derived_at";
    pub(crate) const STORAGE_METHOD_LAST_DERIVED_AS_OF: &'static str = "last_derived_as_of";
    pub(crate) const STORAGE_METHOD_DERIVED_FROM: &'static str = "derived_from";
    pub(crate) const STORAGE_METHOD_FIRST_AFTER: &'static str = "first_after";
    pub(crate) const STORAGE_METHOD_NEXT_DERIVED_FROM: &'static str = "next_derived_from";
    pub(crate) const STORAGE_METHOD_NEXT_DERIVED: &'static str = "next_derived";
    pub(crate) const STORAGE_METHOD_PREVIOUS_DERIVED_FROM: &'static str = "previous_derived_from";
    pub(crate) const STORAGE_METHOD_PREVIOUS_DERIVED: &'static str = "previous_derived";
    pub(crate) const STORAGE_METHOD_REWIND_DERIVED: &'static str = "rewind_derived";

    const LOG_METHODS: [&'static str; 8] = [
        Self::STORAGE_METHOD_ADD_LOG,
        Self::STORAGE_METHOD_SEAL_BLOCK,
        Self::STORAGE_METHOD_REWIND,
        Self::STORAGE_METHOD_LATEST_SEALED_BLOCK_NUM,
        Self::STORAGE_METHOD_FIND_SEALED_BLOCK,
        Self::STORAGE_METHOD_CONTAINS,
        Self::STORAGE_METHOD_ITERATOR_STARTING_AT,
        Self::STORAGE_METHOD_OPEN_BLOCK,
    ];

    const DERIVATION_METHODS: [&'static str; 12] = [
        Self::STORAGE_METHOD_FIRST,
        Self::STORAGE_METHOD_LATEST,
        Self::STORAGE_METHOD_ADD_DERIVED,
        Self::STORAGE_METHOD_LAST_DERIVED_AT,
        Self::STORAGE_METHOD_LAST_DERIVED_AS_OF,
        Self::STORAGE_METHOD_DERIVED_FROM,
        Self::STORAGE_METHOD_FIRST_AFTER,
        Self::STORAGE_METHOD_NEXT_DERIVED_FROM,
        Self::STORAGE_METHOD_NEXT_DERIVED,
        Self::STORAGE_METHOD_PREVIOUS_DERIVED_FROM,
        Self::STORAGE_METHOD_PREVIOUS_DERIVED,
        Self::STORAGE_METHOD_REWIND_DERIVED,
    ];

    pub(crate) fn init(chain_id: ChainId, kind: StoreKind) {
        Self::describe();
        Self::zero(chain_id, kind);
    }

    fn describe() {
        metrics::describe_counter!(
            Self::STORAGE_REQUESTS_SUCCESS_TOTAL,
            metrics::Unit::Count,
            "Total number of successful Kona Supervisor Storage requests"
        );
        metrics::describe_counter!(
            Self::STORAGE_REQUESTS_ERROR_TOTAL,
            metrics::Unit::Count,
            "Total number of failed Kona Supervisor Storage requests"
        );
        metrics::describe_histogram!(
            Self::STORAGE_REQUEST_DURATION_SECONDS,
            metrics::Unit::Seconds,
            "Duration of Kona Supervisor Storage requests"
        );
    }

    fn zero_storage_method(chain_id: ChainId, kind: StoreKind, method_name: &'static str) {
        metrics::counter!(
            Self::STORAGE_REQUESTS_SUCCESS_TOTAL,
            "method" => method_name,
            "chain_id" => chain_id.to_string(),
            "store" => kind.to_string()
        )
        .increment(0);

        metrics::counter!(
            Self::STORAGE_REQUESTS_ERROR_TOTAL,
            "method" => method_name,
            "chain_id" => chain_id.to_string(),
            "store" => kind.to_string()
        )
        .increment(0);

        metrics::histogram!(
            Self::STORAGE_REQUEST_DURATION_SECONDS,
            "method" => method_name,
            "chain_id" => chain_id.to_string(),
            "store" => kind.to_string()
        )
        .record(0.0);
    }

    fn zero(chain_id: ChainId, kind: StoreKind) {
        let methods: &[&'static str] = match kind {
            StoreKind::Log => &Self::LOG_METHODS,
            StoreKind::LocalSafe | StoreKind::CrossSafe => &Self::DERIVATION_METHODS,
        };
        for method in methods {
            Self::zero_storage_method(chain_id, kind, method);
        }
    }
}
