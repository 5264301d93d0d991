//! Allow-list filtering of worker-reported metric families.

/// Metric families copied from the worker `/metrics` endpoint into the
/// snapshot; everything not named here is dropped at fetch time. The
/// synthetic container-stat families bypass this list entirely.
pub const KEPT_FAMILIES: &[&str] = &[
    "milvus_proxy_sq_latency_bucket",
    "milvus_proxy_sq_latency_sum",
    "milvus_proxy_sq_latency_count",
    "milvus_proxy_mutation_latency_bucket",
    "milvus_proxy_mutation_latency_sum",
    "milvus_proxy_mutation_latency_count",
    "milvus_rootcoord_time_tick_delay",
    "milvus_proxy_search_vectors_count",
    "milvus_proxy_insert_vectors_count",
    "milvus_proxy_req_count",
];

/// Whether a family fetched from a worker is kept. Exact string match.
pub fn keep(name: &str) -> bool {
    KEPT_FAMILIES.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_listed_names_kept() {
        assert!(keep("milvus_proxy_req_count"));
        assert!(keep("milvus_proxy_sq_latency_bucket"));
        assert!(keep("milvus_rootcoord_time_tick_delay"));
    }

    #[test]
    fn test_other_names_dropped() {
        assert!(!keep("unrelated_metric"));
        assert!(!keep("milvus_proxy_sq_latency"));
        assert!(!keep(""));
    }

    #[test]
    fn test_keep_is_pure() {
        assert_eq!(keep("milvus_proxy_req_count"), keep("milvus_proxy_req_count"));
        let _ = keep("unrelated_metric");
        assert!(keep("milvus_proxy_req_count"));
    }

    #[test]
    fn test_list_has_no_duplicates() {
        for (i, name) in KEPT_FAMILIES.iter().enumerate() {
            assert!(!KEPT_FAMILIES[i + 1..].contains(name), "duplicate {name}");
        }
    }
}
