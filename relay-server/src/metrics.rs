//! Renders the router's and pool's in-memory metrics snapshots as
//! Prometheus exposition text for `GET /metrics`.
//!
//! `relay_core::MetricsCollector` and `relay_pool::PoolMetricsCollector`
//! only expose structured snapshots; flattening those into the
//! line-per-series text format Prometheus scrapes is this binary's job,
//! following a flat line-per-series text-building idiom.

use std::time::Duration;

use relay_core::metrics::MetricsSnapshot;

pub fn render_prometheus(
    router: &MetricsSnapshot,
    pool: &relay_pool::metrics::PoolMetricsSnapshot,
    uptime: Duration,
) -> String {
    let mut out = String::new();

    out.push_str(&format!("relay_requests_total {}\n", router.requests_total));
    out.push_str(&format!("relay_requests_successful {}\n", router.requests_successful));
    out.push_str(&format!("relay_requests_failed {}\n", router.requests_failed));
    out.push_str(&format!("relay_cache_hits_total {}\n", router.cache_hits));
    out.push_str(&format!("relay_cache_misses_total {}\n", router.cache_misses));
    out.push_str(&format!("relay_breaker_transitions_total {}\n", router.breaker_transitions));
    out.push_str(&format!("relay_overload_rejections_total {}\n", router.overload_rejections));
    out.push_str(&format!("relay_preferred_overrides_total {}\n", router.preferred_overrides));
    out.push_str(&format!(
        "relay_end_to_end_latency_ms_sum {}\n",
        router.end_to_end_latency.sum_ms
    ));
    out.push_str(&format!(
        "relay_end_to_end_latency_ms_count {}\n",
        router.end_to_end_latency.count
    ));
    out.push_str(&format!("relay_uptime_seconds {}\n", uptime.as_secs()));

    for (adapter, snapshot) in &router.per_adapter {
        out.push_str(&format!(
            "relay_adapter_requests_total{{adapter=\"{adapter}\"}} {}\n",
            snapshot.requests_total
        ));
        out.push_str(&format!(
            "relay_adapter_requests_successful{{adapter=\"{adapter}\"}} {}\n",
            snapshot.requests_successful
        ));
        out.push_str(&format!(
            "relay_adapter_requests_failed{{adapter=\"{adapter}\"}} {}\n",
            snapshot.requests_failed
        ));
        out.push_str(&format!(
            "relay_adapter_latency_ms_sum{{adapter=\"{adapter}\"}} {}\n",
            snapshot.latency.sum_ms
        ));
    }

    out.push_str(&format!("relay_pool_scale_events_total {}\n", pool.scale_events));
    out.push_str(&format!(
        "relay_pool_overload_rejections_total {}\n",
        pool.overload_rejections
    ));
    out.push_str(&format!("relay_pool_worker_crashes_total {}\n", pool.worker_crashes));
    out.push_str(&format!(
        "relay_pool_queue_wait_ms_sum {}\n",
        pool.queue_wait.sum_ms
    ));
    out.push_str(&format!(
        "relay_pool_queue_wait_ms_count {}\n",
        pool.queue_wait.count
    ));
    out.push_str(&format!(
        "relay_pool_worker_startup_ms_sum {}\n",
        pool.worker_startup.sum_ms
    ));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::MetricsCollector;
    use relay_pool::PoolMetricsCollector;

    #[test]
    fn rendered_text_contains_core_counters() {
        let router_metrics = MetricsCollector::new();
        router_metrics.record_request("local-echo", true, 12);
        let pool_metrics = PoolMetricsCollector::new();
        pool_metrics.record_scale_event();

        let text = render_prometheus(
            &router_metrics.snapshot(),
            &pool_metrics.snapshot(),
            Duration::from_secs(5),
        );
        assert!(text.contains("relay_requests_total 1"));
        assert!(text.contains("relay_pool_scale_events_total 1"));
        assert!(text.contains("adapter=\"local-echo\""));
    }
}
