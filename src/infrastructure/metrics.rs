// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::MetricsSettings;
use metrics::describe_counter;
use metrics::describe_gauge;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{info, warn};

/// 安装 Prometheus 导出器
///
/// 地址无效或端口被占用时只告警，流水线照常运行
pub fn init_metrics(settings: &MetricsSettings) {
    if !settings.enabled {
        info!("Metrics exporter disabled");
        return;
    }

    let addr: SocketAddr = match settings.listen_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(addr = %settings.listen_addr, error = %e, "Invalid metrics listen address");
            return;
        }
    };

    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        warn!(
            "Failed to install Prometheus recorder: {}. This might happen if the port is already in use.",
            e
        );
        return;
    }

    describe_metrics();
    info!("Metrics exporter listening on {}", addr);
}

fn describe_metrics() {
    describe_counter!("crawl_targets_total", "Crawl targets by final outcome");
    describe_counter!("bus_publish_total", "Bus publish attempts by mode and result");
    describe_counter!("bus_fallback_total", "Events delivered directly after a failed publish");
    describe_counter!("dedup_decisions_total", "Dedup decisions by kind");
    describe_counter!(
        "dedup_commit_failures_total",
        "Accepted or updated records whose downstream commit failed"
    );
    describe_gauge!("dedup_window_size", "Records accepted or updated within the window");
    describe_gauge!("rate_limiter_effective_rpm", "Current effective requests per minute");
    describe_counter!("rate_limiter_throttled_total", "Throttling responses from the external service");
    describe_gauge!("circuit_breaker_status", "Breaker state: 0 closed, 0.5 half-open, 1 open");
    describe_counter!("circuit_breaker_failures_total", "Failures recorded by each breaker");
    describe_counter!("circuit_breaker_rejected_total", "Calls skipped while a breaker is open");
}
