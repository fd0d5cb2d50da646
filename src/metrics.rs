//! Prometheus metrics for the HTTP front-end.

use crate::{errors::LookupError, query::QueryKind};
use ::metrics::{counter, describe_counter, describe_histogram, histogram};
use axum::{http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::{sync::OnceLock, time::Duration};
use tracing::{info, warn};

pub const PROTOCOL_WHOIS: &str = "whois";
pub const PROTOCOL_RDAP: &str = "rdap";

const REQUESTS_TOTAL: &str = "whodat_requests_total";
const ERRORS_TOTAL: &str = "whodat_errors_total";
const REQUEST_DURATION: &str = "whodat_request_duration_seconds";

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global recorder. Safe to call more than once; only the first call installs.
pub fn init_metrics() {
    if PROMETHEUS_HANDLE.get().is_some() {
        return;
    }

    let handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Failed to install Prometheus recorder: {}", e);
            return;
        }
    };

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        return;
    }

    describe_counter!(REQUESTS_TOTAL, "Lookups served, by protocol and query kind");
    describe_counter!(ERRORS_TOTAL, "Failed lookups, by protocol and error type");
    describe_histogram!(REQUEST_DURATION, "Lookup latency in seconds");

    // Zero-initialize so every series is scrapeable before the first lookup.
    for protocol in [PROTOCOL_WHOIS, PROTOCOL_RDAP] {
        for kind in [QueryKind::Domain, QueryKind::Ip, QueryKind::Asn] {
            counter!(REQUESTS_TOTAL, "protocol" => protocol, "kind" => kind.as_str()).absolute(0);
        }
    }

    info!("Prometheus metrics recorder installed");
}

pub fn increment_requests(protocol: &'static str, kind: QueryKind) {
    counter!(REQUESTS_TOTAL, "protocol" => protocol, "kind" => kind.as_str()).increment(1);
}

pub fn increment_errors(protocol: &'static str, error: &LookupError) {
    counter!(ERRORS_TOTAL, "protocol" => protocol, "error_type" => error.kind_label()).increment(1);
}

pub fn record_duration(protocol: &'static str, elapsed: Duration) {
    histogram!(REQUEST_DURATION, "protocol" => protocol).record(elapsed.as_secs_f64());
}

pub async fn metrics_handler() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics recorder not initialized".to_string(),
        ),
    }
}
