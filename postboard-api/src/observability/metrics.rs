//! Request counters and latency histograms, exposed in the Prometheus text format.
//!
//! # Metrics
//! - `<ns>_request_count` (counter): requests by method, handler and status
//! - `<ns>_request_latency_seconds` (histogram): latency by method and handler
//! - `<ns>_workload_count` (counter): completed demo workloads

use axum::{
    extract::{MatchedPath, Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::Response,
};
use metrics::{Unit, counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];
pub const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Label used for requests that matched no route.
pub const UNMATCHED_HANDLER: &str = "unmatched";

const LATENCY_SUFFIX: &str = "_request_latency_seconds";

// The recorder is process-global and can only be installed once.
static RECORDER: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

fn recorder_handle() -> Result<PrometheusHandle, BuildError> {
    let mut recorder = RECORDER.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = recorder.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Suffix(LATENCY_SUFFIX.to_owned()), LATENCY_BUCKETS)?
        .install_recorder()?;
    *recorder = Some(handle.clone());

    Ok(handle)
}

pub struct Metrics {
    handle: PrometheusHandle,
    request_count: String,
    request_latency: String,
    workload_count: String,
}

impl Metrics {
    /// Installs the global recorder if needed and registers the metrics under
    /// `namespace`.
    pub fn install(namespace: &str) -> Result<Self, BuildError> {
        let metrics = Self {
            handle: recorder_handle()?,
            request_count: format!("{namespace}_request_count"),
            request_latency: format!("{namespace}{LATENCY_SUFFIX}"),
            workload_count: format!("{namespace}_workload_count"),
        };

        describe_counter!(
            metrics.request_count.clone(),
            Unit::Count,
            "Total number of requests by method, handler and status."
        );
        describe_histogram!(
            metrics.request_latency.clone(),
            Unit::Seconds,
            "Request latency by method and handler."
        );
        describe_counter!(
            metrics.workload_count.clone(),
            Unit::Count,
            "Total number of completed workloads."
        );
        counter!(metrics.workload_count.clone()).absolute(0);

        Ok(metrics)
    }

    pub fn record_request(
        &self,
        method: &Method,
        handler: &str,
        status: StatusCode,
        elapsed: Duration,
    ) {
        let method = method.as_str().to_owned();
        let handler = handler.to_owned();

        counter!(
            self.request_count.clone(),
            "method" => method.clone(),
            "handler" => handler.clone(),
            "status" => status.as_u16().to_string(),
        )
        .increment(1);
        histogram!(
            self.request_latency.clone(),
            "method" => method,
            "handler" => handler,
        )
        .record(elapsed.as_secs_f64());
    }

    pub fn record_workload(&self) {
        counter!(self.workload_count.clone()).increment(1);
    }

    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }

    pub fn run_upkeep(&self) {
        self.handle.run_upkeep();
    }
}

pub async fn track_requests(
    State(metrics): State<Arc<Metrics>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let handler = request
        .extensions()
        .get::<MatchedPath>()
        .map_or(UNMATCHED_HANDLER, MatchedPath::as_str)
        .to_owned();

    let response = next.run(request).await;
    metrics.record_request(&method, &handler, response.status(), start.elapsed());

    response
}

/// Periodically drains histogram buffers until `shutdown` fires.
pub async fn run_upkeep(metrics: Arc<Metrics>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(UPKEEP_INTERVAL);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = interval.tick() => metrics.run_upkeep(),
        }
    }

    debug!("Metrics upkeep stopped");
}
