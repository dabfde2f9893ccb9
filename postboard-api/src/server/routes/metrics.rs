use crate::{
    observability::metrics::Metrics,
    server::{ServerRouter, json::Json},
};
use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use axum_extra::routing::{RouterExt, TypedPath};
use rand::Rng;
use serde::Serialize;
use std::{ops::RangeInclusive, sync::Arc, time::Duration};
use tracing::debug;

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";
pub const WORKLOAD_MILLIS: RangeInclusive<u64> = 10..=250;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(render_metrics)
        .typed_get(run_workload)
}

#[derive(TypedPath)]
#[typed_path("/metrics")]
struct MetricsPath;

async fn render_metrics(_: MetricsPath, State(metrics): State<Arc<Metrics>>) -> Response {
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], metrics.render()).into_response()
}

#[derive(TypedPath)]
#[typed_path("/workload")]
struct WorkloadPath;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct WorkloadReport {
    status: &'static str,
    duration_ms: u64,
}

/// Simulates a unit of work of random length and counts it.
async fn run_workload(
    _: WorkloadPath,
    State(metrics): State<Arc<Metrics>>,
) -> Json<WorkloadReport> {
    let duration_ms = rand::rng().random_range(WORKLOAD_MILLIS);
    tokio::time::sleep(Duration::from_millis(duration_ms)).await;
    metrics.record_workload();
    debug!(duration_ms, "Workload completed");

    Json(WorkloadReport {
        status: "completed",
        duration_ms,
    })
}
