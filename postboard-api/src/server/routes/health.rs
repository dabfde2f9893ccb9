use crate::server::{ServerRouter, json::Json};
use axum_extra::routing::{RouterExt, TypedPath};
use serde::Serialize;

pub fn routes() -> ServerRouter {
    ServerRouter::new().typed_get(health)
}

#[derive(TypedPath)]
#[typed_path("/")]
struct HealthPath;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct Health {
    status: &'static str,
}

async fn health(_: HealthPath) -> Json<Health> {
    Json(Health { status: "healthy" })
}
