use crate::observability::{access::log_access, metrics::Metrics, metrics::track_requests};
use axum::{
    Router,
    extract::{
        FromRef, Request,
        rejection::{JsonRejection, PathRejection},
    },
    http::{Method, StatusCode, Uri},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
};
use json::{Detail, Json};
use postboard_common::model::{Id, post::PostMarker};
use postboard_store::store::{PostStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

mod json;
mod routes;
#[cfg(test)]
pub mod test_util;

pub type ServerRouter = Router<ServerState>;

/// The post store shared between requests. Index lookups and the mutation that uses
/// the index happen under one write guard.
pub type SharedStore = Arc<RwLock<dyn PostStore>>;

#[derive(Clone, FromRef)]
pub struct ServerState {
    pub store: SharedStore,
    pub metrics: Arc<Metrics>,
}

pub fn routes() -> ServerRouter {
    routes::routes()
        .method_not_allowed_fallback(method_not_allowed)
        .fallback(fallback)
}

/// The full application: routes, request metrics, access log and tracing spans.
pub fn app(state: ServerState) -> Router {
    routes()
        .layer(from_fn_with_state(state.metrics.clone(), track_requests))
        .layer(from_fn(log_access))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub async fn method_not_allowed(method: Method) -> ServerError {
    ServerError::MethodNotAllowed(method)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Method {0} not allowed on this route")]
    MethodNotAllowed(Method),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Incoming JSON rejected: {0}")]
    JsonRejection(#[from] JsonRejection),
    #[error("JSON response could not be serialized: {0}")]
    JsonResponse(#[from] serde_json::Error),
    #[error("Post with ID {0} not found")]
    PostByIdNotFound(Id<PostMarker>),
    #[error("Post with ID {0} does not exist")]
    PostByIdMissing(Id<PostMarker>),
    #[error("No posts available")]
    NoPosts,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_)
            | ServerError::PostByIdNotFound(_)
            | ServerError::PostByIdMissing(_)
            | ServerError::NoPosts => StatusCode::NOT_FOUND,
            ServerError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ServerError::PathRejection(_) | ServerError::JsonRejection(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServerError::JsonResponse(_) | ServerError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The message shown to the client.
    pub fn detail(&self) -> String {
        match self {
            ServerError::UnknownRoute(_) => "Not Found".to_owned(),
            ServerError::MethodNotAllowed(_) => "Method Not Allowed".to_owned(),
            ServerError::PathRejection(rejection) => rejection.body_text(),
            ServerError::JsonRejection(rejection) => rejection.body_text(),
            ServerError::JsonResponse(_) | ServerError::Store(_) => {
                "Internal Server Error".to_owned()
            }
            ServerError::PostByIdNotFound(_)
            | ServerError::PostByIdMissing(_)
            | ServerError::NoPosts => self.to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!(error = %self, %status, "Replying with error");
        } else {
            debug!(error = %self, %status, "Replying with error");
        }

        let error_response = Detail {
            detail: self.detail(),
        };
        (status, Json(error_response)).into_response()
    }
}
