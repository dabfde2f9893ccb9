use crate::{
    observability::metrics::Metrics,
    server::{ServerState, SharedStore, app},
};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use postboard_store::{
    id::SequentialIdAllocator,
    store::{MemoryStore, PostStore},
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::ServiceExt;

/// The application over its own store. Each test passes a distinct metrics
/// namespace, since the recorder is shared by the whole process.
pub struct TestApp {
    router: Router,
}

impl TestApp {
    pub fn new(namespace: &str) -> Self {
        Self::with_store(
            namespace,
            MemoryStore::seeded(Box::new(SequentialIdAllocator::default())),
        )
    }

    pub fn empty(namespace: &str) -> Self {
        Self::with_store(
            namespace,
            MemoryStore::new(Box::new(SequentialIdAllocator::default())),
        )
    }

    fn with_store(namespace: &str, store: impl PostStore + 'static) -> Self {
        let store: SharedStore = Arc::new(RwLock::new(store));
        let metrics = Arc::new(Metrics::install(namespace).unwrap());

        Self {
            router: app(ServerState { store, metrics }),
        }
    }

    pub async fn raw_request(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn raw(&self, method: Method, uri: &str) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();

        self.raw_request(request).await
    }

    pub async fn send(&self, method: Method, uri: &str) -> (StatusCode, Value) {
        Self::into_json(self.raw(method, uri).await).await
    }

    pub async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn into_json(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let text = Self::body_text(response).await;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap()
        };

        (status, body)
    }
}

pub async fn send_json(
    app: &TestApp,
    method: Method,
    uri: &str,
    body: &Value,
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    TestApp::into_json(app.raw_request(request).await).await
}
