use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use std::{net::SocketAddr, time::Instant};
use tracing::info;

/// Target of the access log events emitted by [`log_access`].
pub const ACCESS_LOG_TARGET: &str = module_path!();

/// Emits one access log line per request.
pub async fn log_access(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "-".to_owned(), |ConnectInfo(addr)| addr.to_string());
    let method = request.method().clone();
    let uri = request.uri().clone();
    let version = request.version();

    let response = next.run(request).await;
    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    info!(
        target: ACCESS_LOG_TARGET,
        %client,
        %method,
        path = %uri,
        status,
        latency_ms,
        "{client} - \"{method} {uri} {version:?}\" {status}"
    );

    response
}

#[cfg(test)]
mod tests {
    use crate::{
        observability::{access::ACCESS_LOG_TARGET, loki::LokiLayer},
        server::test_util::TestApp,
    };
    use axum::http::{Method, StatusCode};
    use tracing::Level;
    use tracing_subscriber::{Registry, layer::SubscriberExt};

    #[tokio::test(flavor = "current_thread")]
    async fn requests_reach_the_log_layer() {
        let (layer, mut lines) = LokiLayer::new(ACCESS_LOG_TARGET, 8);
        let _guard = tracing::subscriber::set_default(Registry::default().with(layer));
        let app = TestApp::new("access_log");

        let (status, _) = app.send(Method::GET, "/posts").await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.send(Method::GET, "/posts/999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let line = lines.try_recv().unwrap();
        assert_eq!(line.severity, Level::INFO);
        assert_eq!(line.line, "- - \"GET /posts HTTP/1.1\" 200");
        assert_eq!(
            lines.try_recv().unwrap().line,
            "- - \"GET /posts/999 HTTP/1.1\" 404"
        );
        assert!(lines.try_recv().is_err());
    }
}
