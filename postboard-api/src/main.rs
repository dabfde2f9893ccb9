use observability::{
    access::ACCESS_LOG_TARGET,
    loki::{self, LokiLayer, LokiPusher},
    metrics::{Metrics, run_upkeep},
};
use postboard_store::{
    id::{IdAllocator, RandomIdAllocator, SequentialIdAllocator},
    store::MemoryStore,
};
use serde::Deserialize;
use server::{ServerState, SharedStore};
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

mod observability;
mod server;

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("Error parsing Loki endpoint: {0}")]
    LokiEndpoint(#[from] url::ParseError),
    #[error("Error installing metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
enum IdAllocation {
    #[default]
    Random,
    Sequential,
}

impl IdAllocation {
    fn allocator(self) -> Box<dyn IdAllocator> {
        match self {
            IdAllocation::Random => Box::new(RandomIdAllocator::new()),
            IdAllocation::Sequential => Box::new(SequentialIdAllocator::default()),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    loki_endpoint: Option<String>,
    #[serde(default = "default_log_application")]
    log_application: String,
    #[serde(default = "default_metrics_namespace")]
    metrics_namespace: String,
    #[serde(default)]
    id_allocation: IdAllocation,
    #[serde(default = "default_seed_posts")]
    seed_posts: bool,
}

fn default_log_application() -> String {
    "postboard".to_owned()
}

fn default_metrics_namespace() -> String {
    "fastapi".to_owned()
}

fn default_seed_posts() -> bool {
    true
}

impl Env {
    fn loki_endpoint(&self) -> Result<Option<Url>, InitError> {
        self.loki_endpoint
            .as_deref()
            .filter(|endpoint| !endpoint.is_empty())
            .map(Url::parse)
            .transpose()
            .map_err(InitError::from)
    }

    fn store(&self) -> SharedStore {
        let id_allocator = self.id_allocation.allocator();
        let store = if self.seed_posts {
            MemoryStore::seeded(id_allocator)
        } else {
            MemoryStore::new(id_allocator)
        };

        Arc::new(RwLock::new(store))
    }
}

fn install_tracing(loki_layer: Option<LokiLayer>) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "postboard_api=debug,\
                postboard_store=debug,\
                postboard_common=debug,\
                tower_http=debug,axum::rejection=trace"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(loki_layer)
        .init();
}

/// Loads `.env` if there is one. Returns whether a file was found.
fn load_dotenv() -> Result<bool, InitError> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(true),
        Err(e) if e.not_found() => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn cancel_on_ctrl_c(shutdown: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Could not listen for ctrl-c");
        return;
    }

    info!("Shutting down");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    let dotenv_found = load_dotenv()?;
    let env: Env = envy::from_env()?;
    let shutdown = CancellationToken::new();

    let (loki_layer, loki_task) = env
        .loki_endpoint()?
        .map(|endpoint| {
            let (layer, lines) = LokiLayer::new(ACCESS_LOG_TARGET, loki::CHANNEL_CAPACITY);
            let pusher = LokiPusher::new(endpoint, env.log_application.clone());
            (layer, tokio::spawn(pusher.run(lines, shutdown.clone())))
        })
        .unzip();
    install_tracing(loki_layer);

    if !dotenv_found {
        debug!("No .dotenv file found");
    }
    if loki_task.is_none() {
        debug!("No Loki endpoint configured, access logs stay local");
    }

    let metrics = Arc::new(Metrics::install(&env.metrics_namespace)?);
    tokio::spawn(run_upkeep(metrics.clone(), shutdown.clone()));

    let state = ServerState {
        store: env.store(),
        metrics,
    };
    let app = server::app(state);

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");

    tokio::spawn(cancel_on_ctrl_c(shutdown.clone()));
    let server_shutdown = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
    .await
    .map_err(InitError::TcpServe)?;

    shutdown.cancel();
    if let Some(task) = loki_task
        && let Err(err) = task.await
    {
        warn!(error = %err, "Log shipping task failed");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{Env, IdAllocation};
    use std::net::{IpAddr, Ipv4Addr};

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|&(key, value)| (key.to_owned(), value.to_owned()))
            .collect()
    }

    #[test]
    fn env_defaults() {
        let env: Env =
            envy::from_iter(vars(&[("SERVER_ADDRESS", "127.0.0.1"), ("SERVER_PORT", "8000")]))
                .unwrap();

        assert_eq!(env.server_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(env.server_port, 8000);
        assert_eq!(env.loki_endpoint().unwrap(), None);
        assert_eq!(env.log_application, "postboard");
        assert_eq!(env.metrics_namespace, "fastapi");
        assert_eq!(env.id_allocation, IdAllocation::Random);
        assert!(env.seed_posts);
    }

    #[test]
    fn env_overrides() {
        let env: Env = envy::from_iter(vars(&[
            ("SERVER_ADDRESS", "0.0.0.0"),
            ("SERVER_PORT", "3000"),
            ("LOKI_ENDPOINT", "http://loki:3100/loki/api/v1/push"),
            ("LOG_APPLICATION", "board"),
            ("METRICS_NAMESPACE", "board"),
            ("ID_ALLOCATION", "sequential"),
            ("SEED_POSTS", "false"),
        ]))
        .unwrap();

        assert_eq!(
            env.loki_endpoint().unwrap().unwrap().as_str(),
            "http://loki:3100/loki/api/v1/push"
        );
        assert_eq!(env.id_allocation, IdAllocation::Sequential);
        assert!(!env.seed_posts);
    }

    #[test]
    fn empty_loki_endpoint_disables_shipping() {
        let env: Env = envy::from_iter(vars(&[
            ("SERVER_ADDRESS", "0.0.0.0"),
            ("SERVER_PORT", "3000"),
            ("LOKI_ENDPOINT", ""),
        ]))
        .unwrap();

        assert_eq!(env.loki_endpoint().unwrap(), None);
    }

    #[test]
    fn invalid_loki_endpoint_is_an_error() {
        let env: Env = envy::from_iter(vars(&[
            ("SERVER_ADDRESS", "0.0.0.0"),
            ("SERVER_PORT", "3000"),
            ("LOKI_ENDPOINT", "not a url"),
        ]))
        .unwrap();

        assert!(env.loki_endpoint().is_err());
    }

    #[tokio::test]
    async fn seeded_store_follows_config() {
        let env: Env = envy::from_iter(vars(&[
            ("SERVER_ADDRESS", "0.0.0.0"),
            ("SERVER_PORT", "3000"),
            ("SEED_POSTS", "false"),
        ]))
        .unwrap();

        assert!(env.store().read().await.list_all().is_empty());
    }
}
