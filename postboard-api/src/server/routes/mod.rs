use crate::server::ServerRouter;

mod health;
mod metrics;
mod posts;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .merge(health::routes())
        .merge(posts::routes())
        .merge(metrics::routes())
}
