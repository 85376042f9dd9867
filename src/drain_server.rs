//! Operator-facing drain trigger.
//!
//! `POST /start-drain/{server}` asks the registry to evacuate and retire
//! one server: 200 when the drain was accepted, 404 for an unknown server
//! or a refused drain, 405 on a wrong method, 400 when the name is missing.

use crate::strategy::StrategyRegistry;
use act_zero::{call, Addr};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tracing::{error, info};

pub fn router(registry: Addr<StrategyRegistry>) -> Router {
    Router::new()
        .route("/start-drain", post(missing_server_name))
        .route("/start-drain/{server}", post(start_drain))
        .with_state(registry)
}

pub async fn serve(port: u16, registry: Addr<StrategyRegistry>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Drain endpoint listening on 0.0.0.0:{}", port);

    axum::serve(listener, router(registry)).await?;

    Ok(())
}

async fn start_drain(
    State(registry): State<Addr<StrategyRegistry>>,
    Path(server): Path<String>,
) -> (StatusCode, &'static str) {
    info!("Drain requested for server {}", server);

    match call!(registry.start_drain(server)).await {
        Ok(true) => (StatusCode::OK, "OK"),
        Ok(false) => (StatusCode::NOT_FOUND, "Not Found"),
        Err(e) => {
            error!("Drain request failed: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

async fn missing_server_name() -> (StatusCode, &'static str) {
    (StatusCode::BAD_REQUEST, "Bad Request: Missing server name")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::strategy::testkit;
    use act_zero::runtimes::tokio::spawn_actor;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::util::ServiceExt;

    async fn drain_router() -> Router {
        let fleet = testkit::fleet().await;
        testkit::add_server(&fleet, "alpha", 1, Some((10.0, 0))).await;
        testkit::add_server(&fleet, "beta", 0, Some((10.0, 0))).await;

        let registry = spawn_actor(StrategyRegistry::new(
            fleet.ctx.clone(),
            Arc::new(Config::default()),
        ));

        router(registry)
    }

    fn request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn drains_a_known_server() {
        let app = drain_router().await;
        let response = app
            .oneshot(request("POST", "/start-drain/alpha"))
            .await
            .unwrap();

        assert_eq!(StatusCode::OK, response.status());
    }

    #[tokio::test]
    async fn unknown_servers_get_a_404() {
        let app = drain_router().await;
        let response = app
            .oneshot(request("POST", "/start-drain/ghost"))
            .await
            .unwrap();

        assert_eq!(StatusCode::NOT_FOUND, response.status());
    }

    #[tokio::test]
    async fn wrong_methods_get_a_405() {
        let app = drain_router().await;
        let response = app
            .oneshot(request("GET", "/start-drain/alpha"))
            .await
            .unwrap();

        assert_eq!(StatusCode::METHOD_NOT_ALLOWED, response.status());
    }

    #[tokio::test]
    async fn a_missing_name_gets_a_400() {
        let app = drain_router().await;
        let response = app.oneshot(request("POST", "/start-drain")).await.unwrap();

        assert_eq!(StatusCode::BAD_REQUEST, response.status());
    }
}
