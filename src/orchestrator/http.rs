use crate::actor;
use crate::orchestrator::ClusterOrchestrator;
use act_zero::{Actor, ActorError, ActorResult, Addr, Produces};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{error, info};
use url::Url;

#[derive(Debug, Serialize)]
struct ScaleRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_replicas: Option<u32>,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    pod_name: &'a str,
}

/// Talks to the cluster-orchestration endpoint over HTTP. Anything but a
/// 200 counts as failure and is only logged; the caller gets `false`.
pub struct HttpOrchestrator {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpOrchestrator {
    pub fn new(address: &str) -> anyhow::Result<Self> {
        Ok(Self {
            http_client: reqwest::Client::new(),
            base_url: Url::parse(address)?,
        })
    }

    async fn post<T: Serialize + std::fmt::Debug>(&self, path: &str, body: &T) -> bool {
        let url = match self.base_url.join(path) {
            Ok(url) => url,
            Err(e) => {
                error!("Invalid orchestration url for {}: {:?}", path, e);
                return false;
            }
        };

        info!("Sending orchestration request {} {:?}", path, body);

        match self.http_client.post(url).json(body).send().await {
            Ok(response) if response.status() == StatusCode::OK => {
                info!("Orchestration request {} succeeded", path);
                true
            }
            Ok(response) => {
                error!(
                    "Orchestration request {} failed with status {}",
                    path,
                    response.status()
                );
                false
            }
            Err(e) => {
                error!("Orchestration request {} failed: {:?}", path, e);
                false
            }
        }
    }
}

#[async_trait]
impl Actor for HttpOrchestrator {
    #[tracing::instrument(name = "HttpOrchestrator::started", skip(self, _addr))]
    async fn started(&mut self, _addr: Addr<Self>) -> ActorResult<()>
    where
        Self: Sized,
    {
        info!("Started");

        Produces::ok(())
    }

    async fn error(&mut self, error: ActorError) -> bool {
        actor::handle_error(error)
    }
}

#[async_trait]
impl ClusterOrchestrator for HttpOrchestrator {
    #[tracing::instrument(name = "HttpOrchestrator::scale_up", skip(self))]
    async fn scale_up(&mut self, replicas: Option<u32>) -> ActorResult<bool> {
        Produces::ok(
            self.post(
                "scale_up",
                &ScaleRequest {
                    num_replicas: replicas,
                },
            )
            .await,
        )
    }

    #[tracing::instrument(name = "HttpOrchestrator::delete_server", skip(self))]
    async fn delete_server(&mut self, name: String) -> ActorResult<bool> {
        Produces::ok(self.post("delete_pod", &DeleteRequest { pod_name: &name }).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scale_request_omits_the_replica_count_by_default() {
        let body = serde_json::to_value(&ScaleRequest { num_replicas: None }).unwrap();
        assert_eq!(json!({}), body);

        let body = serde_json::to_value(&ScaleRequest {
            num_replicas: Some(3),
        })
        .unwrap();
        assert_eq!(json!({ "num_replicas": 3 }), body);
    }

    #[test]
    fn delete_request_names_the_pod() {
        let body = serde_json::to_value(&DeleteRequest { pod_name: "alpha" }).unwrap();
        assert_eq!(json!({ "pod_name": "alpha" }), body);
    }

    #[test]
    fn endpoint_paths_resolve_against_the_base_url() {
        let orchestrator = HttpOrchestrator::new("http://k8s-master:8080/").unwrap();
        assert_eq!(
            "http://k8s-master:8080/scale_up",
            orchestrator.base_url.join("scale_up").unwrap().as_str()
        );
    }
}
