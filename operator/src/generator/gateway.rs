use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::{
    core::v1::{Pod, Service},
    networking::v1::Ingress,
};
use kube::{
    api::{DeleteParams, ListParams, PostParams},
    Api, Client,
};
use serde::de::DeserializeOwned;

/// Cluster operations needed to manage load generators.
///
/// Every method targets the namespace the gateway was built for. Deleting an object that is
/// already gone succeeds.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Create a pod.
    async fn create_pod(&self, pod: Pod) -> Result<Pod, kube::Error>;
    /// Fetch a pod by name.
    async fn get_pod(&self, name: &str) -> Result<Pod, kube::Error>;
    /// List pods matching a label selector.
    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>, kube::Error>;
    /// Delete a pod by name.
    async fn delete_pod(&self, name: &str) -> Result<(), kube::Error>;
    /// Delete all pods matching a label selector.
    async fn delete_pods(&self, selector: &str) -> Result<(), kube::Error>;

    /// Create a service.
    async fn create_service(&self, service: Service) -> Result<Service, kube::Error>;
    /// Fetch a service by name.
    async fn get_service(&self, name: &str) -> Result<Service, kube::Error>;
    /// List services matching a label selector.
    async fn list_services(&self, selector: &str) -> Result<Vec<Service>, kube::Error>;
    /// Delete a service by name.
    async fn delete_service(&self, name: &str) -> Result<(), kube::Error>;

    /// Create an ingress.
    async fn create_ingress(&self, ingress: Ingress) -> Result<Ingress, kube::Error>;
    /// Delete an ingress by name.
    async fn delete_ingress(&self, name: &str) -> Result<(), kube::Error>;
    /// Delete all ingresses matching a label selector.
    async fn delete_ingresses(&self, selector: &str) -> Result<(), kube::Error>;
}

/// [`ClusterGateway`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeGateway {
    pods: Api<Pod>,
    services: Api<Service>,
    ingresses: Api<Ingress>,
}

impl KubeGateway {
    /// Gateway scoped to `namespace`.
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            pods: Api::namespaced(client.clone(), namespace),
            services: Api::namespaced(client.clone(), namespace),
            ingresses: Api::namespaced(client, namespace),
        }
    }
}

async fn list<K>(api: &Api<K>, selector: &str) -> Result<Vec<K>, kube::Error>
where
    K: Clone + DeserializeOwned + Debug,
{
    Ok(api
        .list(&ListParams::default().labels(selector))
        .await?
        .items)
}

async fn delete<K>(api: &Api<K>, name: &str) -> Result<(), kube::Error>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(err)) if err.reason == "NotFound" => Ok(()),
        Err(e) => Err(e),
    }
}

async fn delete_collection<K>(api: &Api<K>, selector: &str) -> Result<(), kube::Error>
where
    K: Clone + DeserializeOwned + Debug,
{
    api.delete_collection(
        &DeleteParams::default(),
        &ListParams::default().labels(selector),
    )
    .await?;
    Ok(())
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn create_pod(&self, pod: Pod) -> Result<Pod, kube::Error> {
        self.pods.create(&PostParams::default(), &pod).await
    }

    async fn get_pod(&self, name: &str) -> Result<Pod, kube::Error> {
        self.pods.get(name).await
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>, kube::Error> {
        list(&self.pods, selector).await
    }

    async fn delete_pod(&self, name: &str) -> Result<(), kube::Error> {
        delete(&self.pods, name).await
    }

    async fn delete_pods(&self, selector: &str) -> Result<(), kube::Error> {
        delete_collection(&self.pods, selector).await
    }

    async fn create_service(&self, service: Service) -> Result<Service, kube::Error> {
        self.services.create(&PostParams::default(), &service).await
    }

    async fn get_service(&self, name: &str) -> Result<Service, kube::Error> {
        self.services.get(name).await
    }

    async fn list_services(&self, selector: &str) -> Result<Vec<Service>, kube::Error> {
        list(&self.services, selector).await
    }

    async fn delete_service(&self, name: &str) -> Result<(), kube::Error> {
        delete(&self.services, name).await
    }

    async fn create_ingress(&self, ingress: Ingress) -> Result<Ingress, kube::Error> {
        self.ingresses.create(&PostParams::default(), &ingress).await
    }

    async fn delete_ingress(&self, name: &str) -> Result<(), kube::Error> {
        delete(&self.ingresses, name).await
    }

    async fn delete_ingresses(&self, selector: &str) -> Result<(), kube::Error> {
        delete_collection(&self.ingresses, selector).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use kube::api::ObjectMeta;
    use serde_json::json;

    use crate::utils::test::timeout_after_1s;

    fn named_pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_pod_posts_to_namespace() {
        let (gateway, mut fakeserver) = KubeGateway::test();
        let mocksrv = tokio::spawn(async move {
            fakeserver
                .handle_create(|request| {
                    assert_eq!(request.method, "POST");
                    assert!(request.uri.starts_with("/api/v1/namespaces/test/pods"));
                    let body = request.body.as_ref().unwrap();
                    assert_eq!(body["metadata"]["name"], "lg-1");
                })
                .await
                .unwrap();
        });
        let pod = gateway.create_pod(named_pod("lg-1")).await.unwrap();
        assert_eq!(pod.metadata.name.as_deref(), Some("lg-1"));
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn create_ingress_uses_networking_group() {
        let (gateway, mut fakeserver) = KubeGateway::test();
        let mocksrv = tokio::spawn(async move {
            fakeserver
                .handle_create(|request| {
                    assert!(request
                        .uri
                        .starts_with("/apis/networking.k8s.io/v1/namespaces/test/ingresses"));
                })
                .await
                .unwrap();
        });
        let ingress = Ingress {
            metadata: ObjectMeta {
                name: Some("lg-1".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        };
        gateway.create_ingress(ingress).await.unwrap();
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn list_pods_filters_by_selector() {
        let (gateway, mut fakeserver) = KubeGateway::test();
        let mocksrv = tokio::spawn(async move {
            let list = json!({
                "apiVersion": "v1",
                "kind": "PodList",
                "metadata": {},
                "items": [named_pod("lg-1"), named_pod("lg-2")],
            });
            fakeserver
                .handle_request_response(
                    |request| {
                        assert_eq!(request.method, "GET");
                        assert!(request.uri.starts_with("/api/v1/namespaces/test/pods"));
                        assert!(request.uri.contains("labelSelector=load-generator"));
                    },
                    Some(&list),
                )
                .await
                .unwrap();
        });
        let pods = gateway.list_pods("load-generator").await.unwrap();
        let names: Vec<_> = pods
            .iter()
            .filter_map(|pod| pod.metadata.name.as_deref())
            .collect();
        assert_eq!(names, vec!["lg-1", "lg-2"]);
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn delete_missing_service_succeeds() {
        let (gateway, mut fakeserver) = KubeGateway::test();
        let mocksrv = tokio::spawn(async move {
            fakeserver
                .handle_request_response(
                    |request| {
                        assert_eq!(request.method, "DELETE");
                        assert!(request
                            .uri
                            .starts_with("/api/v1/namespaces/test/services/lg-1"));
                    },
                    None::<&serde_json::Value>,
                )
                .await
                .unwrap();
        });
        gateway.delete_service("lg-1").await.unwrap();
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn delete_reports_other_failures() {
        let (gateway, mut fakeserver) = KubeGateway::test();
        let mocksrv = tokio::spawn(async move {
            let request = fakeserver.handle_error(403, "Forbidden").await.unwrap();
            assert!(request.uri.starts_with("/api/v1/namespaces/test/pods/lg-1"));
        });
        let err = gateway.delete_pod("lg-1").await.unwrap_err();
        assert!(matches!(err, kube::Error::Api(ref response) if response.code == 403));
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn delete_pods_removes_collection() {
        let (gateway, mut fakeserver) = KubeGateway::test();
        let mocksrv = tokio::spawn(async move {
            let list = json!({
                "apiVersion": "v1",
                "kind": "PodList",
                "metadata": {},
                "items": [],
            });
            fakeserver
                .handle_request_response(
                    |request| {
                        assert_eq!(request.method, "DELETE");
                        assert!(request.uri.starts_with("/api/v1/namespaces/test/pods?"));
                        assert!(request.uri.contains("labelSelector=load-generator"));
                    },
                    Some(&list),
                )
                .await
                .unwrap();
        });
        gateway.delete_pods("load-generator").await.unwrap();
        timeout_after_1s(mocksrv).await;
    }
}
