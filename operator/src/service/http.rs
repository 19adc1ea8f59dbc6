//! JSON over HTTP surface of the dispatch service.
use std::net::SocketAddr;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    generator::{CreationSpec, EnvVar, GeneratorManager, LoadGenerator, Phase, ResourceOverrides},
    service::Service,
    utils::Scope,
    Error,
};

struct AppState<M> {
    service: Service<M>,
    shutdown: CancellationToken,
}

impl<M> Clone for AppState<M> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    #[serde(default)]
    parameters: Vec<CreationParams>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreationParams {
    #[serde(default)]
    image: String,
    #[serde(default)]
    resources: ResourceOverrides,
    #[serde(default)]
    additional_envs: Vec<EnvVar>,
    #[serde(default)]
    commands: Vec<String>,
    #[serde(default)]
    expose_external_ip: bool,
}

impl TryFrom<CreationParams> for CreationSpec {
    type Error = Error;

    fn try_from(params: CreationParams) -> Result<Self, Self::Error> {
        if params.image.is_empty() {
            return Err(Error::InvalidArgument("image is required".to_owned()));
        }
        Ok(CreationSpec {
            image: params.image,
            resources: params.resources,
            env: params.additional_envs,
            commands: params.commands,
            expose_external_ip: params.expose_external_ip,
        })
    }
}

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    #[serde(default)]
    names: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeneratorView {
    name: String,
    cluster_ip: String,
    external_ip: String,
    port: i32,
    status: Phase,
    created_at: String,
}

impl From<LoadGenerator> for GeneratorView {
    fn from(generator: LoadGenerator) -> Self {
        Self {
            name: generator.name,
            cluster_ip: generator.cluster_ip.unwrap_or_default(),
            external_ip: generator.external_ip.unwrap_or_default(),
            port: generator.port.unwrap_or_default(),
            status: generator.status,
            created_at: generator
                .created_at
                .map(|created_at| created_at.to_rfc3339())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeneratorsResponse {
    load_generators: Vec<GeneratorView>,
}

impl From<Vec<LoadGenerator>> for GeneratorsResponse {
    fn from(generators: Vec<LoadGenerator>) -> Self {
        Self {
            load_generators: generators.into_iter().map(GeneratorView::from).collect(),
        }
    }
}

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_invalid_argument() {
            StatusCode::BAD_REQUEST
        } else {
            error!(err = %self.0, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Routes of the load generator API.
///
/// Creations in flight are cancelled with `shutdown`.
pub fn router<M>(service: Service<M>, shutdown: CancellationToken) -> Router
where
    M: GeneratorManager + 'static,
{
    Router::new()
        .route("/v1/hello", get(hello::<M>))
        .route(
            "/v1/generators",
            get(list_generators::<M>).post(create_generators::<M>),
        )
        .route("/v1/generators/delete", post(delete_generators::<M>))
        .route("/v1/generators/clear", post(clear_generators::<M>))
        .with_state(AppState { service, shutdown })
}

/// Serve `router` on every interface until `shutdown` is cancelled.
pub async fn serve(
    router: Router,
    port: u16,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "serving load generator API");
    axum::Server::try_bind(&addr)?
        .serve(router.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn hello<M: GeneratorManager>(
    State(state): State<AppState<M>>,
) -> Json<serde_json::Value> {
    Json(json!({ "hello": state.service.hello() }))
}

async fn create_generators<M: GeneratorManager>(
    State(state): State<AppState<M>>,
    Json(request): Json<CreateRequest>,
) -> Result<Json<GeneratorsResponse>, ApiError> {
    let specs = request
        .parameters
        .into_iter()
        .map(CreationSpec::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    let scope = Scope::new(state.shutdown.child_token());
    let generators = state.service.create_many(&scope, specs).await?;
    Ok(Json(generators.into()))
}

async fn list_generators<M: GeneratorManager>(
    State(state): State<AppState<M>>,
) -> Result<Json<GeneratorsResponse>, ApiError> {
    Ok(Json(state.service.list().await?.into()))
}

async fn delete_generators<M: GeneratorManager>(
    State(state): State<AppState<M>>,
    Json(request): Json<DeleteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.service.delete_many(&request.names).await?;
    Ok(Json(json!({})))
}

async fn clear_generators<M: GeneratorManager>(
    State(state): State<AppState<M>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.service.delete_all().await?;
    Ok(Json(json!({})))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use hyper::Body;
    use k8s_openapi::chrono::{TimeZone, Utc};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::generator::{MockGeneratorManager, ResourceOverride};

    fn app(manager: MockGeneratorManager) -> Router {
        router(Service::new(Arc::new(manager)), CancellationToken::new())
    }

    async fn call(
        app: Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = http::Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn running(name: &str) -> LoadGenerator {
        LoadGenerator {
            name: name.to_owned(),
            cluster_ip: Some("10.0.0.7".to_owned()),
            external_ip: None,
            port: Some(8888),
            status: Phase::Running,
            created_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
        }
    }

    #[tokio::test]
    async fn hello() {
        let (status, body) = call(
            app(MockGeneratorManager::new()),
            "GET",
            "/v1/hello",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "hello": "Hello!" }));
    }

    #[tokio::test]
    async fn create_maps_parameters() {
        let mut manager = MockGeneratorManager::new();
        manager
            .expect_create()
            .withf(|_, spec| {
                *spec
                    == CreationSpec {
                        image: "tank:1.0".to_owned(),
                        resources: ResourceOverrides {
                            cpu: Some(ResourceOverride {
                                limit: Some("4".to_owned()),
                                request: None,
                            }),
                            memory: None,
                        },
                        env: vec![EnvVar {
                            name: "TARGET".to_owned(),
                            value: "http://api".to_owned(),
                        }],
                        commands: vec!["run".to_owned()],
                        expose_external_ip: true,
                    }
            })
            .times(1)
            .returning(|_, _| Ok(running("load-generator-1")));

        let (status, body) = call(
            app(manager),
            "POST",
            "/v1/generators",
            Some(json!({
                "parameters": [{
                    "image": "tank:1.0",
                    "resources": { "cpu": { "limit": "4" } },
                    "additionalEnvs": [{ "name": "TARGET", "value": "http://api" }],
                    "commands": ["run"],
                    "exposeExternalIp": true,
                }]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "loadGenerators": [{
                    "name": "load-generator-1",
                    "clusterIp": "10.0.0.7",
                    "externalIp": "",
                    "port": 8888,
                    "status": "Running",
                    "createdAt": "2024-05-01T12:00:00+00:00",
                }]
            })
        );
    }

    #[tokio::test]
    async fn create_without_image_is_rejected() {
        let mut manager = MockGeneratorManager::new();
        manager.expect_create().never();

        let (status, body) = call(
            app(manager),
            "POST",
            "/v1/generators",
            Some(json!({ "parameters": [{ "commands": ["run"] }] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid argument: image is required");
    }

    #[tokio::test]
    async fn cluster_failures_are_internal_errors() {
        let mut manager = MockGeneratorManager::new();
        manager.expect_list().returning(|| Err(Error::Cancelled));

        let (status, body) = call(app(manager), "GET", "/v1/generators", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "cancelled");
    }

    #[tokio::test]
    async fn list_fills_absent_fields() {
        let mut manager = MockGeneratorManager::new();
        manager.expect_list().returning(|| {
            Ok(vec![LoadGenerator {
                name: "lg-1".to_owned(),
                cluster_ip: None,
                external_ip: None,
                port: None,
                status: Phase::Pending,
                created_at: None,
            }])
        });

        let (status, body) = call(app(manager), "GET", "/v1/generators", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["loadGenerators"][0],
            json!({
                "name": "lg-1",
                "clusterIp": "",
                "externalIp": "",
                "port": 0,
                "status": "Pending",
                "createdAt": "",
            })
        );
    }

    #[tokio::test]
    async fn delete_by_names() {
        let mut manager = MockGeneratorManager::new();
        manager
            .expect_delete()
            .withf(|name| name == "lg-1" || name == "lg-2")
            .times(2)
            .returning(|_| Ok(()));

        let (status, body) = call(
            app(manager),
            "POST",
            "/v1/generators/delete",
            Some(json!({ "names": ["lg-1", "lg-2"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));
    }

    #[tokio::test]
    async fn clear_deletes_everything() {
        let mut manager = MockGeneratorManager::new();
        manager.expect_delete_all().times(1).returning(|| Ok(()));

        let (status, body) = call(app(manager), "POST", "/v1/generators/clear", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));
    }
}
