//! Helper methods only available for tests

use anyhow::Result;
use hyper::{body::to_bytes, Body};
use k8s_openapi::chrono::{DateTime, Utc};
use kube::{error::ErrorResponse, Client};
use serde::Serialize;

use crate::{generator::KubeGateway, utils::Clock};

pub type ApiServerHandle = tower_test::mock::Handle<http::Request<Body>, http::Response<Body>>;

/// Wraps the mock API server handle and answers one request at a time.
pub struct ApiServerVerifier(ApiServerHandle);

// Add test specific implementation to the gateway
impl KubeGateway {
    /// Create a gateway talking to a mocked API server in the `test` namespace.
    pub fn test() -> (Self, ApiServerVerifier) {
        let (mock_service, handle) =
            tower_test::mock::pair::<http::Request<Body>, http::Response<Body>>();
        let mock_k_client = Client::new(mock_service, "default");
        (
            KubeGateway::new(mock_k_client, "test"),
            ApiServerVerifier(handle),
        )
    }
}

/// Clock stopped at a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub async fn timeout_after_1s(handle: tokio::task::JoinHandle<()>) {
    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("timeout on mock apiserver")
        .expect("stub succeeded")
}

/// Helper struct to assert the contents of a mock Request.
#[derive(Debug)]
pub struct Request {
    pub method: String,
    pub uri: String,
    pub body: Option<serde_json::Value>,
}

impl Request {
    pub async fn from_request(request: http::Request<Body>) -> Result<Self> {
        let method = request.method().to_string();
        let uri = request.uri().to_string();
        let body_bytes = to_bytes(request.into_body()).await?;
        let body = if !body_bytes.is_empty() {
            Some(serde_json::from_slice(&body_bytes)?)
        } else {
            None
        };
        Ok(Self { method, uri, body })
    }
}

impl ApiServerVerifier {
    /// Receive the next request, hand it to `check`, and respond with `response`.
    ///
    /// A `None` response answers with a 404 NotFound status.
    pub async fn handle_request_response<T>(
        &mut self,
        check: impl FnOnce(&Request),
        response: Option<&T>,
    ) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        let (request, send) = self.0.next_request().await.expect("service not called");
        let request = Request::from_request(request).await?;
        check(&request);

        let response = if let Some(response) = response {
            http::Response::builder().body(Body::from(serde_json::to_vec(response)?))?
        } else {
            Self::error_response(404, "NotFound")?
        };
        send.send_response(response);
        Ok(())
    }

    /// Receive the next request and answer it with an API error.
    pub async fn handle_error(&mut self, code: u16, reason: &str) -> Result<Request> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        let request = Request::from_request(request).await?;
        send.send_response(Self::error_response(code, reason)?);
        Ok(request)
    }

    /// Receive the next request and echo its body back as the created object.
    pub async fn handle_create(&mut self, check: impl FnOnce(&Request)) -> Result<()> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        let request = Request::from_request(request).await?;
        check(&request);
        let body = serde_json::to_vec(&request.body)?;
        send.send_response(http::Response::builder().body(Body::from(body))?);
        Ok(())
    }

    fn error_response(code: u16, reason: &str) -> Result<http::Response<Body>> {
        let error = ErrorResponse {
            status: "Failure".to_owned(),
            code,
            message: "stub message".to_owned(),
            reason: reason.to_owned(),
        };
        Ok(http::Response::builder()
            .status(code)
            .body(Body::from(serde_json::to_vec(&error)?))?)
    }
}
