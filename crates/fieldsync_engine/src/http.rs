//! HTTP transport implementation.
//!
//! This module provides an HTTP-based transport for the sync engine.
//! The actual HTTP client is abstracted via a trait to allow different
//! implementations (reqwest, hyper, a host `fetch` bridge, etc.).

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use async_trait::async_trait;
use fieldsync_protocol::{EntityId, FlushRequest};

/// A response from the HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. Return
/// `Err` only when no response was received at all.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST with a JSON body and returns the response.
    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String>;
}

/// HTTP-based sync transport.
///
/// Posts `{ "updates": [...] }` as JSON to the entity's endpoint. Any 2xx
/// status is success; every other status and every client error is a
/// failure.
pub struct HttpTransport<C: HttpClient> {
    config: SyncConfig,
    client: C,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport for an endpoint template.
    pub fn new(endpoint: impl Into<String>, client: C) -> Self {
        Self::from_config(&SyncConfig::new(endpoint), client)
    }

    /// Creates a transport using the endpoint from `config`.
    pub fn from_config(config: &SyncConfig, client: C) -> Self {
        Self {
            config: config.clone(),
            client,
        }
    }

    /// Returns the endpoint template.
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

#[async_trait]
impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    async fn flush(&self, entity: &EntityId, request: &FlushRequest) -> SyncResult<()> {
        let body = request.encode()?;
        let url = self.config.endpoint_for(entity);

        match self.client.post_json(&url, body).await {
            Ok(response) if response.is_success() => Ok(()),
            Ok(response) => Err(SyncError::Http {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            }),
            Err(e) => Err(SyncError::transport(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_protocol::MutationRecord;
    use parking_lot::Mutex;

    struct TestClient {
        response: Mutex<Result<HttpResponse, String>>,
        seen: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl TestClient {
        fn new(response: Result<HttpResponse, String>) -> Self {
            Self {
                response: Mutex::new(response),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HttpClient for TestClient {
        async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String> {
            self.seen.lock().push((url.to_string(), body));
            self.response.lock().clone()
        }
    }

    fn request() -> (EntityId, FlushRequest) {
        (
            EntityId::new("J1").unwrap(),
            FlushRequest::new(vec![MutationRecord::new("status", "in_progress", 5)]),
        )
    }

    #[tokio::test]
    async fn posts_updates_to_entity_endpoint() {
        let client = TestClient::new(Ok(HttpResponse::new(204, Vec::new())));
        let transport = HttpTransport::new("https://erp.example.com/jobs/{entity_id}/sync", client);

        let (job, req) = request();
        transport.flush(&job, &req).await.unwrap();

        let seen = transport.client.seen.lock();
        assert_eq!(seen[0].0, "https://erp.example.com/jobs/J1/sync");
        let body: serde_json::Value = serde_json::from_slice(&seen[0].1).unwrap();
        assert_eq!(body["updates"][0]["field"], "status");
    }

    #[tokio::test]
    async fn non_2xx_is_failure() {
        let client = TestClient::new(Ok(HttpResponse::new(409, "stale")));
        let transport = HttpTransport::new("https://erp.example.com/{entity_id}", client);

        let (job, req) = request();
        let err = transport.flush(&job, &req).await.unwrap_err();
        assert!(matches!(err, SyncError::Http { status: 409, ref body } if body == "stale"));
        assert!(err.to_string().contains("409"));
    }

    #[tokio::test]
    async fn client_error_is_transport_failure() {
        let client = TestClient::new(Err("dns lookup failed".into()));
        let transport = HttpTransport::new("https://erp.example.com/{entity_id}", client);

        let (job, req) = request();
        let err = transport.flush(&job, &req).await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(ref m) if m == "dns lookup failed"));
    }

    #[test]
    fn success_range() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(HttpResponse::new(299, "").is_success());
        assert!(!HttpResponse::new(304, "").is_success());
        assert!(!HttpResponse::new(199, "").is_success());
    }
}
