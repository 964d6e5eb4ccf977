//! Flush command implementation.

use super::open_store;
use async_trait::async_trait;
use fieldsync_engine::{
    FlushOutcome, HttpClient, HttpResponse, HttpTransport, NetworkMonitor, SyncConfig,
    SyncService,
};
use fieldsync_protocol::EntityId;
use reqwest::header::CONTENT_TYPE;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// [`HttpClient`] backed by `reqwest`.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

/// Runs the flush command.
///
/// Makes one attempt per entity; failed queues are left for the next run.
pub async fn run(
    path: &Path,
    endpoint: &str,
    entity: Option<&str>,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = SyncConfig::new(endpoint).with_request_timeout(timeout);
    let transport = HttpTransport::from_config(&config, ReqwestClient::new(timeout)?);
    // Built offline so referencing an entity does not start a flush of
    // its own; the attempts below are the only ones.
    let network = NetworkMonitor::new(false);
    let service = SyncService::builder(transport)
        .config(config)
        .store(open_store(path)?)
        .network(network.clone())
        .build();

    let outcomes = match entity {
        Some(id) => {
            let id = EntityId::new(id)?;
            let coordinator = service.coordinator(&id).await?;
            network.set_online(true);
            vec![(id, coordinator.attempt_flush().await)]
        }
        None => {
            network.set_online(true);
            service.flush_all().await
        }
    };
    service.dispose();

    let mut failed = 0;
    for (id, outcome) in &outcomes {
        match outcome {
            FlushOutcome::Flushed { count, remaining } => {
                println!("{id}: sent {count} record(s), {remaining} still queued");
            }
            FlushOutcome::Empty => println!("{id}: nothing to send"),
            FlushOutcome::Failed { error, .. } => {
                failed += 1;
                println!("{id}: failed: {error}");
            }
            FlushOutcome::Skipped(reason) => println!("{id}: skipped ({reason:?})"),
        }
    }
    info!(entities = outcomes.len(), failed, "flush finished");

    if failed > 0 {
        return Err(format!("{failed} queue(s) could not be flushed").into());
    }
    Ok(())
}
