//! A `WorkerHandle` backed by an HTTP endpoint, so `register-worker
//! <spec>` (§6) can point the registry at an out-of-process worker
//! reached over plain JSON/HTTP rather than an in-process trait object.

use async_trait::async_trait;
use hookbridge_protocol::{HookEvent, ProtocolError};
use hookbridge_registry::WorkerHandle;
use serde::Deserialize;
use serde_json::Value;

/// The registration payload for `POST /admin/workers`, mirroring
/// `WorkerDef` plus the HTTP endpoints this handle calls.
#[derive(Debug, Deserialize)]
pub struct WorkerRegistrationSpec {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    pub failover_policy: hookbridge_protocol::FailoverPolicy,
    #[serde(default)]
    pub fallback_worker: Option<String>,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    pub budget: hookbridge_protocol::WorkerBudget,
    pub invoke_url: String,
    #[serde(default)]
    pub probe_url: Option<String>,
}

fn default_kind() -> String {
    "http".to_string()
}
fn default_version() -> String {
    "1.0.0".to_string()
}
fn default_probe_interval_ms() -> u64 {
    5_000
}
fn default_failure_threshold() -> u32 {
    5
}

pub struct HttpWorkerHandle {
    client: reqwest::Client,
    invoke_url: String,
    probe_url: Option<String>,
}

impl HttpWorkerHandle {
    pub fn new(invoke_url: String, probe_url: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), invoke_url, probe_url }
    }
}

#[async_trait]
impl WorkerHandle for HttpWorkerHandle {
    async fn invoke(&self, event: &HookEvent) -> Result<Value, ProtocolError> {
        let response = self
            .client
            .post(&self.invoke_url)
            .json(event)
            .send()
            .await
            .map_err(|e| ProtocolError::WorkerError { worker: self.invoke_url.clone(), message: e.to_string() })?;

        if !response.status().is_success() {
            return Err(ProtocolError::WorkerError {
                worker: self.invoke_url.clone(),
                message: format!("http status {}", response.status()),
            });
        }

        response
            .json()
            .await
            .map_err(|e| ProtocolError::WorkerError { worker: self.invoke_url.clone(), message: e.to_string() })
    }

    async fn probe(&self) -> bool {
        let Some(url) = &self.probe_url else {
            return true;
        };
        self.client.get(url).send().await.map(|r| r.status().is_success()).unwrap_or(false)
    }
}
