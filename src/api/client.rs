use super::error::TransportError;
use crate::model::{RunState, SuggestionResponse};
use crate::transport::SnapshotFetcher;
use async_trait::async_trait;
use reqwest::Response;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MAX_SCENARIOS: usize = 5;
const MAX_SCENARIOS_LIMIT: usize = 12;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    /// Applied to request/response calls only, never to the live stream.
    pub request_timeout: Duration,
    pub user_agent: String,
    /// Sent as the `client` query parameter when opening a stream.
    pub client_tag: String,
    /// Initial live channel reconnect delay; the server's `retry:` wins.
    pub reconnect_delay: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            request_timeout: Duration::from_secs(15),
            user_agent: format!("run-sync/{}", env!("CARGO_PKG_VERSION")),
            client_tag: "cli".into(),
            reconnect_delay: Duration::from_secs(3),
        }
    }
}

/// HTTP client for the analysis run API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    pub(crate) http: reqwest::Client,
    pub(crate) cfg: ApiConfig,
    base_url: String,
}

impl ApiClient {
    pub fn new(cfg: ApiConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .build()?;
        let base_url = cfg.base_url.trim_end_matches('/').to_string();
        Ok(Self {
            http,
            cfg,
            base_url,
        })
    }

    pub fn run_url(&self, run_id: &str) -> String {
        format!("{}/analysis/runs/{}", self.base_url, run_id)
    }

    pub fn stream_url(&self, run_id: &str) -> String {
        format!(
            "{}/analysis/runs/{}/stream?client={}",
            self.base_url, run_id, self.cfg.client_tag
        )
    }

    pub async fn fetch_run(&self, run_id: &str) -> Result<RunState, TransportError> {
        let url = self.run_url(run_id);
        debug!(%url, "fetching run snapshot");
        let resp = self
            .http
            .get(url)
            .timeout(self.cfg.request_timeout)
            .send()
            .await?;
        handle_response(resp).await
    }

    /// Schedule a scenario run and return its initial state.
    pub async fn submit_run(
        &self,
        scenario_id: &str,
        parameters: Map<String, Value>,
    ) -> Result<RunState, TransportError> {
        let url = format!("{}/analysis/run", self.base_url);
        let body = json!({
            "scenario_id": scenario_id,
            "parameters": parameters,
        });
        debug!(%url, scenario_id, "submitting run");
        let resp = self
            .http
            .post(url)
            .timeout(self.cfg.request_timeout)
            .json(&body)
            .send()
            .await?;
        handle_response(resp).await
    }

    /// Ranked scenario options for a prompt. `max_scenarios` is clamped to 1..=12.
    pub async fn suggest_scenarios(
        &self,
        prompt: &str,
        max_scenarios: usize,
    ) -> Result<SuggestionResponse, TransportError> {
        let url = format!("{}/analysis/suggest", self.base_url);
        let body = json!({
            "prompt": prompt,
            "max_scenarios": clamp_max_scenarios(max_scenarios),
        });
        let resp = self
            .http
            .post(url)
            .timeout(self.cfg.request_timeout)
            .json(&body)
            .send()
            .await?;
        handle_response(resp).await
    }
}

#[async_trait]
impl SnapshotFetcher for ApiClient {
    async fn fetch_run(&self, run_id: &str) -> Result<RunState, TransportError> {
        ApiClient::fetch_run(self, run_id).await
    }
}

fn clamp_max_scenarios(n: usize) -> usize {
    n.clamp(1, MAX_SCENARIOS_LIMIT)
}

async fn handle_response<T: DeserializeOwned>(resp: Response) -> Result<T, TransportError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(TransportError::from_status(status, &body));
    }
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
