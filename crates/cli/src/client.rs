//! API client for communicating with the admission agent

use anyhow::{Context, Result};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use url::Url;

/// API client for the admission agent
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    /// Make a PUT request with JSON body
    pub async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .put(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    pub async fn stats(&self) -> Result<AdmissionStats> {
        self.get("_nodes/stats/admission_control").await
    }

    pub async fn node_states(&self) -> Result<BTreeMap<String, String>> {
        self.get("_nodes/admission_state").await
    }

    pub async fn settings(&self) -> Result<BTreeMap<String, Value>> {
        self.get("_cluster/settings").await
    }

    pub async fn update_settings(&self, changes: Map<String, Value>) -> Result<SettingsUpdateResponse> {
        let mut body = Map::new();
        body.insert("persistent".to_string(), Value::Object(changes));
        self.put("_cluster/settings", &body).await
    }

    /// Evaluate an action; a rejection (429) is a regular response here
    pub async fn evaluate(&self, request: &EvaluateRequest) -> Result<EvaluationResponse> {
        let url = self
            .base_url
            .join("_admission/evaluate")
            .context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .context("Failed to send request")?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return response.json().await.context("Failed to parse response");
        }
        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            anyhow::bail!("API error ({}): {}", status, message);
        }

        response.json().await.context("Failed to parse response")
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerStats {
    pub controller: String,
    pub mode: String,
    #[serde(default)]
    pub rejection_count: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_ratio: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub kind: String,
    pub usage: f64,
    pub window_average: f64,
    pub ewma: f64,
    pub ready: bool,
    pub samples: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfStats {
    #[serde(rename = "CPU")]
    pub cpu: f64,
    #[serde(rename = "JVM")]
    pub memory: f64,
    #[serde(rename = "IO")]
    pub io: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionStats {
    pub node_id: String,
    /// Unix epoch millis
    pub timestamp: i64,
    pub transport_mode: String,
    pub controllers: Vec<ControllerStats>,
    #[serde(default)]
    pub resources: Vec<ResourceSnapshot>,
    #[serde(default)]
    pub node_states: BTreeMap<String, String>,
    #[serde(default)]
    pub node_perf_stats: BTreeMap<String, PerfStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResponse {
    pub admitted: bool,
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsUpdateResponse {
    pub acknowledged: bool,
    pub updated: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
