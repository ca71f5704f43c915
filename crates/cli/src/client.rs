//! API client for the autopilot control surface

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// API client for the autopilot service
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

    async fn send<B: Serialize>(&self, method: Method, path: &str, body: Option<&B>) -> Result<Response> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            match serde_json::from_str::<ErrorResponse>(&text) {
                Ok(err) => anyhow::bail!("API error ({}, {}): {}", status, err.code, err.error),
                Err(_) => anyhow::bail!("API error ({}): {}", status, text),
            }
        }

        Ok(response)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send::<()>(Method::GET, path, None)
            .await?
            .json()
            .await
            .context("Failed to parse response")
    }

    /// Make a GET request returning plain text
    pub async fn get_text(&self, path: &str) -> Result<String> {
        self.send::<()>(Method::GET, path, None)
            .await?
            .text()
            .await
            .context("Failed to read response")
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        self.send(Method::POST, path, Some(body))
            .await?
            .json()
            .await
            .context("Failed to parse response")
    }

    /// Make a DELETE request with JSON body
    pub async fn delete<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        self.send(Method::DELETE, path, Some(body))
            .await?
            .json()
            .await
            .context("Failed to parse response")
    }
}

// API request and response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpRequest {
    pub ip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeResponse {
    pub status: String,
    pub changed: bool,
}

/// Latency samples per peer, in milliseconds
pub type LatencyTable = BTreeMap<String, Vec<f64>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRegistration {
    pub app_name: String,
    pub namespace: String,
    pub app2: String,
    pub namespace2: String,
    pub url_key: String,
    pub current_backend: String,
    pub ports: BTreeMap<String, u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteAppRequest {
    pub app_name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEnvRequest {
    pub app_name: String,
    pub namespace: String,
    pub url_key: String,
    pub backend: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationOutcome {
    pub app_name: String,
    pub from: String,
    pub to: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleReport {
    pub skipped: bool,
    pub best_backend: Option<String>,
    pub latency: LatencyTable,
    pub migrations: Vec<MigrationOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupNodes {
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupChange {
    pub ip: String,
    pub changed: bool,
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResponse {
    pub ip: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodException {
    pub namespace: String,
    pub pod_name: String,
    pub node_name: Option<String>,
    pub phase: String,
    pub reason: String,
    pub container: Option<String>,
    pub restart_count: i32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleEvent {
    pub time: DateTime<Utc>,
    pub action: String,
    pub from_replicas: i32,
    pub to_replicas: i32,
    pub trigger_rate_kbps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSummary {
    pub key: String,
    pub namespace: String,
    pub deployment: String,
    pub history: Vec<ScaleEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_get_parses_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/get_backends")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"["10.0.0.1","10.0.0.2"]"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let backends: Vec<String> = client.get("api/get_backends").await.unwrap();

        assert_eq!(backends, vec!["10.0.0.1", "10.0.0.2"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/register_backend")
            .match_body(Matcher::Json(serde_json::json!({"ip": "10.0.0.3"})))
            .with_status(200)
            .with_body(r#"{"status":"success","changed":true}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let response: ChangeResponse = client
            .post(
                "api/register_backend",
                &IpRequest {
                    ip: "10.0.0.3".into(),
                },
            )
            .await
            .unwrap();

        assert!(response.changed);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_sends_json_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/backup-nodes")
            .match_body(Matcher::Json(serde_json::json!({"ip": "192.168.1.20"})))
            .with_status(200)
            .with_body(r#"{"ip":"192.168.1.20","changed":true,"nodes":[]}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let response: BackupChange = client
            .delete(
                "backup-nodes",
                &IpRequest {
                    ip: "192.168.1.20".into(),
                },
            )
            .await
            .unwrap();

        assert!(response.changed);
        assert!(response.nodes.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_structured_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/register_app")
            .with_status(409)
            .with_body(r#"{"error":"app web already exists","code":"CONFLICT"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client
            .post::<AppRegistration, _>("api/register_app", &serde_json::json!({}))
            .await
            .unwrap_err()
            .to_string();

        assert!(err.contains("CONFLICT"));
        assert!(err.contains("app web already exists"));
    }

    #[tokio::test]
    async fn test_get_text_for_ping() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/ping")
            .with_status(200)
            .with_body("pong")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        assert_eq!(client.get_text("api/ping").await.unwrap(), "pong");
    }

    #[test]
    fn test_migration_outcome_reads_flattened_status() {
        let aborted: MigrationOutcome = serde_json::from_str(
            r#"{"app_name":"web","from":"a","to":"b","status":"aborted","step":"route","reason":"no env"}"#,
        )
        .unwrap();
        assert_eq!(aborted.step.as_deref(), Some("route"));

        let completed: MigrationOutcome =
            serde_json::from_str(r#"{"app_name":"web","from":"a","to":"b","status":"completed"}"#)
                .unwrap();
        assert!(completed.reason.is_none());
    }
}
