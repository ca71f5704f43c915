//! HTTP client for backend peers
//!
//! Peers run the same control surface: `/api/ping` for latency probes and
//! `/api/deployAppWithImage` for bundle deploys on the peer port, plus the
//! frontend's `/api/delApp` for teardown.

use crate::error::PeerError;
use crate::models::AppRegistration;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Bundle deploy request sent to the new backend
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub path: String,
    pub model_name: String,
    pub model_version: String,
    pub model_code: String,
    pub ports: BTreeMap<String, u16>,
}

impl DeployRequest {
    const MODEL_NAME: &'static str = "app4399";
    const MODEL_VERSION: &'static str = "v1";

    /// Deploy of a registration's mirrored bundle under `bundle_root`
    pub fn for_registration(registration: &AppRegistration, bundle_root: &str) -> Self {
        Self {
            path: format!(
                "{}/{}/{}",
                bundle_root.trim_end_matches('/'),
                registration.mirror_namespace,
                registration.mirror_app
            ),
            model_name: Self::MODEL_NAME.to_string(),
            model_version: Self::MODEL_VERSION.to_string(),
            model_code: Self::MODEL_NAME.to_string(),
            ports: registration.ports.clone(),
        }
    }
}

/// Requests the scheduler sends to backend peers
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Round-trip a liveness probe
    async fn ping(&self, ip: &str) -> Result<Duration, PeerError>;

    /// Ask a peer to deploy an application bundle
    async fn deploy_app(&self, ip: &str, request: &DeployRequest) -> Result<(), PeerError>;

    /// Ask a peer to delete an application
    async fn delete_app(&self, ip: &str, namespace: &str, app_name: &str) -> Result<(), PeerError>;
}

#[derive(Debug, Clone)]
pub struct PeerClientConfig {
    /// Port of the peer control surface (default: 5002)
    pub peer_port: u16,
    /// Port of the peer frontend serving `/api/delApp` (default: 32293)
    pub frontend_port: u16,
    /// Latency probe deadline (default: 5 seconds)
    pub probe_timeout: Duration,
    /// Deadline for deploy and delete requests (default: 120 seconds)
    pub request_timeout: Duration,
}

impl Default for PeerClientConfig {
    fn default() -> Self {
        Self {
            peer_port: 5002,
            frontend_port: 32293,
            probe_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(120),
        }
    }
}

pub struct HttpPeerClient {
    http: reqwest::Client,
    config: PeerClientConfig,
    authorization: Option<String>,
}

impl HttpPeerClient {
    pub fn new(config: PeerClientConfig) -> Result<Self, PeerError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PeerError::Http {
                peer: "client".to_string(),
                source: e,
            })?;
        Ok(Self {
            http,
            config,
            authorization: None,
        })
    }

    /// Send the kubeconfig, URI-component encoded, as the Authorization
    /// header of delete requests
    pub fn with_kubeconfig(mut self, kubeconfig: &str) -> Self {
        self.authorization = Some(encode_uri_component(kubeconfig));
        self
    }

    fn peer_url(&self, ip: &str, path: &str) -> String {
        format!("http://{}:{}{}", ip, self.config.peer_port, path)
    }

    fn http_err(ip: &str, timeout: Duration) -> impl Fn(reqwest::Error) -> PeerError + '_ {
        move |e| {
            if e.is_timeout() {
                PeerError::Timeout {
                    peer: ip.to_string(),
                    secs: timeout.as_secs(),
                }
            } else {
                PeerError::Http {
                    peer: ip.to_string(),
                    source: e,
                }
            }
        }
    }

    async fn check_status(ip: &str, response: reqwest::Response) -> Result<(), PeerError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(PeerError::Status {
            peer: ip.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn ping(&self, ip: &str) -> Result<Duration, PeerError> {
        let started = Instant::now();
        let response = self
            .http
            .get(self.peer_url(ip, "/api/ping"))
            .timeout(self.config.probe_timeout)
            .send()
            .await
            .map_err(Self::http_err(ip, self.config.probe_timeout))?;
        let elapsed = started.elapsed();
        Self::check_status(ip, response).await?;
        debug!(peer = %ip, latency_ms = elapsed.as_millis() as u64, "Probed peer");
        Ok(elapsed)
    }

    async fn deploy_app(&self, ip: &str, request: &DeployRequest) -> Result<(), PeerError> {
        let response = self
            .http
            .post(self.peer_url(ip, "/api/deployAppWithImage"))
            .json(request)
            .send()
            .await
            .map_err(Self::http_err(ip, self.config.request_timeout))?;
        Self::check_status(ip, response).await
    }

    async fn delete_app(&self, ip: &str, namespace: &str, app_name: &str) -> Result<(), PeerError> {
        let url = format!("http://{}:{}/api/delApp", ip, self.config.frontend_port);
        let mut request = self
            .http
            .post(url)
            .query(&[("namespace", namespace)])
            .json(&serde_json::json!({ "name": app_name }));
        if let Some(auth) = &self.authorization {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }
        let response = request
            .send()
            .await
            .map_err(Self::http_err(ip, self.config.request_timeout))?;
        Self::check_status(ip, response).await
    }
}

/// Percent-encode everything outside the unreserved set, spaces as `%20`
fn encode_uri_component(raw: &str) -> String {
    // byte_serialize writes a literal '+' as %2B, so any '+' left is a space
    url::form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
